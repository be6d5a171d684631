use bytes::{Buf, BufMut, Bytes, BytesMut};
use rad_core::error::{Error, Result};
use std::collections::VecDeque;
use std::os::fd::OwnedFd;

pub const IMSG_HEADER_SIZE: usize = 16;

/// Largest frame, header included.
pub const MAX_IMSGSIZE: usize = 16384;

const IMSG_FLAG_FD: u16 = 0x1;

/// Message kinds understood on the front-end's two channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ImsgType {
    /// main → frontend: fd of the engine channel
    SocketIpc = 1,
    /// main → frontend: fd of the raw ICMPv6 socket
    Icmp6Sock = 2,
    ReconfConf = 3,
    ReconfRaIface = 4,
    ReconfRaAutoprefix = 5,
    ReconfRaPrefix = 6,
    ReconfEnd = 7,
    Startup = 8,
    StartupDone = 9,
    /// engine → frontend
    SendRa = 10,
    /// frontend → engine
    RaRs = 11,
}

impl ImsgType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::SocketIpc),
            2 => Some(Self::Icmp6Sock),
            3 => Some(Self::ReconfConf),
            4 => Some(Self::ReconfRaIface),
            5 => Some(Self::ReconfRaAutoprefix),
            6 => Some(Self::ReconfRaPrefix),
            7 => Some(Self::ReconfEnd),
            8 => Some(Self::Startup),
            9 => Some(Self::StartupDone),
            10 => Some(Self::SendRa),
            11 => Some(Self::RaRs),
            _ => None,
        }
    }
}

/// One framed message.
#[derive(Debug)]
pub struct Imsg {
    /// Raw type, kept as-is so unknown kinds can be logged and skipped.
    pub kind: u32,
    pub peer_id: u32,
    pub pid: u32,
    pub data: Bytes,
    pub fd: Option<OwnedFd>,
}

impl Imsg {
    pub fn new(kind: ImsgType, data: Bytes) -> Self {
        Self {
            kind: kind as u32,
            peer_id: 0,
            pid: 0,
            data,
            fd: None,
        }
    }

    pub fn empty(kind: ImsgType) -> Self {
        Self::new(kind, Bytes::new())
    }

    pub fn with_fd(mut self, fd: OwnedFd) -> Self {
        self.fd = Some(fd);
        self
    }

    pub fn message_type(&self) -> Option<ImsgType> {
        ImsgType::from_u32(self.kind)
    }

    /// Append header and payload to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let len = IMSG_HEADER_SIZE + self.data.len();
        if len > MAX_IMSGSIZE {
            return Err(Error::Ipc(format!(
                "imsg type {} too large: {len} bytes",
                self.kind
            )));
        }
        let flags = if self.fd.is_some() { IMSG_FLAG_FD } else { 0 };

        dst.reserve(len);
        dst.put_u32(self.kind);
        dst.put_u16(len as u16);
        dst.put_u16(flags);
        dst.put_u32(self.peer_id);
        dst.put_u32(self.pid);
        dst.extend_from_slice(&self.data);
        Ok(())
    }
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. A frame flagged as carrying
/// a descriptor takes the oldest one from `fds`; if none arrived the message
/// is returned without it and the consumer decides what that means.
pub fn decode_frame(buf: &mut BytesMut, fds: &mut VecDeque<OwnedFd>) -> Result<Option<Imsg>> {
    if buf.len() < IMSG_HEADER_SIZE {
        return Ok(None);
    }

    let len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    if !(IMSG_HEADER_SIZE..=MAX_IMSGSIZE).contains(&len) {
        return Err(Error::Ipc(format!("bad imsg length {len}")));
    }
    if buf.len() < len {
        return Ok(None);
    }

    let mut frame = buf.split_to(len).freeze();
    let kind = frame.get_u32();
    let _len = frame.get_u16();
    let flags = frame.get_u16();
    let peer_id = frame.get_u32();
    let pid = frame.get_u32();

    let fd = if flags & IMSG_FLAG_FD != 0 {
        fds.pop_front()
    } else {
        None
    };

    Ok(Some(Imsg {
        kind,
        peer_id,
        pid,
        data: frame,
        fd,
    }))
}
