use crate::imsg::{decode_frame, Imsg, ImsgType};
use crate::records::Record;
use bytes::{Bytes, BytesMut};
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use rad_core::error::{Error, Result};
use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::UnixStream;

const READ_CHUNK: usize = 4096;

/// Descriptors accepted per read.
const MAX_FDS: usize = 4;

/// Frames that may wait in the outgoing queue.
pub const MAX_QUEUED: usize = 64;

/// An encoded frame on its way out.
struct Pending {
    frame: BytesMut,
    off: usize,
    fd: Option<OwnedFd>,
}

/// One end of an imsg channel.
///
/// `recv` keeps all partial state inside the channel, so it can sit in a
/// `tokio::select!` branch and be dropped without losing bytes. Frames
/// added with `queue` are written while `recv` waits for input, or by
/// `flush`.
pub struct ImsgChannel {
    stream: UnixStream,
    rbuf: BytesMut,
    fds: VecDeque<OwnedFd>,
    eof: bool,
    wq: VecDeque<Pending>,
}

impl ImsgChannel {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            rbuf: BytesMut::with_capacity(READ_CHUNK),
            fds: VecDeque::new(),
            eof: false,
            wq: VecDeque::new(),
        }
    }

    /// Adopt a descriptor received over another channel.
    pub fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        let std_stream = std::os::unix::net::UnixStream::from(fd);
        std_stream.set_nonblocking(true)?;
        Ok(Self::new(UnixStream::from_std(std_stream)?))
    }

    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::new(a), Self::new(b)))
    }

    /// Hand out the raw socket end, e.g. to pass it to another service.
    pub fn into_fd(self) -> io::Result<OwnedFd> {
        let std_stream = self.stream.into_std()?;
        Ok(OwnedFd::from(std_stream))
    }

    pub async fn compose(&mut self, kind: ImsgType, data: Bytes) -> Result<()> {
        self.send(Imsg::new(kind, data)).await
    }

    pub async fn compose_record<R: Record>(&mut self, kind: ImsgType, record: &R) -> Result<()> {
        self.compose(kind, record.to_bytes()).await
    }

    /// Queue a record without waiting for the peer.
    pub fn queue_record<R: Record>(&mut self, kind: ImsgType, record: &R) -> Result<()> {
        self.queue(Imsg::new(kind, record.to_bytes()))
    }

    /// Add one frame to the outgoing queue. A descriptor attached to `msg`
    /// is passed with the first byte of the frame and closed locally once
    /// the frame is written.
    pub fn queue(&mut self, mut msg: Imsg) -> Result<()> {
        if self.is_full() {
            return Err(Error::Ipc(format!("outgoing queue full ({MAX_QUEUED} frames)")));
        }
        let mut frame = BytesMut::new();
        msg.encode(&mut frame)?;
        self.wq.push_back(Pending {
            frame,
            off: 0,
            fd: msg.fd.take(),
        });
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.wq.len() >= MAX_QUEUED
    }

    pub fn has_pending(&self) -> bool {
        !self.wq.is_empty()
    }

    /// Queue one frame and wait until everything queued is written.
    pub async fn send(&mut self, msg: Imsg) -> Result<()> {
        self.queue(msg)?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        while !self.write_pending()? {
            self.stream.writable().await?;
        }
        Ok(())
    }

    /// Write queued frames until the queue is empty (`true`) or the socket
    /// would block (`false`).
    fn write_pending(&mut self) -> Result<bool> {
        let raw = self.stream.as_raw_fd();

        while let Some(front) = self.wq.front_mut() {
            let pass: Vec<RawFd> = match (&front.fd, front.off) {
                (Some(f), 0) => vec![f.as_raw_fd()],
                _ => Vec::new(),
            };
            let res = self.stream.try_io(Interest::WRITABLE, || {
                let iov = [IoSlice::new(&front.frame[front.off..])];
                let rights = [ControlMessage::ScmRights(&pass)];
                let cmsgs: &[ControlMessage] = if pass.is_empty() { &[] } else { &rights };
                sendmsg::<()>(raw, &iov, cmsgs, MsgFlags::empty(), None).map_err(io::Error::from)
            });

            match res {
                Ok(n) => {
                    front.off += n;
                    if front.off == front.frame.len() {
                        self.wq.pop_front();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(true)
    }

    /// Next message, or `None` once the peer closed the channel.
    pub async fn recv(&mut self) -> Result<Option<Imsg>> {
        loop {
            let drained = self.write_pending()?;
            if let Some(msg) = decode_frame(&mut self.rbuf, &mut self.fds)? {
                return Ok(Some(msg));
            }
            if self.eof {
                if !self.rbuf.is_empty() {
                    return Err(Error::Ipc(format!(
                        "channel closed inside a frame ({} bytes pending)",
                        self.rbuf.len()
                    )));
                }
                return Ok(None);
            }

            if drained {
                self.stream.readable().await?;
            } else {
                tokio::select! {
                    res = self.stream.readable() => res?,
                    res = self.stream.writable() => {
                        res?;
                        continue;
                    }
                }
            }

            let raw = self.stream.as_raw_fd();
            let mut chunk = [0u8; READ_CHUNK];
            let mut cmsg_buf = nix::cmsg_space!([RawFd; MAX_FDS]);
            let res = self.stream.try_io(Interest::READABLE, || {
                let mut iov = [IoSliceMut::new(&mut chunk)];
                let msg = recvmsg::<()>(raw, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
                    .map_err(io::Error::from)?;
                let mut rights = Vec::new();
                for cmsg in msg.cmsgs().map_err(io::Error::from)? {
                    if let ControlMessageOwned::ScmRights(fds) = cmsg {
                        rights.extend(fds);
                    }
                }
                Ok((msg.bytes, rights))
            });

            match res {
                Ok((n, rights)) => {
                    for fd in rights {
                        // SAFETY: the kernel just installed this descriptor for us
                        self.fds.push_back(unsafe { OwnedFd::from_raw_fd(fd) });
                    }
                    if n == 0 {
                        self.eof = true;
                    } else {
                        self.rbuf.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Close the write side; the peer sees end-of-stream. Frames the
    /// socket does not take right away are discarded.
    pub async fn shutdown(&mut self) -> Result<()> {
        let drained = self.write_pending();
        self.wq.clear();
        drained?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SendRa;
    use std::net::SocketAddrV6;

    #[tokio::test]
    async fn test_send_recv() {
        let (mut a, mut b) = ImsgChannel::pair().unwrap();

        let req = SendRa {
            if_index: 4,
            to: SocketAddrV6::new("ff02::1".parse().unwrap(), 0, 0, 4),
        };
        a.compose_record(ImsgType::SendRa, &req).await.unwrap();
        a.send(Imsg::empty(ImsgType::StartupDone)).await.unwrap();

        let first = b.recv().await.unwrap().unwrap();
        assert_eq!(first.message_type(), Some(ImsgType::SendRa));
        assert_eq!(SendRa::from_bytes(&first.data).unwrap(), req);

        let second = b.recv().await.unwrap().unwrap();
        assert_eq!(second.message_type(), Some(ImsgType::StartupDone));
    }

    #[tokio::test]
    async fn test_eof_after_shutdown() {
        let (mut a, mut b) = ImsgChannel::pair().unwrap();
        a.send(Imsg::empty(ImsgType::Startup)).await.unwrap();
        a.shutdown().await.unwrap();

        assert!(b.recv().await.unwrap().is_some());
        assert!(b.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fd_passing() {
        let (mut main, mut front) = ImsgChannel::pair().unwrap();
        let (inner_a, inner_b) = ImsgChannel::pair().unwrap();

        let msg = Imsg::empty(ImsgType::SocketIpc).with_fd(inner_b.into_fd().unwrap());
        main.send(msg).await.unwrap();

        let got = front.recv().await.unwrap().unwrap();
        assert_eq!(got.message_type(), Some(ImsgType::SocketIpc));
        let fd = got.fd.expect("descriptor should arrive with the frame");

        // The received end is a working channel to inner_a
        let mut inner_b = ImsgChannel::from_fd(fd).unwrap();
        let mut inner_a = inner_a;
        inner_a.send(Imsg::empty(ImsgType::Startup)).await.unwrap();
        let relayed = inner_b.recv().await.unwrap().unwrap();
        assert_eq!(relayed.message_type(), Some(ImsgType::Startup));
    }

    #[tokio::test]
    async fn test_queue_is_bounded_and_never_waits() {
        let (mut a, mut b) = ImsgChannel::pair().unwrap();
        let big = Bytes::from(vec![0u8; 8192]);

        // Nobody reads `b`, so most of this stays queued
        for _ in 0..MAX_QUEUED {
            a.queue(Imsg::new(ImsgType::RaRs, big.clone())).unwrap();
        }
        assert!(a.is_full());
        let err = a.queue(Imsg::empty(ImsgType::SendRa)).unwrap_err();
        assert!(matches!(err, Error::Ipc(_)));

        let reader = tokio::spawn(async move {
            for _ in 0..MAX_QUEUED {
                let msg = b.recv().await.unwrap().unwrap();
                assert_eq!(msg.data.len(), 8192);
            }
        });
        a.flush().await.unwrap();
        assert!(!a.has_pending());
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_writes_queued_frames() {
        let (mut a, mut b) = ImsgChannel::pair().unwrap();
        a.queue(Imsg::empty(ImsgType::StartupDone)).unwrap();

        // Only `a.recv` can move the frame out
        let got = tokio::select! {
            _ = a.recv() => panic!("a has nothing to read"),
            msg = b.recv() => msg.unwrap().unwrap(),
        };
        assert_eq!(got.message_type(), Some(ImsgType::StartupDone));
        assert!(!a.has_pending());
    }

    #[tokio::test]
    async fn test_large_record_crosses_chunks() {
        let (mut a, mut b) = ImsgChannel::pair().unwrap();
        let payload = Bytes::from(vec![0x5a; 3 * READ_CHUNK]);
        a.compose(ImsgType::RaRs, payload.clone()).await.unwrap();

        let got = b.recv().await.unwrap().unwrap();
        assert_eq!(got.data, payload);
    }
}
