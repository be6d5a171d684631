use crate::packet::{ND_ROUTER_ADVERT, ND_ROUTER_SOLICIT};
use async_trait::async_trait;
use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags, SockaddrIn6};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, IoSlice};
use std::mem::{size_of, size_of_val};
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;

/// `ICMP6_FILTER` from `<netinet/icmp6.h>`.
const ICMP6_FILTER: libc::c_int = 1;

/// One bit per ICMPv6 type, a set bit blocks the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Icmp6Filter([u32; 8]);

impl Icmp6Filter {
    pub fn block_all() -> Self {
        Self([u32::MAX; 8])
    }

    pub fn pass(&mut self, kind: u8) {
        self.0[usize::from(kind >> 5)] &= !(1 << (kind & 31));
    }

    pub fn will_pass(&self, kind: u8) -> bool {
        self.0[usize::from(kind >> 5)] & (1 << (kind & 31)) == 0
    }
}

/// Ancillary data that came with a datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvMeta {
    /// From IPV6_PKTINFO.
    pub if_index: Option<u32>,
    /// From IPV6_HOPLIMIT.
    pub hop_limit: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub from: SocketAddrV6,
    pub meta: RecvMeta,
}

/// The raw ICMPv6 socket as seen by the front-end.
#[async_trait]
pub trait RaSocket: Send + Sync {
    /// Adopt a socket handed over by the parent.
    fn from_fd(fd: OwnedFd) -> io::Result<Self>
    where
        Self: Sized;

    fn join_group(&self, group: &Ipv6Addr, if_index: u32) -> io::Result<()>;

    fn leave_group(&self, group: &Ipv6Addr, if_index: u32) -> io::Result<()>;

    /// Send `packet` out of `if_index` with an explicit hop limit.
    fn send_to(&self, packet: &[u8], to: &SocketAddrV6, if_index: u32, hop_limit: i32)
        -> io::Result<usize>;

    /// Wait for the next datagram. `buf` should be one byte larger than the
    /// largest acceptable packet so oversized ones can be told apart.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<Received>;
}

/// Open the raw ICMPv6 socket with packet info and hop limit reporting on.
/// Only Router Solicitations and Advertisements get through.
pub fn open_icmp6_socket() -> io::Result<Socket> {
    let sock = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))?;
    sock.set_nonblocking(true)?;
    let fd = sock.as_raw_fd();
    let on: libc::c_int = 1;
    set_opt(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, &on)?;
    set_opt(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT, &on)?;

    let mut filter = Icmp6Filter::block_all();
    filter.pass(ND_ROUTER_SOLICIT);
    filter.pass(ND_ROUTER_ADVERT);
    set_opt(fd, libc::IPPROTO_ICMPV6, ICMP6_FILTER, &filter)?;
    Ok(sock)
}

/// The ICMPv6 type filter currently installed on `fd`.
pub fn icmp6_filter(fd: RawFd) -> io::Result<Icmp6Filter> {
    let mut filter = Icmp6Filter([0; 8]);
    let mut len = size_of::<Icmp6Filter>() as libc::socklen_t;
    // SAFETY: `filter` is a plain `[u32; 8]` and `len` holds its size
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::IPPROTO_ICMPV6,
            ICMP6_FILTER,
            (&mut filter as *mut Icmp6Filter).cast(),
            &mut len,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(filter)
}

fn set_opt<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    // SAFETY: `value` outlives the call and the length matches its type
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (value as *const T).cast(),
            size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub struct Icmp6Socket {
    inner: AsyncFd<Socket>,
}

impl Icmp6Socket {
    pub fn new(sock: Socket) -> io::Result<Self> {
        sock.set_nonblocking(true)?;
        // SAFETY: the socket owns its descriptor and moves into the AsyncFd
        let inner = unsafe { AsyncFd::register(sock) }?;
        Ok(Self { inner })
    }

    fn raw(&self) -> RawFd {
        self.inner.get_ref().as_raw_fd()
    }
}

#[async_trait]
impl RaSocket for Icmp6Socket {
    fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        Self::new(Socket::from(fd))
    }

    fn join_group(&self, group: &Ipv6Addr, if_index: u32) -> io::Result<()> {
        self.inner.get_ref().join_multicast_v6(group, if_index)
    }

    fn leave_group(&self, group: &Ipv6Addr, if_index: u32) -> io::Result<()> {
        self.inner.get_ref().leave_multicast_v6(group, if_index)
    }

    fn send_to(
        &self,
        packet: &[u8],
        to: &SocketAddrV6,
        if_index: u32,
        hop_limit: i32,
    ) -> io::Result<usize> {
        let pktinfo = libc::in6_pktinfo {
            ipi6_addr: libc::in6_addr { s6_addr: [0; 16] },
            ipi6_ifindex: if_index,
        };
        let hlim: libc::c_int = hop_limit;
        let cmsgs = [
            ControlMessage::Ipv6PacketInfo(&pktinfo),
            ControlMessage::Ipv6HopLimit(&hlim),
        ];
        let iov = [IoSlice::new(packet)];
        let dst = SockaddrIn6::from(*to);

        sendmsg(self.raw(), &iov, &cmsgs, MsgFlags::empty(), Some(&dst)).map_err(io::Error::from)
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<Received> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|fd| recv_with_meta(fd.get_ref().as_raw_fd(), &mut *buf)) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Room for one `in6_pktinfo` and one `int` control message.
const CMSG_WORDS: usize = 16;

fn recv_with_meta(fd: RawFd, buf: &mut [u8]) -> io::Result<Received> {
    // SAFETY: all-zero is a valid sockaddr_in6 and msghdr
    let mut from: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    let mut cmsg_buf = [0u64; CMSG_WORDS];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    msg.msg_name = (&mut from as *mut libc::sockaddr_in6).cast();
    msg.msg_namelen = size_of::<libc::sockaddr_in6>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = size_of_val(&cmsg_buf) as _;

    // SAFETY: every pointer in `msg` refers to a live local of the stated size
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: the kernel filled `msg` and its control buffer
    let meta = unsafe { parse_cmsgs(&msg) };
    let from = SocketAddrV6::new(
        Ipv6Addr::from(from.sin6_addr.s6_addr),
        u16::from_be(from.sin6_port),
        from.sin6_flowinfo,
        from.sin6_scope_id,
    );

    Ok(Received {
        len: n as usize,
        from,
        meta,
    })
}

/// Pick packet info and hop limit out of a received control buffer.
///
/// # Safety
///
/// `msg` must come from a successful `recvmsg` whose control buffer is
/// still alive.
unsafe fn parse_cmsgs(msg: &libc::msghdr) -> RecvMeta {
    let mut meta = RecvMeta::default();
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);

    while !cmsg.is_null() {
        let hdr = &*cmsg;
        let data = libc::CMSG_DATA(cmsg);
        let len = hdr.cmsg_len as usize;

        if hdr.cmsg_level == libc::IPPROTO_IPV6 {
            match hdr.cmsg_type {
                libc::IPV6_PKTINFO
                    if len == libc::CMSG_LEN(size_of::<libc::in6_pktinfo>() as u32) as usize =>
                {
                    let info = std::ptr::read_unaligned(data as *const libc::in6_pktinfo);
                    meta.if_index = Some(info.ipi6_ifindex);
                }
                libc::IPV6_HOPLIMIT
                    if len == libc::CMSG_LEN(size_of::<libc::c_int>() as u32) as usize =>
                {
                    meta.hop_limit = Some(std::ptr::read_unaligned(data as *const libc::c_int));
                }
                _ => {}
            }
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Raw sockets need CAP_NET_RAW; skip where it is missing.
    fn raw_socket() -> Option<Socket> {
        match open_icmp6_socket() {
            Ok(sock) => Some(sock),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => None,
            Err(e) => panic!("open_icmp6_socket: {e}"),
        }
    }

    #[test]
    fn test_filter_bits() {
        let mut filter = Icmp6Filter::block_all();
        assert!(!filter.will_pass(ND_ROUTER_SOLICIT));
        filter.pass(ND_ROUTER_SOLICIT);
        filter.pass(ND_ROUTER_ADVERT);
        assert!(filter.will_pass(133));
        assert!(filter.will_pass(134));
        assert!(!filter.will_pass(128));
        assert!(!filter.will_pass(135));
        assert!(!filter.will_pass(255));
        assert!(!filter.will_pass(0));
    }

    #[test]
    fn test_socket_passes_only_rs_and_ra() {
        let Some(sock) = raw_socket() else { return };
        let filter = icmp6_filter(sock.as_raw_fd()).unwrap();
        assert!(filter.will_pass(ND_ROUTER_SOLICIT));
        assert!(filter.will_pass(ND_ROUTER_ADVERT));
        // echo request, NS, NA, MLD report
        for kind in [128u8, 135, 136, 143] {
            assert!(!filter.will_pass(kind), "type {kind} should be blocked");
        }
    }

    #[tokio::test]
    async fn test_loopback_reports_index_and_hop_limit() {
        let Some(sock) = raw_socket() else { return };
        let sock = Icmp6Socket::new(sock).unwrap();
        let lo = nix::net::if_::if_nametoindex("lo").unwrap();

        let rs = [ND_ROUTER_SOLICIT, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef];
        let to = SocketAddrV6::new(Ipv6Addr::LOCALHOST, 0, 0, 0);
        assert_eq!(sock.send_to(&rs, &to, lo, 255).unwrap(), rs.len());

        let mut buf = [0u8; 1501];
        let rx = loop {
            let rx = tokio::time::timeout(Duration::from_secs(5), sock.recv(&mut buf))
                .await
                .expect("no datagram on loopback")
                .unwrap();
            if buf[..rx.len] == rs {
                break rx;
            }
        };

        assert_eq!(rx.meta.if_index, Some(lo));
        assert_eq!(rx.meta.hop_limit, Some(255));
        assert_eq!(*rx.from.ip(), Ipv6Addr::LOCALHOST);
    }
}
