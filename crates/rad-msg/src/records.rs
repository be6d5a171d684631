//! Fixed-size payload records and their codecs.
//!
//! Decoding insists on the exact record size: a trusted peer sending anything
//! else is a framing bug, reported as `Error::Ipc`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rad_core::error::{Error, Result};
use rad_core::types::{PrefixConf, RaOptions, IF_NAMESIZE, MAX_PACKET_SIZE};
use std::net::{Ipv6Addr, SocketAddrV6};

const SOCKADDR_IN6_SIZE: usize = 28;

const OPT_MANAGED: u8 = 0x01;
const OPT_OTHER: u8 = 0x02;
const OPT_DEFAULT_ROUTER: u8 = 0x04;

const PREFIX_ONLINK: u8 = 0x01;
const PREFIX_AUTO: u8 = 0x02;

pub trait Record: Sized {
    const NAME: &'static str;
    const SIZE: usize;

    fn put(&self, buf: &mut BytesMut);

    /// Read one record; `buf` holds at least `SIZE` bytes.
    fn get(buf: &mut &[u8]) -> Result<Self>;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.put(&mut buf);
        debug_assert_eq!(buf.len(), Self::SIZE);
        buf.freeze()
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(Error::Ipc(format!(
                "{}: wrong length {} (expected {})",
                Self::NAME,
                data.len(),
                Self::SIZE
            )));
        }
        let mut cur = data;
        Self::get(&mut cur)
    }
}

impl Record for RaOptions {
    const NAME: &'static str = "ra options";
    const SIZE: usize = 12;

    fn put(&self, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.managed {
            flags |= OPT_MANAGED;
        }
        if self.other {
            flags |= OPT_OTHER;
        }
        if self.default_router {
            flags |= OPT_DEFAULT_ROUTER;
        }
        buf.put_u8(self.cur_hop_limit);
        buf.put_u8(flags);
        buf.put_u16(self.router_lifetime);
        buf.put_u32(self.reachable_time);
        buf.put_u32(self.retrans_timer);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        let cur_hop_limit = buf.get_u8();
        let flags = buf.get_u8();
        Ok(Self {
            cur_hop_limit,
            managed: flags & OPT_MANAGED != 0,
            other: flags & OPT_OTHER != 0,
            default_router: flags & OPT_DEFAULT_ROUTER != 0,
            router_lifetime: buf.get_u16(),
            reachable_time: buf.get_u32(),
            retrans_timer: buf.get_u32(),
        })
    }
}

/// Payload of `ReconfRaIface`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaIfaceRecord {
    pub name: String,
    pub options: RaOptions,
}

impl RaIfaceRecord {
    pub fn new(name: &str, options: RaOptions) -> Result<Self> {
        if name.is_empty() || name.len() >= IF_NAMESIZE || name.contains('\0') {
            return Err(Error::Config(format!("invalid interface name {name:?}")));
        }
        Ok(Self {
            name: name.to_string(),
            options,
        })
    }
}

impl Record for RaIfaceRecord {
    const NAME: &'static str = "ra iface";
    const SIZE: usize = IF_NAMESIZE + RaOptions::SIZE;

    fn put(&self, buf: &mut BytesMut) {
        let mut name = [0u8; IF_NAMESIZE];
        name[..self.name.len()].copy_from_slice(self.name.as_bytes());
        buf.put_slice(&name);
        self.options.put(buf);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        let mut raw = [0u8; IF_NAMESIZE];
        buf.copy_to_slice(&mut raw);
        let end = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Ipc("interface name not terminated".into()))?;
        let name = std::str::from_utf8(&raw[..end])
            .map_err(|_| Error::Ipc("interface name not utf-8".into()))?;
        if name.is_empty() {
            return Err(Error::Ipc("empty interface name".into()));
        }
        Ok(Self {
            name: name.to_string(),
            options: RaOptions::get(buf)?,
        })
    }
}

/// Payload of `ReconfRaPrefix` and `ReconfRaAutoprefix`.
impl Record for PrefixConf {
    const NAME: &'static str = "ra prefix";
    const SIZE: usize = 28;

    fn put(&self, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.on_link {
            flags |= PREFIX_ONLINK;
        }
        if self.autonomous {
            flags |= PREFIX_AUTO;
        }
        buf.put_slice(&self.prefix.octets());
        buf.put_u8(self.prefix_len);
        buf.put_u8(flags);
        buf.put_u16(0);
        buf.put_u32(self.valid_lifetime);
        buf.put_u32(self.preferred_lifetime);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        let prefix = get_addr(buf);
        let prefix_len = buf.get_u8();
        if prefix_len > 128 {
            return Err(Error::Ipc(format!("prefix length {prefix_len} out of range")));
        }
        let flags = buf.get_u8();
        let _reserved = buf.get_u16();
        Ok(Self {
            prefix,
            prefix_len,
            valid_lifetime: buf.get_u32(),
            preferred_lifetime: buf.get_u32(),
            on_link: flags & PREFIX_ONLINK != 0,
            autonomous: flags & PREFIX_AUTO != 0,
        })
    }
}

/// Engine → frontend: send the interface's RA to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendRa {
    pub if_index: u32,
    pub to: SocketAddrV6,
}

impl Record for SendRa {
    const NAME: &'static str = "send ra";
    const SIZE: usize = 4 + SOCKADDR_IN6_SIZE;

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32(self.if_index);
        put_sockaddr(buf, &self.to);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            if_index: buf.get_u32(),
            to: get_sockaddr(buf),
        })
    }
}

/// Frontend → engine: one validated RA or RS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaRs {
    pub if_index: u32,
    pub from: SocketAddrV6,
    pub packet: Bytes,
}

impl Record for RaRs {
    const NAME: &'static str = "ra rs";
    const SIZE: usize = 4 + SOCKADDR_IN6_SIZE + 4 + MAX_PACKET_SIZE;

    fn put(&self, buf: &mut BytesMut) {
        let len = self.packet.len().min(MAX_PACKET_SIZE);
        buf.put_u32(self.if_index);
        put_sockaddr(buf, &self.from);
        buf.put_u32(len as u32);
        buf.put_slice(&self.packet[..len]);
        buf.put_bytes(0, MAX_PACKET_SIZE - len);
    }

    fn get(buf: &mut &[u8]) -> Result<Self> {
        let if_index = buf.get_u32();
        let from = get_sockaddr(buf);
        let len = buf.get_u32() as usize;
        if len > MAX_PACKET_SIZE {
            return Err(Error::Ipc(format!("ra rs: packet length {len} out of range")));
        }
        let packet = Bytes::copy_from_slice(&buf[..len]);
        buf.advance(MAX_PACKET_SIZE);
        Ok(Self {
            if_index,
            from,
            packet,
        })
    }
}

fn get_addr(buf: &mut &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    buf.copy_to_slice(&mut octets);
    Ipv6Addr::from(octets)
}

fn put_sockaddr(buf: &mut BytesMut, addr: &SocketAddrV6) {
    buf.put_slice(&addr.ip().octets());
    buf.put_u16(addr.port());
    buf.put_u16(0);
    buf.put_u32(addr.flowinfo());
    buf.put_u32(addr.scope_id());
}

fn get_sockaddr(buf: &mut &[u8]) -> SocketAddrV6 {
    let ip = get_addr(buf);
    let port = buf.get_u16();
    let _reserved = buf.get_u16();
    let flowinfo = buf.get_u32();
    let scope_id = buf.get_u32();
    SocketAddrV6::new(ip, port, flowinfo, scope_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_flags_survive() {
        let opts = RaOptions {
            cur_hop_limit: 64,
            managed: true,
            other: false,
            default_router: true,
            router_lifetime: 1800,
            reachable_time: 30000,
            retrans_timer: 1000,
        };
        let bytes = opts.to_bytes();
        assert_eq!(bytes.len(), RaOptions::SIZE);
        assert_eq!(bytes[1], OPT_MANAGED | OPT_DEFAULT_ROUTER);
        assert_eq!(&bytes[2..4], &1800u16.to_be_bytes());
        assert_eq!(RaOptions::from_bytes(&bytes).unwrap(), opts);
    }

    #[test]
    fn test_iface_name_bounds() {
        assert!(RaIfaceRecord::new("", RaOptions::default()).is_err());
        assert!(RaIfaceRecord::new("sixteen-chars-xx", RaOptions::default()).is_err());

        let rec = RaIfaceRecord::new("fifteen-chars-x", RaOptions::default()).unwrap();
        let parsed = RaIfaceRecord::from_bytes(&rec.to_bytes()).unwrap();
        assert_eq!(parsed.name, "fifteen-chars-x");
    }

    #[test]
    fn test_unterminated_name_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[b'a'; IF_NAMESIZE]);
        RaOptions::default().put(&mut buf);
        assert!(matches!(RaIfaceRecord::from_bytes(&buf), Err(Error::Ipc(_))));
    }

    #[test]
    fn test_prefix_record() {
        let p = PrefixConf {
            prefix: "2001:db8::".parse().unwrap(),
            prefix_len: 64,
            valid_lifetime: 86400,
            preferred_lifetime: 14400,
            on_link: true,
            autonomous: false,
        };
        let bytes = p.to_bytes();
        assert_eq!(bytes[16], 64);
        assert_eq!(bytes[17], PREFIX_ONLINK);
        assert_eq!(PrefixConf::from_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn test_prefix_len_out_of_range() {
        let mut bytes = BytesMut::from(&PrefixConf::default().to_bytes()[..]);
        bytes[16] = 129;
        assert!(PrefixConf::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_send_ra_wrong_length() {
        let req = SendRa {
            if_index: 3,
            to: SocketAddrV6::new("ff02::1".parse().unwrap(), 0, 0, 3),
        };
        let bytes = req.to_bytes();
        assert_eq!(SendRa::from_bytes(&bytes).unwrap(), req);
        assert!(matches!(SendRa::from_bytes(&bytes[..31]), Err(Error::Ipc(_))));
    }

    #[test]
    fn test_ra_rs_carries_exact_payload() {
        let rec = RaRs {
            if_index: 2,
            from: SocketAddrV6::new("fe80::1".parse().unwrap(), 0, 0, 2),
            packet: Bytes::from_static(&[133, 0, 0, 0, 0, 0, 0, 0]),
        };
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len(), RaRs::SIZE);

        let parsed = RaRs::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.packet.len(), 8);
        assert_eq!(parsed, rec);
    }

    #[test]
    fn test_ra_rs_bad_inner_length() {
        let mut bytes = BytesMut::from(&RaRs {
            if_index: 1,
            from: SocketAddrV6::new(Ipv6Addr::LOCALHOST, 0, 0, 0),
            packet: Bytes::new(),
        }
        .to_bytes()[..]);
        bytes[32..36].copy_from_slice(&2000u32.to_be_bytes());
        assert!(RaRs::from_bytes(&bytes).is_err());
    }
}
