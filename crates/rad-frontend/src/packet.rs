//! Router Advertisement wire format (RFC 4861 §4.2 and §4.6.2).

use bytes::BufMut;
use rad_core::error::{Error, Result};
use rad_core::types::{PrefixConf, RaOptions, MAX_PACKET_SIZE};

pub const ND_ROUTER_SOLICIT: u8 = 133;
pub const ND_ROUTER_ADVERT: u8 = 134;
pub const ND_OPT_PREFIX_INFORMATION: u8 = 3;

pub const RA_HEADER_SIZE: usize = 16;
pub const PREFIX_OPT_SIZE: usize = 32;

const RA_FLAG_MANAGED: u8 = 0x80;
const RA_FLAG_OTHER: u8 = 0x40;

const PREFIX_FLAG_ONLINK: u8 = 0x80;
const PREFIX_FLAG_AUTO: u8 = 0x40;

/// Size of an RA carrying `prefix_count` prefix options.
pub fn ra_len(prefix_count: usize) -> usize {
    RA_HEADER_SIZE + prefix_count * PREFIX_OPT_SIZE
}

/// Serialize an RA for `iface`. Checksum is left zero for the kernel.
pub fn build_ra(iface: &str, options: &RaOptions, prefixes: &[PrefixConf]) -> Result<Vec<u8>> {
    let len = ra_len(prefixes.len());
    if len > MAX_PACKET_SIZE {
        return Err(Error::PacketTooBig {
            iface: iface.to_string(),
            len,
            max: MAX_PACKET_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(len);
    put_header(&mut buf, options);
    for p in prefixes {
        put_prefix(&mut buf, p);
    }
    debug_assert_eq!(buf.len(), len);
    Ok(buf)
}

fn put_header(buf: &mut Vec<u8>, options: &RaOptions) {
    let mut flags = 0;
    if options.managed {
        flags |= RA_FLAG_MANAGED;
    }
    if options.other {
        flags |= RA_FLAG_OTHER;
    }
    let lifetime = if options.default_router {
        options.router_lifetime
    } else {
        0
    };

    buf.put_u8(ND_ROUTER_ADVERT);
    buf.put_u8(0); // code
    buf.put_u16(0); // checksum
    buf.put_u8(options.cur_hop_limit);
    buf.put_u8(flags);
    buf.put_u16(lifetime);
    buf.put_u32(options.reachable_time);
    buf.put_u32(options.retrans_timer);
}

fn put_prefix(buf: &mut Vec<u8>, p: &PrefixConf) {
    let mut flags = 0;
    if p.on_link {
        flags |= PREFIX_FLAG_ONLINK;
    }
    if p.autonomous {
        flags |= PREFIX_FLAG_AUTO;
    }

    buf.put_u8(ND_OPT_PREFIX_INFORMATION);
    buf.put_u8((PREFIX_OPT_SIZE / 8) as u8);
    buf.put_u8(p.prefix_len);
    buf.put_u8(flags);
    buf.put_u32(p.valid_lifetime);
    buf.put_u32(p.preferred_lifetime);
    buf.put_u32(0); // reserved
    buf.put_slice(&p.prefix.octets());
}
