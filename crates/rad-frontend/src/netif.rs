use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;
use rad_core::error::{Error, Result};
use rad_core::types::{mask_prefix, PrefixConf};
use std::net::Ipv6Addr;
use tracing::debug;

/// An IPv6 address configured on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfAddr6 {
    pub addr: Ipv6Addr,
    pub netmask: Ipv6Addr,
}

/// The host's view of its network interfaces.
pub trait NetIf {
    /// `None` if no interface has that name.
    fn name_to_index(&self, name: &str) -> Option<u32>;

    /// IPv6 addresses of `name`, in system order.
    fn addresses(&self, name: &str) -> Result<Vec<IfAddr6>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetIf;

impl NetIf for SystemNetIf {
    fn name_to_index(&self, name: &str) -> Option<u32> {
        match if_nametoindex(name) {
            Ok(0) | Err(_) => None,
            Ok(idx) => Some(idx),
        }
    }

    fn addresses(&self, name: &str) -> Result<Vec<IfAddr6>> {
        let addrs = getifaddrs().map_err(|e| Error::Interface(format!("getifaddrs: {e}")))?;

        let mut out = Vec::new();
        for ifa in addrs.filter(|ifa| ifa.interface_name == name) {
            let Some(addr) = ifa.address.as_ref().and_then(|a| a.as_sockaddr_in6()) else {
                continue;
            };
            let Some(mask) = ifa.netmask.as_ref().and_then(|m| m.as_sockaddr_in6()) else {
                debug!("{name}: {} has no netmask", addr.ip());
                continue;
            };
            out.push(IfAddr6 {
                addr: addr.ip(),
                netmask: mask.ip(),
            });
        }
        Ok(out)
    }
}

/// Prefix length of a netmask: the number of leading one bits, or 0 if the
/// ones are not contiguous.
pub fn mask_to_prefix_len(mask: &Ipv6Addr) -> u8 {
    let bits = u128::from(*mask);
    let ones = bits.leading_ones();
    if ones < 128 && bits << ones != 0 {
        return 0;
    }
    ones as u8
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

/// Prefixes derived from the addresses of `name`, parameterized by `rule`.
///
/// Link-local addresses and /128s are skipped.
pub fn interface_prefixes<N: NetIf>(
    netif: &N,
    name: &str,
    rule: &PrefixConf,
) -> Result<Vec<PrefixConf>> {
    let mut out = Vec::new();
    for ifa in netif.addresses(name)? {
        if is_link_local(&ifa.addr) {
            continue;
        }
        let len = mask_to_prefix_len(&ifa.netmask);
        match len {
            0 => {
                debug!("{name}: skipping {} (netmask {})", ifa.addr, ifa.netmask);
                continue;
            }
            128 => {
                debug!("{name}: skipping {} (/128)", ifa.addr);
                continue;
            }
            _ => {}
        }
        out.push(rule.with_prefix(mask_prefix(ifa.addr, len), len));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeNetIf;

    fn mask(len: u8) -> Ipv6Addr {
        mask_prefix(Ipv6Addr::from(u128::MAX), len)
    }

    #[test]
    fn test_mask_to_prefix_len() {
        assert_eq!(mask_to_prefix_len(&mask(64)), 64);
        assert_eq!(mask_to_prefix_len(&mask(48)), 48);
        assert_eq!(mask_to_prefix_len(&mask(127)), 127);
        assert_eq!(mask_to_prefix_len(&mask(128)), 128);
        assert_eq!(mask_to_prefix_len(&Ipv6Addr::UNSPECIFIED), 0);

        let holey: Ipv6Addr = "ffff:ffff:0:ffff::".parse().unwrap();
        assert_eq!(mask_to_prefix_len(&holey), 0);
    }

    #[test]
    fn test_interface_prefixes_filters() {
        let netif = FakeNetIf::new()
            .with_iface("net0", 2)
            .with_addr("net0", "fe80::1", 64)
            .with_addr("net0", "2001:db8:1::10", 64)
            .with_addr("net0", "2001:db8:2::1", 128)
            .with_addr("net0", "2001:db8:3:4::5", 56);

        let rule = PrefixConf::rule(7200, 3600);
        let got = interface_prefixes(&netif, "net0", &rule).unwrap();
        assert_eq!(got.len(), 2);

        assert_eq!(got[0].prefix, "2001:db8:1::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(got[0].prefix_len, 64);
        assert_eq!(got[0].valid_lifetime, 7200);
        assert_eq!(got[0].preferred_lifetime, 3600);

        assert_eq!(got[1].prefix, "2001:db8:3::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(got[1].prefix_len, 56);
    }

    #[test]
    fn test_interface_prefixes_skips_holey_mask() {
        let netif = FakeNetIf::new()
            .with_iface("net0", 2)
            .with_netmask("net0", "2001:db8:5::1", "ffff:ffff:0:ffff::")
            .with_addr("net0", "2001:db8:6::1", 64);

        let got = interface_prefixes(&netif, "net0", &PrefixConf::default()).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].prefix, "2001:db8:6::".parse::<Ipv6Addr>().unwrap());
        assert!(got.iter().all(|p| p.prefix_len != 0));
    }

    #[test]
    fn test_interface_prefixes_unknown_iface() {
        let netif = FakeNetIf::new();
        let got = interface_prefixes(&netif, "net9", &PrefixConf::default()).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_loopback_resolves() {
        // Present on any Linux host, even inside a network namespace
        assert!(SystemNetIf.name_to_index("lo").is_some());
        assert!(SystemNetIf.name_to_index("nosuchif0").is_none());
    }
}
