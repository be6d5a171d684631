use std::net::Ipv6Addr;

/// Interface names are bounded like the kernel's `IF_NAMESIZE`, terminator included.
pub const IF_NAMESIZE: usize = 16;

/// Largest RA we build and largest datagram we accept.
pub const MAX_PACKET_SIZE: usize = 1500;

/// ff02::2
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

/// ff02::1
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

pub const DEFAULT_CUR_HOP_LIMIT: u8 = 64;
pub const DEFAULT_ROUTER_LIFETIME: u16 = 1800;
pub const DEFAULT_VALID_LIFETIME: u32 = 2_592_000;
pub const DEFAULT_PREFERRED_LIFETIME: u32 = 604_800;

/// Router flags and timers advertised in the RA header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaOptions {
    pub cur_hop_limit: u8,
    pub managed: bool,
    pub other: bool,
    /// When false the router lifetime field is sent as zero.
    pub default_router: bool,
    pub router_lifetime: u16,
    pub reachable_time: u32,
    pub retrans_timer: u32,
}

impl Default for RaOptions {
    fn default() -> Self {
        Self {
            cur_hop_limit: DEFAULT_CUR_HOP_LIMIT,
            managed: false,
            other: false,
            default_router: true,
            router_lifetime: DEFAULT_ROUTER_LIFETIME,
            reachable_time: 0,
            retrans_timer: 0,
        }
    }
}

/// One prefix with its advertisement parameters.
///
/// Also used as the auto-prefix rule of an interface, in which case
/// `prefix`/`prefix_len` are unused and only the lifetimes and flags are
/// copied onto each derived prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixConf {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub on_link: bool,
    pub autonomous: bool,
}

impl PrefixConf {
    pub fn rule(valid_lifetime: u32, preferred_lifetime: u32) -> Self {
        Self {
            prefix: Ipv6Addr::UNSPECIFIED,
            prefix_len: 0,
            valid_lifetime,
            preferred_lifetime,
            on_link: true,
            autonomous: true,
        }
    }

    /// Same parameters, different network.
    pub fn with_prefix(&self, prefix: Ipv6Addr, prefix_len: u8) -> Self {
        Self {
            prefix,
            prefix_len,
            ..*self
        }
    }
}

impl Default for PrefixConf {
    fn default() -> Self {
        Self::rule(DEFAULT_VALID_LIFETIME, DEFAULT_PREFERRED_LIFETIME)
    }
}

/// Configuration of one advertising interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceConf {
    pub name: String,
    pub options: RaOptions,
    pub autoprefix: Option<PrefixConf>,
    pub prefixes: Vec<PrefixConf>,
}

impl IfaceConf {
    pub fn new(name: &str, options: RaOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            autoprefix: None,
            prefixes: Vec::new(),
        }
    }
}

/// A complete configuration as seen by the front-end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadConf {
    pub options: RaOptions,
    pub interfaces: Vec<IfaceConf>,
}

impl RadConf {
    pub fn find_iface(&self, name: &str) -> Option<&IfaceConf> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

/// Clear every bit of `addr` past `prefix_len`.
pub fn mask_prefix(addr: Ipv6Addr, prefix_len: u8) -> Ipv6Addr {
    let bits = u128::from(addr);
    let mask = match prefix_len {
        0 => 0,
        len if len >= 128 => u128::MAX,
        len => u128::MAX << (128 - u32::from(len)),
    };
    Ipv6Addr::from(bits & mask)
}
