//! The RA daemon front-end: interface registry, RA construction, inbound
//! validation and the raw ICMPv6 socket.

pub mod frontend;
pub mod mcast;
pub mod merge;
pub mod netif;
pub mod output;
pub mod packet;
pub mod registry;
pub mod socket;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_util;

pub use frontend::Frontend;
pub use socket::{open_icmp6_socket, Icmp6Socket, RaSocket};
