use crate::registry::RaIface;
use crate::socket::RaSocket;
use crate::validate::ND_HOP_LIMIT;
use std::net::SocketAddrV6;
use tracing::{debug, warn};

/// Send the interface's cached RA to `to`. Failures are logged, never fatal.
pub fn ra_output<S: RaSocket>(sock: &S, iface: &RaIface, to: &SocketAddrV6) {
    let packet = iface.packet();
    match sock.send_to(packet, to, iface.if_index, ND_HOP_LIMIT) {
        Ok(n) if n != packet.len() => {
            warn!("{}: short send to {} ({n} of {} bytes)", iface.name, to.ip(), packet.len())
        }
        Ok(_) => debug!("{}: sent RA to {}", iface.name, to.ip()),
        Err(e) => warn!("{}: sendmsg to {}: {e}", iface.name, to.ip()),
    }
}
