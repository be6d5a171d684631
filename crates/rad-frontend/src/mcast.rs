//! All-routers group membership, one per advertising interface.
//!
//! Both operations are idempotent: asking for a membership we already hold,
//! or dropping one the kernel already forgot, succeeds quietly. Anything
//! else is fatal.

use crate::registry::RaIface;
use crate::socket::RaSocket;
use rad_core::error::{Error, Result};
use rad_core::types::ALL_ROUTERS;
use std::io;
use tracing::debug;

pub fn join_all_routers<S: RaSocket>(sock: &S, iface: &RaIface) -> Result<()> {
    debug!("joining {ALL_ROUTERS} on {} ({})", iface.name, iface.if_index);
    match sock.join_group(&ALL_ROUTERS, iface.if_index) {
        Ok(()) => Ok(()),
        Err(e) if already_joined(&e) => {
            debug!("{}: already a member of {ALL_ROUTERS}", iface.name);
            Ok(())
        }
        Err(source) => Err(Error::Multicast {
            op: "IPV6_JOIN_GROUP",
            iface: iface.name.clone(),
            source,
        }),
    }
}

pub fn leave_all_routers<S: RaSocket>(sock: &S, iface: &RaIface) -> Result<()> {
    debug!("leaving {ALL_ROUTERS} on {} ({})", iface.name, iface.if_index);
    match sock.leave_group(&ALL_ROUTERS, iface.if_index) {
        Ok(()) => Ok(()),
        Err(e) if not_joined(&e) => {
            debug!("{}: membership already gone", iface.name);
            Ok(())
        }
        Err(source) => Err(Error::Multicast {
            op: "IPV6_LEAVE_GROUP",
            iface: iface.name.clone(),
            source,
        }),
    }
}

fn already_joined(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EADDRINUSE)
}

// The interface may have disappeared together with its memberships.
fn not_joined(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EADDRNOTAVAIL) | Some(libc::ENODEV) | Some(libc::ENXIO)
    )
}
