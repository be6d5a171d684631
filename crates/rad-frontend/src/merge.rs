use crate::mcast::{join_all_routers, leave_all_routers};
use crate::netif::{interface_prefixes, NetIf};
use crate::registry::{RaIface, Registry};
use crate::socket::RaSocket;
use rad_core::error::Result;
use rad_core::types::RadConf;
use tracing::{debug, info};

/// Bring the registry in line with `conf`.
///
/// Interfaces that keep their name and index keep their entry and their
/// group membership. New or re-indexed ones are (re)joined, vanished ones
/// left. Afterwards every entry's prefix list and cached RA are rebuilt.
pub fn merge_ra_interfaces<S: RaSocket, N: NetIf>(
    registry: &mut Registry,
    conf: &RadConf,
    sock: &S,
    netif: &N,
) -> Result<()> {
    registry.mark_all_removed();

    for iface_conf in &conf.interfaces {
        let name = iface_conf.name.as_str();
        let if_index = netif.name_to_index(name);

        if let Some(existing) = registry.find_by_name_mut(name) {
            match if_index {
                Some(idx) if idx == existing.if_index => {
                    debug!("keeping interface {name} ({idx})");
                    existing.removed = false;
                    continue;
                }
                Some(idx) => {
                    debug!("interface {name} moved from {} to {idx}", existing.if_index);
                    if let Some(old) = registry.remove_by_name(name) {
                        free_ra_iface(sock, old)?;
                    }
                }
                None => {
                    debug!("interface {name} is gone");
                    continue;
                }
            }
        }

        let Some(if_index) = if_index else {
            debug!("interface {name} not found, skipping");
            continue;
        };

        // Another name now owns this index
        if let Some(stale) = registry.remove_by_index(if_index) {
            debug!("index {if_index} now belongs to {name}, dropping {}", stale.name);
            free_ra_iface(sock, stale)?;
        }

        info!("adding interface {name} ({if_index})");
        let iface = RaIface::new(name, if_index);
        join_all_routers(sock, &iface)?;
        registry.insert(iface);
    }

    for iface in registry.take_removed() {
        free_ra_iface(sock, iface)?;
    }

    for iface in registry.iter_mut() {
        iface.clear_prefixes();

        let Some(iface_conf) = conf.find_iface(&iface.name) else {
            continue;
        };

        if let Some(rule) = &iface_conf.autoprefix {
            debug!("auto prefixes for {}", iface.name);
            for prefix in interface_prefixes(netif, &iface.name, rule)? {
                iface.add_prefix(prefix);
            }
        }

        debug!("static prefixes for {}", iface.name);
        for prefix in &iface_conf.prefixes {
            iface.add_prefix(*prefix);
        }

        if iface.build_package(&iface_conf.options)? {
            debug!("{}: RA rebuilt, {} bytes", iface.name, iface.packet().len());
        }
    }

    Ok(())
}

/// Drop an interface, leaving its group.
pub fn free_ra_iface<S: RaSocket>(sock: &S, iface: RaIface) -> Result<()> {
    info!("removing interface {} ({})", iface.name, iface.if_index);
    leave_all_routers(sock, &iface)
}
