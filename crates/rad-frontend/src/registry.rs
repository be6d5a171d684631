use crate::packet::build_ra;
use rad_core::error::Result;
use rad_core::types::{PrefixConf, RaOptions};
use std::net::Ipv6Addr;
use tracing::debug;

/// An interface we advertise on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaIface {
    pub name: String,
    pub if_index: u32,
    /// Advertisement order.
    prefixes: Vec<PrefixConf>,
    /// Serialized RA, ready to send.
    packet: Vec<u8>,
    /// Only meaningful while a merge is running.
    pub(crate) removed: bool,
}

impl RaIface {
    pub fn new(name: &str, if_index: u32) -> Self {
        Self {
            name: name.to_string(),
            if_index,
            prefixes: Vec::new(),
            packet: Vec::new(),
            removed: false,
        }
    }

    pub fn prefixes(&self) -> &[PrefixConf] {
        &self.prefixes
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    pub fn packet(&self) -> &[u8] {
        &self.packet
    }

    pub fn find_prefix(&self, prefix: &Ipv6Addr, prefix_len: u8) -> Option<&PrefixConf> {
        self.prefixes
            .iter()
            .find(|p| p.prefix_len == prefix_len && p.prefix == *prefix)
    }

    /// Append a prefix unless the same network is already advertised.
    /// Returns whether it was added.
    pub fn add_prefix(&mut self, conf: PrefixConf) -> bool {
        if self.find_prefix(&conf.prefix, conf.prefix_len).is_some() {
            debug!(
                "ignoring duplicate {}/{} prefix on {}",
                conf.prefix, conf.prefix_len, self.name
            );
            return false;
        }
        debug!("adding {}/{} prefix on {}", conf.prefix, conf.prefix_len, self.name);
        self.prefixes.push(conf);
        true
    }

    pub fn clear_prefixes(&mut self) {
        self.prefixes.clear();
    }

    /// Rebuild the cached RA. Returns whether the bytes changed.
    pub fn build_package(&mut self, options: &RaOptions) -> Result<bool> {
        let packet = build_ra(&self.name, options, &self.prefixes)?;
        if packet == self.packet {
            return Ok(false);
        }
        self.packet = packet;
        Ok(true)
    }
}

/// All advertising interfaces, in the order they were added.
#[derive(Debug, Default)]
pub struct Registry {
    ifaces: Vec<RaIface>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ifaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ifaces.is_empty()
    }

    pub fn find_by_index(&self, if_index: u32) -> Option<&RaIface> {
        self.ifaces.iter().find(|i| i.if_index == if_index)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&RaIface> {
        self.ifaces.iter().find(|i| i.name == name)
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut RaIface> {
        self.ifaces.iter_mut().find(|i| i.name == name)
    }

    pub fn insert(&mut self, iface: RaIface) {
        self.ifaces.push(iface);
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<RaIface> {
        let pos = self.ifaces.iter().position(|i| i.name == name)?;
        Some(self.ifaces.remove(pos))
    }

    pub fn remove_by_index(&mut self, if_index: u32) -> Option<RaIface> {
        let pos = self.ifaces.iter().position(|i| i.if_index == if_index)?;
        Some(self.ifaces.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RaIface> {
        self.ifaces.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RaIface> {
        self.ifaces.iter_mut()
    }

    pub fn mark_all_removed(&mut self) {
        for iface in &mut self.ifaces {
            iface.removed = true;
        }
    }

    /// Split off every entry still marked as removed; the rest keep their order.
    pub fn take_removed(&mut self) -> Vec<RaIface> {
        let (removed, kept) = std::mem::take(&mut self.ifaces)
            .into_iter()
            .partition(|i| i.removed);
        self.ifaces = kept;
        removed
    }

    /// Empty the registry, e.g. on shutdown.
    pub fn drain(&mut self) -> Vec<RaIface> {
        std::mem::take(&mut self.ifaces)
    }
}
