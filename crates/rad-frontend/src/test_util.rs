use crate::netif::{IfAddr6, NetIf};
use crate::socket::{RaSocket, Received};
use async_trait::async_trait;
use rad_core::error::Result;
use rad_core::types::{mask_prefix, ALL_ROUTERS};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::OwnedFd;
use std::sync::Mutex;

#[derive(Debug, Default, Clone)]
pub struct FakeNetIf {
    indexes: HashMap<String, u32>,
    addrs: HashMap<String, Vec<IfAddr6>>,
}

impl FakeNetIf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_iface(mut self, name: &str, if_index: u32) -> Self {
        self.indexes.insert(name.to_string(), if_index);
        self
    }

    pub fn with_addr(mut self, name: &str, addr: &str, prefix_len: u8) -> Self {
        self.addrs.entry(name.to_string()).or_default().push(IfAddr6 {
            addr: addr.parse().unwrap(),
            netmask: mask_prefix(Ipv6Addr::from(u128::MAX), prefix_len),
        });
        self
    }

    pub fn with_netmask(mut self, name: &str, addr: &str, netmask: &str) -> Self {
        self.addrs.entry(name.to_string()).or_default().push(IfAddr6 {
            addr: addr.parse().unwrap(),
            netmask: netmask.parse().unwrap(),
        });
        self
    }

    pub fn remove_iface(&mut self, name: &str) {
        self.indexes.remove(name);
        self.addrs.remove(name);
    }

    pub fn set_index(&mut self, name: &str, if_index: u32) {
        self.indexes.insert(name.to_string(), if_index);
    }
}

impl NetIf for FakeNetIf {
    fn name_to_index(&self, name: &str) -> Option<u32> {
        self.indexes.get(name).copied()
    }

    fn addresses(&self, name: &str) -> Result<Vec<IfAddr6>> {
        Ok(self.addrs.get(name).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockCall {
    Join(u32),
    Leave(u32),
    Send {
        if_index: u32,
        to: SocketAddrV6,
        hop_limit: i32,
        packet: Vec<u8>,
    },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<SockCall>,
    groups: BTreeSet<u32>,
    fail_next: Option<i32>,
}

/// Records every call and tracks memberships like the kernel would.
#[derive(Default)]
pub struct FakeSocket {
    state: Mutex<FakeState>,
}

impl FakeSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn is_member(&self, if_index: u32) -> bool {
        self.state.lock().unwrap().groups.contains(&if_index)
    }

    pub fn members(&self) -> Vec<u32> {
        self.state.lock().unwrap().groups.iter().copied().collect()
    }

    /// Make the next socket call fail with `errno`.
    pub fn fail_next(&self, errno: i32) {
        self.state.lock().unwrap().fail_next = Some(errno);
    }

    pub fn sends(&self) -> Vec<SockCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SockCall::Send { .. }))
            .collect()
    }
}

#[async_trait]
impl RaSocket for FakeSocket {
    fn from_fd(_fd: OwnedFd) -> io::Result<Self> {
        Ok(Self::new())
    }

    fn join_group(&self, group: &Ipv6Addr, if_index: u32) -> io::Result<()> {
        assert_eq!(*group, ALL_ROUTERS);
        let mut st = self.state.lock().unwrap();
        st.calls.push(SockCall::Join(if_index));
        if let Some(errno) = st.fail_next.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if !st.groups.insert(if_index) {
            return Err(io::Error::from_raw_os_error(libc::EADDRINUSE));
        }
        Ok(())
    }

    fn leave_group(&self, group: &Ipv6Addr, if_index: u32) -> io::Result<()> {
        assert_eq!(*group, ALL_ROUTERS);
        let mut st = self.state.lock().unwrap();
        st.calls.push(SockCall::Leave(if_index));
        if let Some(errno) = st.fail_next.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if !st.groups.remove(&if_index) {
            return Err(io::Error::from_raw_os_error(libc::EADDRNOTAVAIL));
        }
        Ok(())
    }

    fn send_to(
        &self,
        packet: &[u8],
        to: &SocketAddrV6,
        if_index: u32,
        hop_limit: i32,
    ) -> io::Result<usize> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(SockCall::Send {
            if_index,
            to: *to,
            hop_limit,
            packet: packet.to_vec(),
        });
        if let Some(errno) = st.fail_next.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        Ok(packet.len())
    }

    async fn recv(&self, _buf: &mut [u8]) -> io::Result<Received> {
        std::future::pending().await
    }
}
