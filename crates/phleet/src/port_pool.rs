//! Per-host port inventory.

use std::collections::{BTreeSet, VecDeque};
use syzygy_api::Port;

/// The contiguous port block configured for one host, and what has
/// become of each port in it.
///
/// Every port lives in at most one of `available`, `temporary` and `used`,
/// and nothing outside `[first_port, first_port + block_size)` is ever
/// handed out. Ports that fall outside the block after a resize are
/// dropped when they come back instead of being made available again.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputerPortPool {
    host: String,
    networks: Vec<String>,
    addresses: Vec<String>,
    first_port: Port,
    block_size: u16,
    available: VecDeque<Port>,
    temporary: BTreeSet<Port>,
    used: BTreeSet<Port>,
}

/// Iterate the ports of a block, clipped at the top of the port range.
fn block(first_port: Port, block_size: u16) -> impl Iterator<Item = Port> {
    let first = u32::from(first_port);
    let end = (first + u32::from(block_size)).min(u32::from(Port::MAX) + 1);
    (first..end).map(|p| p as Port)
}

impl ComputerPortPool {
    /// A fresh pool with every port of the block available.
    pub fn new(
        host: impl Into<String>,
        networks: Vec<String>,
        addresses: Vec<String>,
        first_port: Port,
        block_size: u16,
    ) -> Self {
        Self {
            host: host.into(),
            networks,
            addresses,
            first_port,
            block_size,
            available: block(first_port, block_size).collect(),
            temporary: BTreeSet::new(),
            used: BTreeSet::new(),
        }
    }

    /// Switch to a new port block. Returns false if the block was
    /// already configured this way.
    ///
    /// The available list is rebuilt from the new block. Temporary and
    /// used ports are left alone until they are released.
    pub fn resize(&mut self, first_port: Port, block_size: u16) -> bool {
        if self.first_port == first_port && self.block_size == block_size {
            return false;
        }

        self.available = block(first_port, block_size)
            .filter(|p| !self.temporary.contains(p) && !self.used.contains(p))
            .collect();
        self.first_port = first_port;
        self.block_size = block_size;
        true
    }

    /// Is `port` inside the current block?
    pub fn contains(&self, port: Port) -> bool {
        let port = u32::from(port);
        let first = u32::from(self.first_port);
        port >= first && port < first + u32::from(self.block_size)
    }

    /// Take `count` ports from the front of the available list and mark
    /// them temporary. Takes nothing if fewer than `count` are available.
    pub fn allocate(&mut self, count: usize) -> Option<Vec<Port>> {
        if self.available.len() < count {
            return None;
        }

        let ports: Vec<Port> = self.available.drain(..count).collect();
        self.temporary.extend(ports.iter().copied());
        Some(ports)
    }

    /// Promote temporary ports to used.
    pub fn confirm(&mut self, ports: &[Port]) {
        for port in ports {
            if self.temporary.remove(port) {
                self.used.insert(*port);
            }
        }
    }

    /// Return temporary ports to the back of the available list.
    pub fn release_temporary(&mut self, ports: &[Port]) {
        for port in ports {
            if self.temporary.remove(port) && self.contains(*port) {
                self.available.push_back(*port);
            }
        }
    }

    /// Return used ports to the back of the available list.
    pub fn release_used(&mut self, ports: &[Port]) {
        for port in ports {
            if self.used.remove(port) && self.contains(*port) {
                self.available.push_back(*port);
            }
        }
    }

    /// The host this pool belongs to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Networks the host was first registered with.
    pub fn networks(&self) -> &[String] {
        &self.networks
    }

    /// Addresses the host was first registered with.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// First port of the current block.
    pub fn first_port(&self) -> Port {
        self.first_port
    }

    /// Size of the current block.
    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    /// Ports that can be handed out, in hand-out order.
    pub fn available(&self) -> &VecDeque<Port> {
        &self.available
    }

    /// Ports handed out but not yet confirmed.
    pub fn temporary(&self) -> &BTreeSet<Port> {
        &self.temporary
    }

    /// Ports bound by a confirmed service.
    pub fn used(&self) -> &BTreeSet<Port> {
        &self.used
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pool() -> ComputerPortPool {
        ComputerPortPool::new(
            "h",
            vec!["net1".into()],
            vec!["10.0.0.1".into()],
            5000,
            4,
        )
    }

    #[test]
    fn allocate_is_fifo_and_all_or_nothing() {
        let mut p = pool();
        assert_eq!(Some(vec![5000, 5001]), p.allocate(2));
        assert_eq!(None, p.allocate(3));
        assert_eq!(&VecDeque::from([5002, 5003]), p.available());
        assert_eq!(2, p.temporary().len());
    }

    #[test]
    fn release_goes_to_back_of_list() {
        let mut p = pool();
        let ports = p.allocate(1).unwrap();
        p.release_temporary(&ports);
        assert_eq!(&VecDeque::from([5001, 5002, 5003, 5000]), p.available());
        assert!(p.temporary().is_empty());
    }

    #[test]
    fn double_release_does_not_duplicate() {
        let mut p = pool();
        let ports = p.allocate(2).unwrap();
        p.confirm(&ports);
        p.release_used(&ports);
        p.release_used(&ports);
        p.release_temporary(&ports);
        assert_eq!(4, p.available().len());
    }

    #[test]
    fn resize_keeps_held_ports_and_drops_them_later() {
        let mut p = pool();
        let held = p.allocate(2).unwrap();
        p.confirm(&held[..1]);

        assert!(!p.resize(5000, 4));
        assert!(p.resize(5001, 3));

        // 5001 is still temporary, so only 5002 and 5003 are available
        assert_eq!(&VecDeque::from([5002, 5003]), p.available());

        p.release_used(&held[..1]);
        p.release_temporary(&held[1..]);

        // 5000 is outside the new block and is discarded
        assert_eq!(&VecDeque::from([5002, 5003, 5001]), p.available());
        assert!(p.used().is_empty());
        assert!(p.temporary().is_empty());
    }

    #[test]
    fn block_clips_at_top_of_port_range() {
        let p = ComputerPortPool::new("h", vec![], vec![], 65534, 10);
        assert_eq!(2, p.available().len());
        assert!(p.contains(65535));
        assert!(!p.contains(65533));
    }
}
