//! Peer registry: known peers keyed by name and by hardware address.

use std::collections::TryReserveError;
use std::fmt;

use crate::mac::MacAddress;
use crate::transport::Interface;

/// Registry-assigned peer identity. Never reused within one registry, so a
/// subscription bound to a removed peer cannot match its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    pub name: String,
    pub address: MacAddress,
    pub interface: Interface,
    pub channel: u8,
}

/// Known peers. Both `name` and `address` are unique across entries; callers
/// evict collisions (see [`PeerRegistry::collisions`]) before inserting.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Vec<PeerRecord>,
    next_id: u64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter()
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.id == id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.name == name)
    }

    pub fn get_by_address(&self, address: &MacAddress) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.address == *address)
    }

    /// Ids of every entry sharing `name` or `address`.
    pub fn collisions(&self, name: &str, address: &MacAddress) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|p| p.name == name || p.address == *address)
            .map(|p| p.id)
            .collect()
    }

    /// Insert a new record and return its id. Fails only when the backing
    /// storage cannot grow.
    pub fn insert(
        &mut self,
        name: &str,
        address: MacAddress,
        interface: Interface,
        channel: u8,
    ) -> Result<PeerId, TryReserveError> {
        self.peers.try_reserve(1)?;
        let id = PeerId(self.next_id);
        self.next_id += 1;
        self.peers.push(PeerRecord {
            id,
            name: name.to_owned(),
            address,
            interface,
            channel,
        });
        Ok(id)
    }

    pub fn remove(&mut self, id: PeerId) -> Option<PeerRecord> {
        let pos = self.peers.iter().position(|p| p.id == id)?;
        Some(self.peers.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x24, 0x0a, 0xc4, 0x00, 0x00, last])
    }

    #[test]
    fn insert_and_lookup() {
        let mut reg = PeerRegistry::new();
        let a = reg.insert("a", mac(1), Interface::Station, 1).unwrap();
        let b = reg.insert("b", mac(2), Interface::AccessPoint, 6).unwrap();
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get_by_name("b").unwrap().address, mac(2));
        assert_eq!(reg.get_by_address(&mac(1)).unwrap().name, "a");
        assert_eq!(reg.get(b).unwrap().channel, 6);
        assert!(reg.get_by_name("c").is_none());
        assert!(reg.get_by_address(&mac(3)).is_none());
    }

    #[test]
    fn collisions_match_either_key() {
        let mut reg = PeerRegistry::new();
        let a = reg.insert("a", mac(1), Interface::Station, 1).unwrap();
        let b = reg.insert("b", mac(2), Interface::Station, 1).unwrap();
        assert_eq!(reg.collisions("a", &mac(9)), vec![a]);
        assert_eq!(reg.collisions("z", &mac(2)), vec![b]);
        assert_eq!(reg.collisions("a", &mac(2)), vec![a, b]);
        assert!(reg.collisions("z", &mac(9)).is_empty());
    }

    #[test]
    fn ids_are_not_reused() {
        let mut reg = PeerRegistry::new();
        let a = reg.insert("a", mac(1), Interface::Station, 1).unwrap();
        assert_eq!(reg.remove(a).unwrap().name, "a");
        assert!(reg.remove(a).is_none());
        let again = reg.insert("a", mac(1), Interface::Station, 1).unwrap();
        assert_ne!(a, again);
        assert!(reg.get(a).is_none());
    }
}
