//! Subscription tables: receive and send callbacks, bound to a peer or to an address category.

use std::collections::{TryReserveError, VecDeque};
use std::sync::Arc;

use crate::mac::MacAddress;
use crate::peer::{PeerId, PeerRecord};

/// Called with the sending peer and the payload.
pub type PeerReceiveFn = dyn Fn(&PeerRecord, &[u8]) + Send + Sync;
/// Called with the sender address and the payload.
pub type AddressReceiveFn = dyn Fn(&MacAddress, &[u8]) + Send + Sync;
/// Called with the destination peer and whether delivery succeeded.
pub type PeerSendFn = dyn Fn(&PeerRecord, bool) + Send + Sync;
/// Called with the destination address and whether delivery succeeded.
pub type AddressSendFn = dyn Fn(&MacAddress, bool) + Send + Sync;

/// Which events an address-bound subscription matches.
///
/// `BroadcastOnly` means "sender is not a registered peer" on the receive path
/// and "destination is the all-ones address" on the send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    ExactAddress(MacAddress),
    BroadcastOnly,
    AnyKnownPeer,
    Everything,
}

impl Category {
    /// Receive-side test. `known` is whether the sender resolved to a registered peer.
    pub fn matches_receive(&self, from: &MacAddress, known: bool) -> bool {
        match self {
            Category::Everything => true,
            Category::AnyKnownPeer => known,
            Category::BroadcastOnly => !known,
            Category::ExactAddress(addr) => addr == from,
        }
    }

    /// Send-side test. `known` is whether the destination resolved to a registered peer.
    pub fn matches_send(&self, to: &MacAddress, known: bool) -> bool {
        match self {
            Category::Everything => true,
            Category::BroadcastOnly => to.is_broadcast(),
            Category::AnyKnownPeer => known,
            Category::ExactAddress(addr) => addr == to,
        }
    }
}

/// Key of a peer-bound subscription: the peer id it was registered against and
/// the peer's name at that time (used for unregistering).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBinding {
    pub peer: PeerId,
    pub name: String,
}

/// Ordered list of `(key, callback)` entries, most recently registered first.
pub struct SubscriptionTable<K, F: ?Sized> {
    entries: VecDeque<(K, Arc<F>)>,
}

impl<K, F: ?Sized> SubscriptionTable<K, F> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry at the front. Duplicates are kept.
    pub fn register(&mut self, key: K, callback: Arc<F>) -> Result<(), TryReserveError> {
        self.entries.try_reserve(1)?;
        self.entries.push_front((key, callback));
        Ok(())
    }

    /// Remove the first entry whose callback is `callback` (same allocation)
    /// and whose key satisfies `key_matches`. Returns whether one was removed.
    pub fn unregister(&mut self, callback: &Arc<F>, key_matches: impl Fn(&K) -> bool) -> bool {
        let pos = self
            .entries
            .iter()
            .position(|(k, cb)| same_callback(cb, callback) && key_matches(k));
        match pos {
            Some(i) => self.entries.remove(i).is_some(),
            None => false,
        }
    }

    /// Entries in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Arc<F>)> {
        self.entries.iter().map(|(k, cb)| (k, cb))
    }
}

impl<K, F: ?Sized> Default for SubscriptionTable<K, F> {
    fn default() -> Self {
        Self::new()
    }
}

fn same_callback<F: ?Sized>(a: &Arc<F>, b: &Arc<F>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// The four independent tables.
#[derive(Default)]
pub struct Subscriptions {
    pub receive_by_peer: SubscriptionTable<PeerBinding, PeerReceiveFn>,
    pub receive_by_address: SubscriptionTable<Category, AddressReceiveFn>,
    pub send_by_peer: SubscriptionTable<PeerBinding, PeerSendFn>,
    pub send_by_address: SubscriptionTable<Category, AddressSendFn>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    fn noop() -> Arc<AddressSendFn> {
        Arc::new(|_: &MacAddress, _: bool| {})
    }

    #[test]
    fn register_puts_newest_first() {
        let mut table: SubscriptionTable<u32, AddressSendFn> = SubscriptionTable::new();
        table.register(1, noop()).unwrap();
        table.register(2, noop()).unwrap();
        table.register(3, noop()).unwrap();
        let keys: Vec<u32> = table.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![3, 2, 1]);
    }

    #[test]
    fn unregister_removes_one_duplicate() {
        let mut table: SubscriptionTable<Category, AddressSendFn> = SubscriptionTable::new();
        let cb = noop();
        table.register(Category::Everything, cb.clone()).unwrap();
        table.register(Category::Everything, cb.clone()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.unregister(&cb, |k| *k == Category::Everything));
        assert_eq!(table.len(), 1);
        assert!(table.unregister(&cb, |k| *k == Category::Everything));
        assert!(table.is_empty());
        assert!(!table.unregister(&cb, |k| *k == Category::Everything));
    }

    #[test]
    fn unregister_requires_same_callback_and_key() {
        let mut table: SubscriptionTable<Category, AddressSendFn> = SubscriptionTable::new();
        let cb = noop();
        let other = noop();
        table
            .register(Category::ExactAddress(mac(1)), cb.clone())
            .unwrap();
        assert!(!table.unregister(&other, |k| *k == Category::ExactAddress(mac(1))));
        assert!(!table.unregister(&cb, |k| *k == Category::ExactAddress(mac(2))));
        assert!(!table.unregister(&cb, |k| *k == Category::Everything));
        assert!(table.unregister(&cb, |k| *k == Category::ExactAddress(mac(1))));
    }

    #[test]
    fn receive_categories() {
        let from = mac(1);
        assert!(Category::Everything.matches_receive(&from, false));
        assert!(Category::AnyKnownPeer.matches_receive(&from, true));
        assert!(!Category::AnyKnownPeer.matches_receive(&from, false));
        assert!(Category::BroadcastOnly.matches_receive(&from, false));
        assert!(!Category::BroadcastOnly.matches_receive(&from, true));
        assert!(Category::ExactAddress(mac(1)).matches_receive(&from, true));
        assert!(!Category::ExactAddress(mac(2)).matches_receive(&from, false));
    }

    #[test]
    fn send_broadcast_category_uses_destination() {
        assert!(Category::BroadcastOnly.matches_send(&MacAddress::BROADCAST, false));
        assert!(!Category::BroadcastOnly.matches_send(&mac(1), false));
        assert!(!Category::BroadcastOnly.matches_send(&mac(1), true));
        assert!(Category::AnyKnownPeer.matches_send(&mac(1), true));
        assert!(!Category::AnyKnownPeer.matches_send(&MacAddress::BROADCAST, false));
    }
}
