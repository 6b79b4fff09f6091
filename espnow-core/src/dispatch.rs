//! Fan-out of radio events to subscribers.
//!
//! Peer-bound subscriptions run first, then address-bound ones, each table in
//! its own order (most recently registered first).

use crate::mac::MacAddress;
use crate::peer::PeerRegistry;
use crate::subscription::Subscriptions;

/// Deliver a received datagram. Returns the number of callbacks invoked.
///
/// Peer-bound entries fire only for the peer the frame came from; entries left
/// behind by a removed peer never match again.
pub fn dispatch_receive(
    peers: &PeerRegistry,
    subs: &Subscriptions,
    from: &MacAddress,
    payload: &[u8],
) -> usize {
    let peer = peers.get_by_address(from);
    let mut invoked = 0;

    if let Some(peer) = peer {
        for (binding, cb) in subs.receive_by_peer.iter() {
            if binding.peer == peer.id {
                cb(peer, payload);
                invoked += 1;
            }
        }
    }

    let known = peer.is_some();
    for (category, cb) in subs.receive_by_address.iter() {
        if category.matches_receive(from, known) {
            cb(from, payload);
            invoked += 1;
        }
    }
    invoked
}

/// Deliver a transmit outcome. Returns the number of callbacks invoked.
///
/// Unlike the receive path, every peer-bound send subscription fires when the
/// destination is a registered peer, whichever peer it was registered for.
pub fn dispatch_send_result(
    peers: &PeerRegistry,
    subs: &Subscriptions,
    to: &MacAddress,
    success: bool,
) -> usize {
    let peer = peers.get_by_address(to);
    let mut invoked = 0;

    if let Some(peer) = peer {
        for (_, cb) in subs.send_by_peer.iter() {
            cb(peer, success);
            invoked += 1;
        }
    }

    let known = peer.is_some();
    for (category, cb) in subs.send_by_address.iter() {
        if category.matches_send(to, known) {
            cb(to, success);
            invoked += 1;
        }
    }
    invoked
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::peer::PeerRecord;
    use crate::subscription::{
        AddressReceiveFn, Category, PeerBinding, PeerReceiveFn, PeerSendFn,
    };
    use crate::transport::Interface;

    fn mac(b: u8) -> MacAddress {
        MacAddress::new([b; 6])
    }

    fn binding(peers: &PeerRegistry, name: &str) -> PeerBinding {
        let p = peers.get_by_name(name).unwrap();
        PeerBinding {
            peer: p.id,
            name: p.name.clone(),
        }
    }

    #[test]
    fn receive_order_is_most_recent_first() {
        let peers = PeerRegistry::new();
        let mut subs = Subscriptions::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 1..=3 {
            let log = log.clone();
            let cb: Arc<AddressReceiveFn> = Arc::new(move |_: &MacAddress, _: &[u8]| {
                log.lock().unwrap().push(i)
            });
            subs.receive_by_address
                .register(Category::Everything, cb)
                .unwrap();
        }
        assert_eq!(dispatch_receive(&peers, &subs, &mac(0xbb), b"x"), 3);
        assert_eq!(*log.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn receive_only_hits_own_peer() {
        let mut peers = PeerRegistry::new();
        peers.insert("a", mac(0xaa), Interface::Station, 1).unwrap();
        peers.insert("b", mac(0xbb), Interface::Station, 1).unwrap();
        let mut subs = Subscriptions::new();
        let hits = Arc::new(Mutex::new(Vec::<String>::new()));
        for name in ["a", "b"] {
            let hits = hits.clone();
            let cb: Arc<PeerReceiveFn> = Arc::new(move |p: &PeerRecord, data: &[u8]| {
                hits.lock()
                    .unwrap()
                    .push(format!("{}:{}", p.name, String::from_utf8_lossy(data)))
            });
            subs.receive_by_peer
                .register(binding(&peers, name), cb)
                .unwrap();
        }
        assert_eq!(dispatch_receive(&peers, &subs, &mac(0xaa), b"hi"), 1);
        assert_eq!(*hits.lock().unwrap(), vec!["a:hi".to_string()]);
    }

    #[test]
    fn unknown_sender_hits_broadcast_not_any_peer() {
        let mut peers = PeerRegistry::new();
        peers.insert("a", mac(0xaa), Interface::Station, 1).unwrap();
        let mut subs = Subscriptions::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for (tag, category) in [
            ("bcast", Category::BroadcastOnly),
            ("any", Category::AnyKnownPeer),
            ("exact", Category::ExactAddress(mac(0xcc))),
        ] {
            let hits = hits.clone();
            let cb: Arc<AddressReceiveFn> =
                Arc::new(move |_: &MacAddress, _: &[u8]| hits.lock().unwrap().push(tag));
            subs.receive_by_address.register(category, cb).unwrap();
        }

        dispatch_receive(&peers, &subs, &mac(0xcc), b"x");
        assert_eq!(*hits.lock().unwrap(), vec!["exact", "bcast"]);

        hits.lock().unwrap().clear();
        dispatch_receive(&peers, &subs, &mac(0xaa), b"x");
        assert_eq!(*hits.lock().unwrap(), vec!["any"]);
    }

    #[test]
    fn peer_bound_runs_before_address_bound() {
        let mut peers = PeerRegistry::new();
        peers.insert("a", mac(0xaa), Interface::Station, 1).unwrap();
        let mut subs = Subscriptions::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        let by_addr: Arc<AddressReceiveFn> =
            Arc::new(move |_: &MacAddress, _: &[u8]| o.lock().unwrap().push("address"));
        subs.receive_by_address
            .register(Category::Everything, by_addr)
            .unwrap();
        let o = order.clone();
        let by_peer: Arc<PeerReceiveFn> =
            Arc::new(move |_: &PeerRecord, _: &[u8]| o.lock().unwrap().push("peer"));
        subs.receive_by_peer
            .register(binding(&peers, "a"), by_peer)
            .unwrap();

        assert_eq!(dispatch_receive(&peers, &subs, &mac(0xaa), b""), 2);
        assert_eq!(*order.lock().unwrap(), vec!["peer", "address"]);
    }

    #[test]
    fn send_result_fires_every_peer_bound_subscription() {
        let mut peers = PeerRegistry::new();
        peers.insert("a", mac(0xaa), Interface::Station, 1).unwrap();
        peers.insert("b", mac(0xbb), Interface::Station, 1).unwrap();
        let mut subs = Subscriptions::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let seen = seen.clone();
            let cb: Arc<PeerSendFn> = Arc::new(move |p: &PeerRecord, ok: bool| {
                seen.lock().unwrap().push((p.name.clone(), ok))
            });
            subs.send_by_peer.register(binding(&peers, name), cb).unwrap();
        }

        assert_eq!(dispatch_send_result(&peers, &subs, &mac(0xaa), true), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a".to_string(), true), ("a".to_string(), true)]
        );

        seen.lock().unwrap().clear();
        assert_eq!(dispatch_send_result(&peers, &subs, &mac(0xcc), false), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn send_result_broadcast_category_needs_all_ones() {
        let mut peers = PeerRegistry::new();
        peers.insert("a", mac(0xaa), Interface::Station, 1).unwrap();
        let mut subs = Subscriptions::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        subs.send_by_address
            .register(
                Category::BroadcastOnly,
                Arc::new(move |_: &MacAddress, _: bool| *c.lock().unwrap() += 1),
            )
            .unwrap();

        dispatch_send_result(&peers, &subs, &mac(0xcc), true);
        dispatch_send_result(&peers, &subs, &mac(0xaa), true);
        assert_eq!(*count.lock().unwrap(), 0);
        dispatch_send_result(&peers, &subs, &MacAddress::BROADCAST, true);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn no_subscribers_is_a_no_op() {
        let peers = PeerRegistry::new();
        let subs = Subscriptions::new();
        assert_eq!(dispatch_receive(&peers, &subs, &mac(1), b"x"), 0);
        assert_eq!(dispatch_send_result(&peers, &subs, &mac(1), false), 0);
    }
}
