//! Host-driven API: `EspNow` owns the peer registry and subscription tables.
//! The host supplies the transport and peer store, and feeds radio events in.

use std::sync::Arc;

use crate::config::Config;
use crate::dispatch;
use crate::mac::MacAddress;
use crate::peer::{PeerId, PeerRecord, PeerRegistry};
use crate::store::{PeerStore, StoredPeer};
use crate::subscription::{
    AddressReceiveFn, AddressSendFn, Category, PeerBinding, PeerReceiveFn, PeerSendFn,
    Subscriptions,
};
use crate::transport::{Interface, Transport, TransportError, MAX_PAYLOAD_LEN};

/// Process-wide ESP-NOW context. Built by [`EspNow::init`], torn down by
/// [`EspNow::shutdown`] or by dropping it.
///
/// Event hooks take `&self` and mutation takes `&mut self`, so a subscriber
/// callback can never register, unregister or remove peers while a dispatch
/// is walking the tables.
pub struct EspNow<T, S> {
    config: Config,
    transport: T,
    store: S,
    peers: PeerRegistry,
    subs: Subscriptions,
    active: bool,
}

impl<T: Transport, S: PeerStore> EspNow<T, S> {
    /// One-time setup. When the feature is disabled or no wifi interface is
    /// enabled, returns an inactive context: events are ignored and peer or
    /// transmit operations fail with `NotInitialized`.
    pub fn init(config: Config, transport: T, store: S) -> Result<Self, EspNowError> {
        let mut node = Self {
            config,
            transport,
            store,
            peers: PeerRegistry::new(),
            subs: Subscriptions::new(),
            active: false,
        };
        if !node.config.enable {
            tracing::info!("espnow disabled by config");
            return Ok(node);
        }
        if !node.config.has_interface() {
            tracing::error!("no wifi interfaces enabled, espnow will not work");
            return Ok(node);
        }

        node.transport.start()?;
        node.active = true;

        if node.config.enable_broadcast {
            let channel = node.config.wifi.ap_channel;
            tracing::info!(channel, "adding broadcast peer");
            if let Err(e) = node.transport.add_or_modify_peer(
                MacAddress::BROADCAST,
                channel,
                Interface::AccessPoint,
            ) {
                tracing::warn!(error = %e, "failed to add broadcast peer");
            }
        }

        node.load_peers()?;

        for interface in [Interface::AccessPoint, Interface::Station] {
            if let Some(mac) = node.transport.local_address(interface) {
                tracing::info!(?interface, %mac, "local address");
            }
        }
        Ok(node)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stop the transport and hand it back.
    pub fn shutdown(self) -> T {
        let Self {
            mut transport,
            active,
            ..
        } = self;
        if active {
            transport.stop();
        }
        transport
    }

    fn ensure_active(&self) -> Result<(), EspNowError> {
        if self.active {
            Ok(())
        } else {
            Err(EspNowError::NotInitialized)
        }
    }

    // --- peers ---

    /// Register a peer. Any existing peer with the same name or address is
    /// evicted first. `channel = None` uses the configured AP channel.
    pub fn add_peer(
        &mut self,
        name: &str,
        address: MacAddress,
        interface: Interface,
        channel: Option<u8>,
        persist: bool,
    ) -> Result<PeerId, EspNowError> {
        self.ensure_active()?;
        let id = self.insert_peer(name, address, interface, channel)?;
        if persist {
            self.persist();
        }
        Ok(id)
    }

    fn insert_peer(
        &mut self,
        name: &str,
        address: MacAddress,
        interface: Interface,
        channel: Option<u8>,
    ) -> Result<PeerId, EspNowError> {
        for id in self.peers.collisions(name, &address) {
            if let Some(old) = self.peers.remove(id) {
                tracing::warn!(evicted = %old.name, mac = %old.address, new = name, "replacing peer");
                if let Err(e) = self.transport.remove_peer(old.address) {
                    tracing::debug!(mac = %old.address, error = %e, "hardware peer removal failed");
                }
            }
        }

        let channel = channel.unwrap_or(self.config.wifi.ap_channel);
        self.transport
            .add_or_modify_peer(address, channel, interface)?;
        match self.peers.insert(name, address, interface, channel) {
            Ok(id) => Ok(id),
            Err(_) => {
                let _ = self.transport.remove_peer(address);
                Err(EspNowError::OutOfResources)
            }
        }
    }

    /// Remove a peer by name. Returns false (and does nothing) when absent.
    /// Subscriptions bound to the peer stay in their tables.
    pub fn remove_peer(&mut self, name: &str, persist: bool) -> bool {
        let Some(id) = self.peers.get_by_name(name).map(|p| p.id) else {
            return false;
        };
        if let Some(peer) = self.peers.remove(id) {
            if let Err(e) = self.transport.remove_peer(peer.address) {
                tracing::warn!(peer = %peer.name, mac = %peer.address, error = %e, "hardware peer removal failed");
            }
        }
        if persist {
            self.persist();
        }
        true
    }

    pub fn get_peer_by_name(&self, name: &str) -> Option<&PeerRecord> {
        self.peers.get_by_name(name)
    }

    pub fn get_peer_by_address(&self, address: &MacAddress) -> Option<&PeerRecord> {
        self.peers.get_by_address(address)
    }

    pub fn total_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter()
    }

    /// Load persisted peers and mirror them into the transport. Records with a
    /// bad address or channel, or that the transport rejects, are skipped.
    /// Returns how many were loaded.
    pub fn load_peers(&mut self) -> Result<usize, EspNowError> {
        self.ensure_active()?;
        let stored = match self.store.load() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read peer list");
                return Ok(0);
            }
        };

        let mut loaded = 0;
        for (index, rec) in stored.into_iter().enumerate() {
            let address = match MacAddress::parse(&rec.mac) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(index, name = %rec.name, mac = %rec.mac, error = %e, "peer has invalid mac, skipping");
                    continue;
                }
            };
            let channel = if rec.channel < 0 {
                None
            } else if let Ok(c) = u8::try_from(rec.channel) {
                Some(c)
            } else {
                tracing::warn!(index, name = %rec.name, channel = rec.channel, "peer has invalid channel, skipping");
                continue;
            };
            let interface = Interface::from_softap(rec.softap);
            match self.insert_peer(&rec.name, address, interface, channel) {
                Ok(_) => {
                    tracing::info!(name = %rec.name, mac = %address, "loaded peer");
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(name = %rec.name, mac = %address, error = %e, "failed to load peer")
                }
            }
        }
        Ok(loaded)
    }

    fn persist(&mut self) {
        let records: Vec<StoredPeer> = self
            .peers
            .iter()
            .map(|p| StoredPeer {
                name: p.name.clone(),
                mac: p.address.to_string(),
                softap: p.interface.is_softap(),
                channel: i32::from(p.channel),
            })
            .collect();
        tracing::debug!(count = records.len(), "saving peer list");
        if let Err(e) = self.store.save(&records) {
            tracing::warn!(error = %e, "failed to save peer list");
        }
    }

    // --- subscriptions ---

    fn binding(&self, name: &str) -> Result<PeerBinding, EspNowError> {
        let peer = self
            .peers
            .get_by_name(name)
            .ok_or(EspNowError::PeerNotFound)?;
        Ok(PeerBinding {
            peer: peer.id,
            name: peer.name.clone(),
        })
    }

    /// Call `callback` for datagrams received from the named peer.
    pub fn register_receive_by_peer(
        &mut self,
        name: &str,
        callback: Arc<PeerReceiveFn>,
    ) -> Result<(), EspNowError> {
        let binding = self.binding(name)?;
        self.subs
            .receive_by_peer
            .register(binding, callback)
            .map_err(|_| EspNowError::OutOfResources)
    }

    /// Call `callback` for received datagrams whose sender matches `category`.
    pub fn register_receive_by_address(
        &mut self,
        category: Category,
        callback: Arc<AddressReceiveFn>,
    ) -> Result<(), EspNowError> {
        self.subs
            .receive_by_address
            .register(category, callback)
            .map_err(|_| EspNowError::OutOfResources)
    }

    /// Call `callback` for send results to any registered peer (see
    /// [`dispatch::dispatch_send_result`]). `name` must be registered.
    pub fn register_send_by_peer(
        &mut self,
        name: &str,
        callback: Arc<PeerSendFn>,
    ) -> Result<(), EspNowError> {
        let binding = self.binding(name)?;
        self.subs
            .send_by_peer
            .register(binding, callback)
            .map_err(|_| EspNowError::OutOfResources)
    }

    pub fn register_send_by_address(
        &mut self,
        category: Category,
        callback: Arc<AddressSendFn>,
    ) -> Result<(), EspNowError> {
        self.subs
            .send_by_address
            .register(category, callback)
            .map_err(|_| EspNowError::OutOfResources)
    }

    /// Remove the most recent registration of `callback` for peer `name`.
    pub fn unregister_receive_by_peer(&mut self, callback: &Arc<PeerReceiveFn>, name: &str) -> bool {
        self.subs
            .receive_by_peer
            .unregister(callback, |b| b.name == name)
    }

    pub fn unregister_receive_by_address(
        &mut self,
        callback: &Arc<AddressReceiveFn>,
        category: &Category,
    ) -> bool {
        self.subs
            .receive_by_address
            .unregister(callback, |c| c == category)
    }

    pub fn unregister_send_by_peer(&mut self, callback: &Arc<PeerSendFn>, name: &str) -> bool {
        self.subs
            .send_by_peer
            .unregister(callback, |b| b.name == name)
    }

    pub fn unregister_send_by_address(
        &mut self,
        callback: &Arc<AddressSendFn>,
        category: &Category,
    ) -> bool {
        self.subs
            .send_by_address
            .unregister(callback, |c| c == category)
    }

    // --- transmit ---

    fn check_payload(&self, payload: &[u8]) -> Result<(), EspNowError> {
        self.ensure_active()?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(EspNowError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(())
    }

    /// Send to a registered peer. Transport errors are logged only; the send
    /// result event carries the outcome.
    pub fn send_to_peer(&mut self, name: &str, payload: &[u8]) -> Result<(), EspNowError> {
        self.check_payload(payload)?;
        let address = self
            .peers
            .get_by_name(name)
            .map(|p| p.address)
            .ok_or(EspNowError::PeerNotFound)?;
        if let Err(e) = self.transport.transmit(address, payload) {
            tracing::error!(peer = name, mac = %address, error = %e, "transmit failed");
        }
        Ok(())
    }

    /// Send to every registered peer. Returns how many transmits were accepted.
    pub fn send_to_all(&mut self, payload: &[u8]) -> Result<usize, EspNowError> {
        self.check_payload(payload)?;
        let mut accepted = 0;
        for peer in self.peers.iter() {
            match self.transport.transmit(peer.address, payload) {
                Ok(()) => accepted += 1,
                Err(e) => {
                    tracing::error!(peer = %peer.name, mac = %peer.address, error = %e, "transmit failed")
                }
            }
        }
        Ok(accepted)
    }

    pub fn broadcast(&mut self, payload: &[u8]) -> Result<(), EspNowError> {
        self.check_payload(payload)?;
        if let Err(e) = self.transport.transmit(MacAddress::BROADCAST, payload) {
            tracing::error!(error = %e, "broadcast transmit failed");
        }
        Ok(())
    }

    // --- inbound events ---

    /// Radio delivered a datagram. Returns how many subscribers were called.
    pub fn on_receive(&self, from: &MacAddress, payload: &[u8]) -> usize {
        if !self.active {
            return 0;
        }
        if self.config.trace_events {
            tracing::info!(
                mac = %from,
                len = payload.len(),
                data = %String::from_utf8_lossy(payload),
                "rx"
            );
        }
        dispatch::dispatch_receive(&self.peers, &self.subs, from, payload)
    }

    /// Radio finished a transmit. Returns how many subscribers were called.
    pub fn on_send_result(&self, to: &MacAddress, success: bool) -> usize {
        if !self.active {
            return 0;
        }
        if self.config.trace_events {
            let result = if success { "success" } else { "failure" };
            tracing::info!(mac = %to, result, "tx");
        }
        dispatch::dispatch_send_result(&self.peers, &self.subs, to, success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EspNowError {
    #[error("espnow not initialized")]
    NotInitialized,
    #[error("maximum number of peers reached")]
    MaxPeersReached,
    #[error("peer not found")]
    PeerNotFound,
    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("out of resources")]
    OutOfResources,
}

impl From<TransportError> for EspNowError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::PeerTableFull => EspNowError::MaxPeersReached,
            TransportError::NotInitialized => EspNowError::NotInitialized,
            _ => EspNowError::OutOfResources,
        }
    }
}
