//! Radio transport contract. The host owns the driver; the core only calls through this trait.

use crate::mac::MacAddress;

/// Largest datagram payload the radio carries (ESP_NOW_MAX_DATA_LEN).
pub const MAX_PAYLOAD_LEN: usize = 250;

/// Wifi interface a hardware peer entry is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Station,
    AccessPoint,
}

impl Interface {
    pub fn from_softap(softap: bool) -> Self {
        if softap {
            Interface::AccessPoint
        } else {
            Interface::Station
        }
    }

    pub fn is_softap(self) -> bool {
        self == Interface::AccessPoint
    }
}

/// Radio driver seen from the core.
///
/// `on_receive` and `on_send_result` flow the other way: the host calls them on
/// [`crate::EspNow`] from its own event loop.
pub trait Transport {
    /// Bring the radio up. Called once from `EspNow::init`.
    fn start(&mut self) -> Result<(), TransportError>;

    fn stop(&mut self) {}

    /// Add a hardware peer entry, or update it when one exists for `address`.
    fn add_or_modify_peer(
        &mut self,
        address: MacAddress,
        channel: u8,
        interface: Interface,
    ) -> Result<(), TransportError>;

    fn remove_peer(&mut self, address: MacAddress) -> Result<(), TransportError>;

    /// Queue one datagram. `Ok` means accepted; the real outcome arrives later as a send result.
    fn transmit(&mut self, address: MacAddress, payload: &[u8]) -> Result<(), TransportError>;

    /// Own hardware address on `interface`, when the driver knows it.
    fn local_address(&self, _interface: Interface) -> Option<MacAddress> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("radio not initialized")]
    NotInitialized,
    #[error("hardware peer table full")]
    PeerTableFull,
    #[error("peer not in hardware table")]
    PeerNotFound,
    #[error("out of memory")]
    NoMemory,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("io: {0}")]
    Io(String),
}
