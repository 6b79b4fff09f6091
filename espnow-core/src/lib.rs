//! ESP-NOW peer registry and callback dispatch.
//! Host-driven: no I/O; the host owns the radio and feeds receive/send events in.

pub mod config;
pub mod core;
pub mod dispatch;
pub mod ffi;
pub mod mac;
pub mod peer;
pub mod store;
pub mod subscription;
pub mod transport;

pub use config::{Config, WifiConfig};
pub use core::{EspNow, EspNowError};
pub use mac::{MacAddress, MacParseError};
pub use peer::{PeerId, PeerRecord, PeerRegistry};
pub use store::{JsonFileStore, MemoryStore, PeerStore, StoreError, StoredPeer};
pub use subscription::{AddressReceiveFn, AddressSendFn, Category, PeerReceiveFn, PeerSendFn};
pub use transport::{Interface, Transport, TransportError, MAX_PAYLOAD_LEN};
