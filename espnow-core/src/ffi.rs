//! C ABI for linking espnow-core as a static library from C firmware (ESP-IDF, Mongoose OS).
//! The C side supplies the radio as a table of function pointers and forwards
//! driver callbacks into `espnow_on_receive` / `espnow_on_send_result`.

use std::ffi::{c_char, c_void, CStr, CString};
use std::os::raw::c_int;
use std::path::PathBuf;
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::config::Config;
use crate::core::{EspNow, EspNowError};
use crate::mac::MacAddress;
use crate::peer::PeerRecord;
use crate::store::{JsonFileStore, MemoryStore, PeerStore};
use crate::subscription::{AddressReceiveFn, AddressSendFn, Category, PeerReceiveFn, PeerSendFn};
use crate::transport::{Interface, Transport, TransportError};

pub const ESPNOW_OK: c_int = 0;
pub const ESPNOW_SEND_FAILED: c_int = 1;
pub const ESPNOW_NOT_INIT: c_int = 2;
pub const ESPNOW_MAX_PEERS: c_int = 3;
pub const ESPNOW_PEER_NOT_FOUND: c_int = 4;
pub const ESPNOW_PAYLOAD_LEN_ERR: c_int = 5;
pub const ESPNOW_NO_MEM: c_int = 6;
const ESPNOW_INVALID_ARG: c_int = -1;

/// Category codes for the address-bound register/unregister calls.
pub const ESPNOW_CAT_MAC: c_int = 0;
pub const ESPNOW_CAT_BCAST: c_int = 1;
pub const ESPNOW_CAT_ANY_PEER: c_int = 2;
pub const ESPNOW_CAT_ALL: c_int = 3;

/// Radio driver supplied by the C host. Each function returns 0 on success or
/// one of the `ESPNOW_*` codes (`ESPNOW_NOT_INIT`, `ESPNOW_MAX_PEERS`,
/// `ESPNOW_PEER_NOT_FOUND`, anything else is treated as out of memory).
#[repr(C)]
pub struct EspNowRadio {
    pub ctx: *mut c_void,
    pub start: Option<extern "C" fn(ctx: *mut c_void) -> c_int>,
    pub add_or_modify_peer:
        Option<extern "C" fn(ctx: *mut c_void, mac: *const u8, channel: u8, softap: bool) -> c_int>,
    pub remove_peer: Option<extern "C" fn(ctx: *mut c_void, mac: *const u8) -> c_int>,
    pub transmit:
        Option<extern "C" fn(ctx: *mut c_void, mac: *const u8, data: *const u8, len: usize) -> c_int>,
}

fn radio_result(code: c_int) -> Result<(), TransportError> {
    match code {
        0 => Ok(()),
        ESPNOW_NOT_INIT => Err(TransportError::NotInitialized),
        ESPNOW_MAX_PEERS => Err(TransportError::PeerTableFull),
        ESPNOW_PEER_NOT_FOUND => Err(TransportError::PeerNotFound),
        _ => Err(TransportError::NoMemory),
    }
}

impl Transport for EspNowRadio {
    fn start(&mut self) -> Result<(), TransportError> {
        match self.start {
            Some(f) => radio_result(f(self.ctx)),
            None => Ok(()),
        }
    }

    fn add_or_modify_peer(
        &mut self,
        address: MacAddress,
        channel: u8,
        interface: Interface,
    ) -> Result<(), TransportError> {
        let f = self.add_or_modify_peer.ok_or(TransportError::NotInitialized)?;
        radio_result(f(
            self.ctx,
            address.as_bytes().as_ptr(),
            channel,
            interface.is_softap(),
        ))
    }

    fn remove_peer(&mut self, address: MacAddress) -> Result<(), TransportError> {
        let f = self.remove_peer.ok_or(TransportError::NotInitialized)?;
        radio_result(f(self.ctx, address.as_bytes().as_ptr()))
    }

    fn transmit(&mut self, address: MacAddress, payload: &[u8]) -> Result<(), TransportError> {
        let f = self.transmit.ok_or(TransportError::NotInitialized)?;
        radio_result(f(
            self.ctx,
            address.as_bytes().as_ptr(),
            payload.as_ptr(),
            payload.len(),
        ))
    }
}

/// Receive callback. `name` is null for address-bound subscriptions.
pub type EspNowRecvCb = extern "C" fn(
    name: *const c_char,
    mac: *const u8,
    data: *const u8,
    len: usize,
    ud: *mut c_void,
);
/// Send-result callback. `name` is null for address-bound subscriptions.
pub type EspNowSendCb =
    extern "C" fn(name: *const c_char, mac: *const u8, success: bool, ud: *mut c_void);

/// C user data pointer carried into callbacks. The C side owns it and must
/// keep it valid while the callback is registered.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// The core runs on the host's single event-loop thread; the pointer is never
// dereferenced on the Rust side.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

enum Registered {
    RecvPeer(Arc<PeerReceiveFn>),
    RecvAddress(Arc<AddressReceiveFn>),
    SendPeer(Arc<PeerSendFn>),
    SendAddress(Arc<AddressSendFn>),
}

/// Bookkeeping for one C registration, so it can be found again by function pointer.
struct Registration {
    cb: usize,
    peer: Option<String>,
    category: Option<Category>,
    handle: Registered,
}

struct Node {
    espnow: EspNow<EspNowRadio, Box<dyn PeerStore + Send>>,
    registrations: Vec<Registration>,
}

fn error_code(e: &EspNowError) -> c_int {
    match e {
        EspNowError::NotInitialized => ESPNOW_NOT_INIT,
        EspNowError::MaxPeersReached => ESPNOW_MAX_PEERS,
        EspNowError::PeerNotFound => ESPNOW_PEER_NOT_FOUND,
        EspNowError::PayloadTooLarge { .. } => ESPNOW_PAYLOAD_LEN_ERR,
        EspNowError::OutOfResources => ESPNOW_NO_MEM,
    }
}

fn code<T>(r: Result<T, EspNowError>) -> c_int {
    match r {
        Ok(_) => ESPNOW_OK,
        Err(e) => error_code(&e),
    }
}

unsafe fn node<'a>(h: *mut c_void) -> Option<&'a mut Node> {
    (h as *mut Node).as_mut()
}

/// Shared access for the event hooks, which run C callbacks while it is held.
unsafe fn node_ref<'a>(h: *const c_void) -> Option<&'a Node> {
    (h as *const Node).as_ref()
}

unsafe fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

unsafe fn mac_from(ptr: *const u8) -> Option<MacAddress> {
    if ptr.is_null() {
        return None;
    }
    let mut out = [0u8; 6];
    out.copy_from_slice(slice::from_raw_parts(ptr, 6));
    Some(MacAddress::new(out))
}

unsafe fn bytes<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if data.is_null() {
        return None;
    }
    Some(slice::from_raw_parts(data, len))
}

unsafe fn category_from(kind: c_int, mac: *const u8) -> Option<Category> {
    match kind {
        ESPNOW_CAT_MAC => mac_from(mac).map(Category::ExactAddress),
        ESPNOW_CAT_BCAST => Some(Category::BroadcastOnly),
        ESPNOW_CAT_ANY_PEER => Some(Category::AnyKnownPeer),
        ESPNOW_CAT_ALL => Some(Category::Everything),
        _ => None,
    }
}

/// Create a context. `radio` is copied. `peers_file` may be null (peers kept
/// in memory only). Returns an opaque handle, or null when `radio` is null or
/// the radio fails to start.
#[no_mangle]
pub unsafe extern "C" fn espnow_create(
    radio: *const EspNowRadio,
    ap_channel: u8,
    enable_broadcast: bool,
    peers_file: *const c_char,
) -> *mut c_void {
    let Some(radio) = radio.as_ref() else {
        return ptr::null_mut();
    };
    let radio = EspNowRadio {
        ctx: radio.ctx,
        start: radio.start,
        add_or_modify_peer: radio.add_or_modify_peer,
        remove_peer: radio.remove_peer,
        transmit: radio.transmit,
    };
    let store: Box<dyn PeerStore + Send> = match c_str(peers_file) {
        Some(path) => Box::new(JsonFileStore::new(PathBuf::from(path))),
        None => Box::new(MemoryStore::new()),
    };
    let mut config = Config::default();
    config.enable_broadcast = enable_broadcast;
    config.wifi.ap_channel = ap_channel;
    match EspNow::init(config, radio, store) {
        Ok(espnow) => Box::into_raw(Box::new(Node {
            espnow,
            registrations: Vec::new(),
        })) as *mut c_void,
        Err(e) => {
            tracing::error!(error = %e, "espnow init failed");
            ptr::null_mut()
        }
    }
}

/// Destroy a context. No-op if h is null.
#[no_mangle]
pub unsafe extern "C" fn espnow_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let node = Box::from_raw(h as *mut Node);
    node.espnow.shutdown();
}

#[no_mangle]
pub unsafe extern "C" fn espnow_add_peer(
    h: *mut c_void,
    name: *const c_char,
    mac: *const u8,
    softap: bool,
    channel: c_int,
    save: bool,
) -> c_int {
    let (Some(node), Some(name), Some(mac)) = (node(h), c_str(name), mac_from(mac)) else {
        return ESPNOW_INVALID_ARG;
    };
    let channel = if channel < 0 {
        None
    } else {
        match u8::try_from(channel) {
            Ok(c) => Some(c),
            Err(_) => return ESPNOW_INVALID_ARG,
        }
    };
    code(
        node.espnow
            .add_peer(name, mac, Interface::from_softap(softap), channel, save),
    )
}

#[no_mangle]
pub unsafe extern "C" fn espnow_remove_peer(h: *mut c_void, name: *const c_char, save: bool) {
    if let (Some(node), Some(name)) = (node(h), c_str(name)) {
        node.espnow.remove_peer(name, save);
    }
}

/// Number of registered peers, or -1 if h is null.
#[no_mangle]
pub unsafe extern "C" fn espnow_total_peers(h: *mut c_void) -> c_int {
    match node(h) {
        Some(node) => c_int::try_from(node.espnow.total_peers()).unwrap_or(c_int::MAX),
        None => ESPNOW_INVALID_ARG,
    }
}

/// Peer details returned by the lookups. When `name` is non-null, the peer
/// name is copied into it as a NUL-terminated string, truncated to fit
/// `name_cap` bytes.
#[repr(C)]
pub struct EspNowPeerInfo {
    pub mac: [u8; 6],
    pub softap: bool,
    pub channel: u8,
    pub name: *mut c_char,
    pub name_cap: usize,
}

unsafe fn fill_info(peer: &PeerRecord, out: &mut EspNowPeerInfo) {
    out.mac = *peer.address.as_bytes();
    out.softap = peer.interface.is_softap();
    out.channel = peer.channel;
    if out.name.is_null() || out.name_cap == 0 {
        return;
    }
    let n = peer.name.len().min(out.name_cap - 1);
    ptr::copy_nonoverlapping(peer.name.as_ptr(), out.name as *mut u8, n);
    *out.name.add(n) = 0;
}

/// Look up a peer by name. Returns `ESPNOW_PEER_NOT_FOUND` on a miss.
#[no_mangle]
pub unsafe extern "C" fn espnow_get_peer_by_name(
    h: *const c_void,
    name: *const c_char,
    out: *mut EspNowPeerInfo,
) -> c_int {
    let (Some(node), Some(name), Some(out)) = (node_ref(h), c_str(name), out.as_mut()) else {
        return ESPNOW_INVALID_ARG;
    };
    match node.espnow.get_peer_by_name(name) {
        Some(peer) => {
            fill_info(peer, out);
            ESPNOW_OK
        }
        None => ESPNOW_PEER_NOT_FOUND,
    }
}

/// Look up a peer by its 6-byte address. Returns `ESPNOW_PEER_NOT_FOUND` on a miss.
#[no_mangle]
pub unsafe extern "C" fn espnow_get_peer_by_mac(
    h: *const c_void,
    mac: *const u8,
    out: *mut EspNowPeerInfo,
) -> c_int {
    let (Some(node), Some(mac), Some(out)) = (node_ref(h), mac_from(mac), out.as_mut()) else {
        return ESPNOW_INVALID_ARG;
    };
    match node.espnow.get_peer_by_address(&mac) {
        Some(peer) => {
            fill_info(peer, out);
            ESPNOW_OK
        }
        None => ESPNOW_PEER_NOT_FOUND,
    }
}

/// Send to a peer by name. A null name sends to every registered peer.
#[no_mangle]
pub unsafe extern "C" fn espnow_send(
    h: *mut c_void,
    name: *const c_char,
    data: *const u8,
    len: usize,
) -> c_int {
    let (Some(node), Some(data)) = (node(h), bytes(data, len)) else {
        return ESPNOW_INVALID_ARG;
    };
    if name.is_null() {
        return code(node.espnow.send_to_all(data));
    }
    match c_str(name) {
        Some(name) => code(node.espnow.send_to_peer(name, data)),
        None => ESPNOW_INVALID_ARG,
    }
}

#[no_mangle]
pub unsafe extern "C" fn espnow_broadcast(h: *mut c_void, data: *const u8, len: usize) -> c_int {
    let (Some(node), Some(data)) = (node(h), bytes(data, len)) else {
        return ESPNOW_INVALID_ARG;
    };
    code(node.espnow.broadcast(data))
}

/// Forward the driver's receive callback. Returns the number of subscribers called.
///
/// Subscriber callbacks run inside this call and must not call any other
/// `espnow_*` function on the same handle.
#[no_mangle]
pub unsafe extern "C" fn espnow_on_receive(
    h: *const c_void,
    mac: *const u8,
    data: *const u8,
    len: usize,
) -> c_int {
    let (Some(node), Some(mac), Some(data)) = (node_ref(h), mac_from(mac), bytes(data, len)) else {
        return ESPNOW_INVALID_ARG;
    };
    c_int::try_from(node.espnow.on_receive(&mac, data)).unwrap_or(c_int::MAX)
}

/// Forward the driver's send callback. Returns the number of subscribers called.
/// Same reentrancy rule as [`espnow_on_receive`].
#[no_mangle]
pub unsafe extern "C" fn espnow_on_send_result(
    h: *const c_void,
    mac: *const u8,
    success: bool,
) -> c_int {
    let (Some(node), Some(mac)) = (node_ref(h), mac_from(mac)) else {
        return ESPNOW_INVALID_ARG;
    };
    c_int::try_from(node.espnow.on_send_result(&mac, success)).unwrap_or(c_int::MAX)
}

fn peer_name(peer: &PeerRecord) -> Option<CString> {
    CString::new(peer.name.as_str()).ok()
}

#[no_mangle]
pub unsafe extern "C" fn espnow_register_recv_peer_cb(
    h: *mut c_void,
    name: *const c_char,
    cb: EspNowRecvCb,
    ud: *mut c_void,
) -> c_int {
    let (Some(node), Some(name)) = (node(h), c_str(name)) else {
        return ESPNOW_INVALID_ARG;
    };
    let ud = UserData(ud);
    let f: Arc<PeerReceiveFn> = Arc::new(move |peer: &PeerRecord, data: &[u8]| {
        let ud = ud;
        let name = peer_name(peer);
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        cb(
            name_ptr,
            peer.address.as_bytes().as_ptr(),
            data.as_ptr(),
            data.len(),
            ud.0,
        );
    });
    let r = node.espnow.register_receive_by_peer(name, f.clone());
    if r.is_ok() {
        node.registrations.push(Registration {
            cb: cb as usize,
            peer: Some(name.to_owned()),
            category: None,
            handle: Registered::RecvPeer(f),
        });
    }
    code(r)
}

#[no_mangle]
pub unsafe extern "C" fn espnow_register_recv_mac_cb(
    h: *mut c_void,
    mac: *const u8,
    kind: c_int,
    cb: EspNowRecvCb,
    ud: *mut c_void,
) -> c_int {
    let (Some(node), Some(category)) = (node(h), category_from(kind, mac)) else {
        return ESPNOW_INVALID_ARG;
    };
    let ud = UserData(ud);
    let f: Arc<AddressReceiveFn> = Arc::new(move |from: &MacAddress, data: &[u8]| {
        let ud = ud;
        cb(
            ptr::null(),
            from.as_bytes().as_ptr(),
            data.as_ptr(),
            data.len(),
            ud.0,
        );
    });
    let r = node.espnow.register_receive_by_address(category, f.clone());
    if r.is_ok() {
        node.registrations.push(Registration {
            cb: cb as usize,
            peer: None,
            category: Some(category),
            handle: Registered::RecvAddress(f),
        });
    }
    code(r)
}

#[no_mangle]
pub unsafe extern "C" fn espnow_register_send_peer_cb(
    h: *mut c_void,
    name: *const c_char,
    cb: EspNowSendCb,
    ud: *mut c_void,
) -> c_int {
    let (Some(node), Some(name)) = (node(h), c_str(name)) else {
        return ESPNOW_INVALID_ARG;
    };
    let ud = UserData(ud);
    let f: Arc<PeerSendFn> = Arc::new(move |peer: &PeerRecord, success: bool| {
        let ud = ud;
        let name = peer_name(peer);
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        cb(name_ptr, peer.address.as_bytes().as_ptr(), success, ud.0);
    });
    let r = node.espnow.register_send_by_peer(name, f.clone());
    if r.is_ok() {
        node.registrations.push(Registration {
            cb: cb as usize,
            peer: Some(name.to_owned()),
            category: None,
            handle: Registered::SendPeer(f),
        });
    }
    code(r)
}

#[no_mangle]
pub unsafe extern "C" fn espnow_register_send_mac_cb(
    h: *mut c_void,
    mac: *const u8,
    kind: c_int,
    cb: EspNowSendCb,
    ud: *mut c_void,
) -> c_int {
    let (Some(node), Some(category)) = (node(h), category_from(kind, mac)) else {
        return ESPNOW_INVALID_ARG;
    };
    let ud = UserData(ud);
    let f: Arc<AddressSendFn> = Arc::new(move |to: &MacAddress, success: bool| {
        let ud = ud;
        cb(ptr::null(), to.as_bytes().as_ptr(), success, ud.0);
    });
    let r = node.espnow.register_send_by_address(category, f.clone());
    if r.is_ok() {
        node.registrations.push(Registration {
            cb: cb as usize,
            peer: None,
            category: Some(category),
            handle: Registered::SendAddress(f),
        });
    }
    code(r)
}

/// Most recent registration of `cb` with the given key and handle kind.
fn take_registration(
    node: &mut Node,
    cb: usize,
    peer: Option<&str>,
    category: Option<&Category>,
    kind: fn(&Registered) -> bool,
) -> Option<Registration> {
    let pos = node.registrations.iter().rposition(|r| {
        r.cb == cb && r.peer.as_deref() == peer && r.category.as_ref() == category && kind(&r.handle)
    })?;
    Some(node.registrations.remove(pos))
}

#[no_mangle]
pub unsafe extern "C" fn espnow_remove_recv_peer_cb(h: *mut c_void, cb: EspNowRecvCb, name: *const c_char) {
    let (Some(node), Some(name)) = (node(h), c_str(name)) else {
        return;
    };
    let found = take_registration(node, cb as usize, Some(name), None, |r| {
        matches!(r, Registered::RecvPeer(_))
    });
    if let Some(Registration {
        handle: Registered::RecvPeer(f),
        ..
    }) = found
    {
        node.espnow.unregister_receive_by_peer(&f, name);
    }
}

#[no_mangle]
pub unsafe extern "C" fn espnow_remove_recv_mac_cb(
    h: *mut c_void,
    cb: EspNowRecvCb,
    mac: *const u8,
    kind: c_int,
) {
    let (Some(node), Some(category)) = (node(h), category_from(kind, mac)) else {
        return;
    };
    let found = take_registration(node, cb as usize, None, Some(&category), |r| {
        matches!(r, Registered::RecvAddress(_))
    });
    if let Some(Registration {
        handle: Registered::RecvAddress(f),
        ..
    }) = found
    {
        node.espnow.unregister_receive_by_address(&f, &category);
    }
}

#[no_mangle]
pub unsafe extern "C" fn espnow_remove_send_peer_cb(h: *mut c_void, cb: EspNowSendCb, name: *const c_char) {
    let (Some(node), Some(name)) = (node(h), c_str(name)) else {
        return;
    };
    let found = take_registration(node, cb as usize, Some(name), None, |r| {
        matches!(r, Registered::SendPeer(_))
    });
    if let Some(Registration {
        handle: Registered::SendPeer(f),
        ..
    }) = found
    {
        node.espnow.unregister_send_by_peer(&f, name);
    }
}

#[no_mangle]
pub unsafe extern "C" fn espnow_remove_send_mac_cb(
    h: *mut c_void,
    cb: EspNowSendCb,
    mac: *const u8,
    kind: c_int,
) {
    let (Some(node), Some(category)) = (node(h), category_from(kind, mac)) else {
        return;
    };
    let found = take_registration(node, cb as usize, None, Some(&category), |r| {
        matches!(r, Registered::SendAddress(_))
    });
    if let Some(Registration {
        handle: Registered::SendAddress(f),
        ..
    }) = found
    {
        node.espnow.unregister_send_by_address(&f, &category);
    }
}
