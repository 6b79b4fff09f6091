//! ESP-NOW radio emulated over UDP multicast. Every node joins the same group;
//! frames carry source and destination hardware addresses.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use espnow_core::{Interface, MacAddress, Transport, TransportError, MAX_PAYLOAD_LEN};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::RadioConfig;
use crate::frame::{decode_frame, encode_frame, Frame};

/// Hardware peer table size of the real radio.
pub const MAX_HW_PEERS: usize = 20;

/// Event from the radio tasks to the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Received { from: MacAddress, payload: Vec<u8> },
    SendResult { to: MacAddress, success: bool },
}

struct Outgoing {
    dst: MacAddress,
    payload: Vec<u8>,
}

/// Unicast sends waiting for an ack, by sequence number.
type Pending = Arc<Mutex<HashMap<u32, (MacAddress, oneshot::Sender<()>)>>>;

pub struct UdpRadio {
    local: MacAddress,
    group: Ipv4Addr,
    port: u16,
    ack_timeout: Duration,
    events: mpsc::UnboundedSender<RadioEvent>,
    peers: HashMap<MacAddress, (u8, Interface)>,
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpRadio {
    pub fn new(local: MacAddress, cfg: &RadioConfig, events: mpsc::UnboundedSender<RadioEvent>) -> Self {
        Self {
            local,
            group: cfg.group,
            port: cfg.port,
            ack_timeout: cfg.ack_timeout(),
            events,
            peers: HashMap::new(),
            outgoing: None,
            tasks: Vec::new(),
        }
    }

    pub fn local(&self) -> MacAddress {
        self.local
    }

    /// Hardware peer entry for `address`: (channel, interface).
    pub fn peer(&self, address: &MacAddress) -> Option<(u8, Interface)> {
        self.peers.get(address).copied()
    }
}

impl Transport for UdpRadio {
    /// Binds the multicast socket and spawns the send/receive tasks. Must be
    /// called from within a tokio runtime.
    fn start(&mut self) -> Result<(), TransportError> {
        if self.outgoing.is_some() {
            return Ok(());
        }
        let socket = make_multicast_socket(self.group, self.port)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let socket = Arc::new(socket);
        let dest = SocketAddr::V4(SocketAddrV4::new(self.group, self.port));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        self.tasks.push(tokio::spawn(recv_loop(
            socket.clone(),
            dest,
            self.local,
            pending.clone(),
            self.events.clone(),
        )));
        self.tasks.push(tokio::spawn(send_loop(
            socket,
            dest,
            self.local,
            self.ack_timeout,
            pending,
            rx,
            self.events.clone(),
        )));
        self.outgoing = Some(tx);
        tracing::info!(mac = %self.local, group = %self.group, port = self.port, "radio started");
        Ok(())
    }

    fn stop(&mut self) {
        self.outgoing = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn add_or_modify_peer(
        &mut self,
        address: MacAddress,
        channel: u8,
        interface: Interface,
    ) -> Result<(), TransportError> {
        if !self.peers.contains_key(&address) && self.peers.len() >= MAX_HW_PEERS {
            return Err(TransportError::PeerTableFull);
        }
        self.peers.insert(address, (channel, interface));
        Ok(())
    }

    fn remove_peer(&mut self, address: MacAddress) -> Result<(), TransportError> {
        self.peers
            .remove(&address)
            .map(|_| ())
            .ok_or(TransportError::PeerNotFound)
    }

    fn transmit(&mut self, address: MacAddress, payload: &[u8]) -> Result<(), TransportError> {
        let Some(outgoing) = &self.outgoing else {
            return Err(TransportError::NotInitialized);
        };
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(TransportError::PayloadTooLarge);
        }
        if !self.peers.contains_key(&address) {
            return Err(TransportError::PeerNotFound);
        }
        outgoing
            .send(Outgoing {
                dst: address,
                payload: payload.to_vec(),
            })
            .map_err(|_| TransportError::NotInitialized)
    }

    fn local_address(&self, _interface: Interface) -> Option<MacAddress> {
        Some(self.local)
    }
}

/// Every node on the host binds the same group port, so the address must be reusable.
fn make_multicast_socket(group: Ipv4Addr, port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// What to do with one inbound frame.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Deliver {
        from: MacAddress,
        payload: Vec<u8>,
        ack: Option<Frame>,
    },
    Acked { seq: u32, from: MacAddress },
    Ignore,
}

fn classify(local: MacAddress, frame: Frame) -> Inbound {
    match frame {
        Frame::Data {
            seq,
            src,
            dst,
            payload,
        } => {
            let src = MacAddress::new(src);
            let dst = MacAddress::new(dst);
            if src == local {
                return Inbound::Ignore;
            }
            if payload.len() > MAX_PAYLOAD_LEN {
                tracing::debug!(mac = %src, len = payload.len(), "dropping oversized frame");
                return Inbound::Ignore;
            }
            if dst == local {
                Inbound::Deliver {
                    from: src,
                    payload,
                    ack: Some(Frame::Ack {
                        seq,
                        src: *local.as_bytes(),
                        dst: *src.as_bytes(),
                    }),
                }
            } else if dst.is_broadcast() {
                Inbound::Deliver {
                    from: src,
                    payload,
                    ack: None,
                }
            } else {
                Inbound::Ignore
            }
        }
        Frame::Ack { seq, src, dst } => {
            if MacAddress::new(dst) == local {
                Inbound::Acked {
                    seq,
                    from: MacAddress::new(src),
                }
            } else {
                Inbound::Ignore
            }
        }
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    local: MacAddress,
    pending: Pending,
    events: mpsc::UnboundedSender<RadioEvent>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let n = match socket.recv_from(&mut buf).await {
            Ok((n, _)) => n,
            Err(e) => {
                tracing::error!(error = %e, "radio receive failed");
                return;
            }
        };
        let frame = match decode_frame(&buf[..n]) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(error = %e, "dropping datagram");
                continue;
            }
        };
        match classify(local, frame) {
            Inbound::Deliver { from, payload, ack } => {
                if let Some(ack) = ack {
                    match encode_frame(&ack) {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, dest).await {
                                tracing::warn!(error = %e, "failed to send ack");
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to encode ack"),
                    }
                }
                if events.send(RadioEvent::Received { from, payload }).is_err() {
                    return;
                }
            }
            Inbound::Acked { seq, from } => {
                let mut p = pending.lock().await;
                if p.get(&seq).is_some_and(|(to, _)| *to == from) {
                    if let Some((_, waiter)) = p.remove(&seq) {
                        let _ = waiter.send(());
                    }
                }
            }
            Inbound::Ignore => {}
        }
    }
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    local: MacAddress,
    ack_timeout: Duration,
    pending: Pending,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<RadioEvent>,
) {
    let mut seq: u32 = 0;
    while let Some(Outgoing { dst, payload }) = outgoing.recv().await {
        seq = seq.wrapping_add(1);
        let frame = Frame::Data {
            seq,
            src: *local.as_bytes(),
            dst: *dst.as_bytes(),
            payload,
        };
        let bytes = match encode_frame(&frame) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode frame");
                let _ = events.send(RadioEvent::SendResult { to: dst, success: false });
                continue;
            }
        };

        if dst.is_broadcast() {
            let success = socket.send_to(&bytes, dest).await.is_ok();
            let _ = events.send(RadioEvent::SendResult { to: dst, success });
            continue;
        }

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(seq, (dst, tx));
        if let Err(e) = socket.send_to(&bytes, dest).await {
            tracing::warn!(mac = %dst, error = %e, "radio send failed");
            pending.lock().await.remove(&seq);
            let _ = events.send(RadioEvent::SendResult { to: dst, success: false });
            continue;
        }
        let pending = pending.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let success = matches!(tokio::time::timeout(ack_timeout, rx).await, Ok(Ok(())));
            if !success {
                pending.lock().await.remove(&seq);
            }
            let _ = events.send(RadioEvent::SendResult { to: dst, success });
        });
    }
}
