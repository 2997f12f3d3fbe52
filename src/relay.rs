// src/relay.rs
//
// The signaling relay boundary.
//
// `SignalRelay` is the contract the room session consumes: join/leave a
// room, send an addressed payload, receive membership and signal events.
// Any reliable bidirectional relay keyed by peer id satisfies it — a
// WebSocket server, a message queue, or the in-process `LoopbackHub`
// below, which the demo binary and the test suite use.  The relay is an
// injected dependency with an explicit lifecycle, never a process-wide
// singleton, so several sessions can coexist in one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::signal::{RelayEvent, RelayStatus, SignalPayload};

// ─── SignalRelay contract ───────────────────────────────────────────────────

/// Room-scoped publish/relay service, consumed by the room session.
///
/// Delivery guarantee: per-target FIFO, best effort.  No total order
/// across message kinds, no exactly-once.  Calls made while disconnected
/// fail immediately with [`RelayError::Disconnected`].
#[async_trait]
pub trait SignalRelay: Send + Sync {
    /// Identifier the relay assigned to this client.  Unique per connected
    /// client, not stable across reconnects.
    fn local_peer_id(&self) -> &str;

    /// Current connection status.
    fn status(&self) -> RelayStatus;

    /// Announce intent to join `room_id`.  The `ExistingPeers` event
    /// arrives asynchronously afterwards.
    async fn join_room(&self, room_id: &str) -> Result<(), RelayError>;

    /// Leave `room_id`.  A no-op when not joined.
    async fn leave_room(&self, room_id: &str) -> Result<(), RelayError>;

    /// Relay a signaling payload to one specific peer.
    async fn send_to_peer(
        &self,
        target_peer_id: &str,
        payload: SignalPayload,
    ) -> Result<(), RelayError>;

    /// Next inbound event, or `None` once the relay is gone for good.
    async fn next_event(&self) -> Option<RelayEvent>;
}

// ─── LoopbackHub ────────────────────────────────────────────────────────────

/// In-process relay: rooms and clients live in one shared map, payloads
/// are forwarded over per-client unbounded channels (which is exactly the
/// per-target FIFO the contract promises).
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    clients: HashMap<String, mpsc::UnboundedSender<RelayEvent>>,
    /// Room membership in join order.
    rooms: HashMap<String, Vec<String>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client and hand out its relay handle.
    pub fn client(&self) -> LoopbackRelay {
        let peer_id = format!("peer_{}", uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut inner = self.inner.lock().unwrap();
            inner.clients.insert(peer_id.clone(), tx.clone());
        }
        debug!(peer_id = %peer_id, "loopback relay client registered");

        LoopbackRelay {
            peer_id,
            hub: self.clone(),
            self_tx: tx,
            events: tokio::sync::Mutex::new(rx),
            joined: Mutex::new(None),
            connected: AtomicBool::new(true),
        }
    }

    fn deliver(&self, peer_id: &str, event: RelayEvent) {
        let inner = self.inner.lock().unwrap();
        if let Some(tx) = inner.clients.get(peer_id) {
            let _ = tx.send(event);
        }
    }
}

// ─── LoopbackRelay ──────────────────────────────────────────────────────────

/// One client's handle onto a [`LoopbackHub`].
pub struct LoopbackRelay {
    peer_id: String,
    hub: LoopbackHub,
    self_tx: mpsc::UnboundedSender<RelayEvent>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<RelayEvent>>,
    joined: Mutex<Option<String>>,
    connected: AtomicBool,
}

impl LoopbackRelay {
    /// Simulate losing the relay connection.  Subsequent sends fail with
    /// `Disconnected`; a `StatusChanged` event is delivered locally.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(peer_id = %self.peer_id, "loopback relay disconnected");
            let _ = self.self_tx.send(RelayEvent::StatusChanged {
                status: RelayStatus::Disconnected,
            });
        }
    }

    /// Simulate the relay client reconnecting.
    pub fn reconnect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!(peer_id = %self.peer_id, "loopback relay reconnected");
            let _ = self.self_tx.send(RelayEvent::StatusChanged {
                status: RelayStatus::Connected,
            });
        }
    }

    fn ensure_connected(&self) -> Result<(), RelayError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::Disconnected)
        }
    }
}

#[async_trait]
impl SignalRelay for LoopbackRelay {
    fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    fn status(&self) -> RelayStatus {
        if self.connected.load(Ordering::SeqCst) {
            RelayStatus::Connected
        } else {
            RelayStatus::Disconnected
        }
    }

    async fn join_room(&self, room_id: &str) -> Result<(), RelayError> {
        self.ensure_connected()?;

        {
            let mut joined = self.joined.lock().unwrap();
            if let Some(existing) = joined.as_deref() {
                return Err(RelayError::AlreadyJoined(existing.to_string()));
            }
            *joined = Some(room_id.to_string());
        }

        let existing: Vec<String> = {
            let mut inner = self.hub.inner.lock().unwrap();
            let members = inner.rooms.entry(room_id.to_string()).or_default();
            let existing = members.clone();
            members.push(self.peer_id.clone());
            existing
        };

        info!(
            peer_id = %self.peer_id,
            room_id = %room_id,
            existing = existing.len(),
            "joined room on loopback relay"
        );

        // Join order decides the initiator role: the joiner learns about
        // the incumbents, the incumbents only learn the joiner exists.
        let _ = self.self_tx.send(RelayEvent::ExistingPeers {
            peer_ids: existing.clone(),
        });
        for member in &existing {
            self.hub.deliver(
                member,
                RelayEvent::PeerJoined {
                    peer_id: self.peer_id.clone(),
                },
            );
        }

        Ok(())
    }

    async fn leave_room(&self, room_id: &str) -> Result<(), RelayError> {
        let was_joined = {
            let mut joined = self.joined.lock().unwrap();
            match joined.as_deref() {
                Some(current) if current == room_id => {
                    *joined = None;
                    true
                }
                _ => false,
            }
        };
        if !was_joined {
            return Ok(());
        }

        let members: Vec<String> = {
            let mut inner = self.hub.inner.lock().unwrap();
            if let Some(members) = inner.rooms.get_mut(room_id) {
                members.retain(|m| m != &self.peer_id);
                members.clone()
            } else {
                Vec::new()
            }
        };

        info!(peer_id = %self.peer_id, room_id = %room_id, "left room on loopback relay");
        for member in &members {
            self.hub.deliver(
                member,
                RelayEvent::PeerLeft {
                    peer_id: self.peer_id.clone(),
                },
            );
        }

        Ok(())
    }

    async fn send_to_peer(
        &self,
        target_peer_id: &str,
        payload: SignalPayload,
    ) -> Result<(), RelayError> {
        self.ensure_connected()?;

        let inner = self.hub.inner.lock().unwrap();
        let tx = inner
            .clients
            .get(target_peer_id)
            .ok_or_else(|| RelayError::UnknownPeer(target_peer_id.to_string()))?;

        debug!(
            from = %self.peer_id,
            to = %target_peer_id,
            kind = payload.kind_str(),
            "relaying signal"
        );
        tx.send(RelayEvent::Signal {
            from_peer_id: self.peer_id.clone(),
            payload,
        })
        .map_err(|_| RelayError::UnknownPeer(target_peer_id.to_string()))
    }

    async fn next_event(&self) -> Option<RelayEvent> {
        self.events.lock().await.recv().await
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
