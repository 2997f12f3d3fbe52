// src/session.rs
//
// Room orchestration.
//
// `RoomSession` is the single entry/exit point for room membership: it
// joins a room through the injected relay, owns the map of peer entries,
// routes every relay- and transport-originated event to the negotiation
// controller, and broadcasts room events for the presentation layer.  One
// runner task per session owns all the state, so every transition is
// strictly event-sequential — no per-entry locking anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::error::SessionError;
use crate::media::{LocalMediaSource, MediaCapture, MediaConstraints};
use crate::negotiation::{NegotiationController, Verdict};
use crate::peer::{NegotiationState, PeerConnectionEntry};
use crate::relay::SignalRelay;
use crate::signal::{RelayEvent, RelayStatus, SignalPayload};
use crate::transport::{
    RemoteTrackInfo, TransportConnectionState, TransportEvent, TransportFactory,
};

// ─── Room events (UI-facing output) ─────────────────────────────────────────

/// Payload of a room event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RoomEventKind {
    /// A peer entry started being tracked.
    PeerJoined { peer_id: String },
    /// A peer entry was torn down because the peer left.
    PeerLeft { peer_id: String },
    /// The pair reached a working media connection.
    PeerConnected { peer_id: String },
    /// Negotiation with the peer failed beyond the retry budget.
    PeerUnreachable { peer_id: String },
    /// A remote track became available for rendering.
    RemoteTrack {
        peer_id: String,
        track: RemoteTrackInfo,
    },
    /// The signaling relay connection status changed.
    RelayStatus { status: RelayStatus },
}

/// A fully self-describing room event, ready for serialisation.
///
/// ```json
/// {
///   "id":         "evt_a1b2c3d4",
///   "created_at": "2026-08-30T14:22:33.123Z",
///   "data":       { "type": "peer-connected", "peer_id": "peer_..." }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct RoomEvent {
    /// Globally unique event identifier (format: `evt_<uuid-v4>`).
    pub id: String,
    /// ISO-8601 timestamp (UTC).
    pub created_at: DateTime<Utc>,
    /// Type-specific payload.
    pub data: RoomEventKind,
}

impl RoomEvent {
    fn new(data: RoomEventKind) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            created_at: Utc::now(),
            data,
        }
    }
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

/// Serialisable summary of one tracked peer, for rosters and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub peer_id: String,
    pub state: NegotiationState,
    pub initiator: bool,
    pub remote_tracks: usize,
}

// ─── Session wiring ─────────────────────────────────────────────────────────

/// Dependencies a session is built from.  All injected — a fake relay and
/// transport factory make the whole core testable in-process.
pub struct SessionContext {
    pub relay: Arc<dyn SignalRelay>,
    pub factory: Arc<dyn TransportFactory>,
    pub config: MeshConfig,
}

enum SessionCommand {
    Leave { done: oneshot::Sender<()> },
    Snapshot { reply: oneshot::Sender<Vec<PeerSnapshot>> },
}

// ─── RoomSession handle ─────────────────────────────────────────────────────

/// Handle onto a running room session.
pub struct RoomSession {
    room_id: String,
    local_peer_id: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<RoomEvent>,
    roster: watch::Receiver<Vec<String>>,
    left: AtomicBool,
}

impl RoomSession {
    /// Join `room_id` with an already-acquired media source.
    ///
    /// Returns once the relay confirmed room entry; peer discovery and
    /// negotiation proceed asynchronously on the runner task.
    pub async fn join(
        ctx: SessionContext,
        room_id: &str,
        media: Arc<LocalMediaSource>,
    ) -> Result<RoomSession, SessionError> {
        let SessionContext {
            relay,
            factory,
            config,
        } = ctx;

        relay.join_room(room_id).await?;
        let local_peer_id = relay.local_peer_id().to_string();
        info!(room_id, peer_id = %local_peer_id, "joined room, starting session");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);
        let (roster_tx, roster_rx) = watch::channel(Vec::new());

        let runner = SessionRunner {
            room_id: room_id.to_string(),
            relay,
            factory,
            media,
            controller: NegotiationController::new(config.negotiation_failure_limit),
            peers: HashMap::new(),
            commands: commands_rx,
            transport_tx,
            transport_rx,
            events: events_tx.clone(),
            roster_tx,
        };
        tokio::spawn(runner.run());

        Ok(RoomSession {
            room_id: room_id.to_string(),
            local_peer_id,
            commands: commands_tx,
            events: events_tx,
            roster: roster_rx,
            left: AtomicBool::new(false),
        })
    }

    /// Acquire media through `capture`, then join.  `MediaAccessError` is
    /// fatal here; callers wanting a degraded media-less join can pass
    /// [`LocalMediaSource::empty`] to [`RoomSession::join`] instead.
    pub async fn join_with_capture(
        ctx: SessionContext,
        room_id: &str,
        capture: &dyn MediaCapture,
        constraints: MediaConstraints,
    ) -> Result<RoomSession, SessionError> {
        let media = LocalMediaSource::acquire(capture, constraints).await?;
        Self::join(ctx, room_id, Arc::new(media)).await
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Subscribe to room events.  Slow consumers may lag and miss events.
    pub fn events(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// Currently tracked remote peer ids.
    pub fn roster(&self) -> Vec<String> {
        self.roster.borrow().clone()
    }

    /// Snapshot of every tracked peer.  Empty once the session ended.
    pub async fn peers(&self) -> Vec<PeerSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Snapshot { reply })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Leave the room: close every entry, release local media, leave on
    /// the relay.  Idempotent.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            debug!(room_id = %self.room_id, "leave called again, ignoring");
            return;
        }
        let (done, done_rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Leave { done }).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("room_id", &self.room_id)
            .field("local_peer_id", &self.local_peer_id)
            .field("left", &self.left.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// ─── SessionRunner ──────────────────────────────────────────────────────────

struct SessionRunner {
    room_id: String,
    relay: Arc<dyn SignalRelay>,
    factory: Arc<dyn TransportFactory>,
    media: Arc<LocalMediaSource>,
    controller: NegotiationController,
    /// Peer map — owned exclusively by this task.
    peers: HashMap<String, PeerConnectionEntry>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    transport_tx: mpsc::UnboundedSender<(String, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(String, TransportEvent)>,
    events: broadcast::Sender<RoomEvent>,
    roster_tx: watch::Sender<Vec<String>>,
}

impl SessionRunner {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Leave { done }) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(SessionCommand::Snapshot { reply }) => {
                        let _ = reply.send(self.snapshot());
                    }
                    // Handle dropped without an explicit leave.
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = self.relay.next_event() => match event {
                    Some(event) => self.handle_relay_event(event).await,
                    None => {
                        warn!(room_id = %self.room_id, "relay event stream ended");
                        self.shutdown().await;
                        break;
                    }
                },
                item = self.transport_rx.recv() => {
                    // Never `None`: this runner holds a sender clone.
                    if let Some((peer_id, event)) = item {
                        self.handle_transport_event(&peer_id, event).await;
                    }
                }
            }
        }
        info!(room_id = %self.room_id, "room session terminated");
    }

    // ── Relay events ────────────────────────────────────────────────────

    async fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::ExistingPeers { peer_ids } => {
                debug!(room_id = %self.room_id, count = peer_ids.len(), "existing peers received");
                // The newcomer initiates towards every incumbent; the
                // incumbents wait.  This asymmetry prevents duplicate
                // simultaneous offers on first contact.
                for peer_id in peer_ids {
                    if self.ensure_entry(&peer_id, true).await {
                        self.kick_negotiation(&peer_id).await;
                    }
                }
            }
            RelayEvent::PeerJoined { peer_id } => {
                // No initiating action: the joiner received our id in its
                // existing-peers list and will offer first.
                self.ensure_entry(&peer_id, false).await;
            }
            RelayEvent::PeerLeft { peer_id } => {
                match self.peers.remove(&peer_id) {
                    Some(mut entry) => {
                        self.controller.close(&mut entry).await;
                        self.emit(RoomEventKind::PeerLeft {
                            peer_id: peer_id.clone(),
                        });
                        self.publish_roster();
                        info!(room_id = %self.room_id, peer_id = %peer_id, "peer left");
                    }
                    None => {
                        debug!(room_id = %self.room_id, peer_id = %peer_id, "peer-left for untracked peer");
                    }
                }
            }
            RelayEvent::Signal {
                from_peer_id,
                payload,
            } => {
                // A signal can outrun the membership notification; create
                // the entry lazily in that case.
                if !self.ensure_entry(&from_peer_id, false).await {
                    return;
                }
                let Some(entry) = self.peers.get_mut(&from_peer_id) else {
                    return;
                };
                let verdict = self
                    .controller
                    .handle_signal(entry, self.relay.as_ref(), payload)
                    .await;
                self.apply_verdict(&from_peer_id, verdict).await;
            }
            RelayEvent::StatusChanged { status } => {
                // Entries persist optimistically across relay outages;
                // signaling resumes once the relay client reconnects.
                match status {
                    RelayStatus::Connected => {
                        info!(room_id = %self.room_id, "relay reconnected")
                    }
                    RelayStatus::Disconnected => {
                        warn!(room_id = %self.room_id, "relay disconnected, entries stall until reconnect")
                    }
                }
                self.emit(RoomEventKind::RelayStatus { status });
            }
        }
    }

    // ── Transport events ────────────────────────────────────────────────

    async fn handle_transport_event(&mut self, peer_id: &str, event: TransportEvent) {
        if !self.peers.contains_key(peer_id) {
            debug!(peer_id = %peer_id, "transport event for removed entry, ignoring");
            return;
        }
        match event {
            TransportEvent::NegotiationNeeded => {
                self.kick_negotiation(peer_id).await;
            }
            TransportEvent::IceCandidate(candidate) => {
                if let Err(e) = self
                    .relay
                    .send_to_peer(peer_id, SignalPayload::candidate(candidate))
                    .await
                {
                    warn!(peer_id = %peer_id, error = %e, "local ice candidate could not be relayed");
                }
            }
            TransportEvent::RemoteTrack(track) => {
                if let Some(entry) = self.peers.get_mut(peer_id) {
                    entry.add_remote_track(track.clone());
                }
                info!(peer_id = %peer_id, kind = %track.kind, "remote track available");
                self.emit(RoomEventKind::RemoteTrack {
                    peer_id: peer_id.to_string(),
                    track,
                });
            }
            TransportEvent::ConnectionState(state) => {
                debug!(peer_id = %peer_id, ?state, "transport connection state");
                match state {
                    TransportConnectionState::Connected => {
                        if let Some(entry) = self.peers.get_mut(peer_id) {
                            if !entry.connected_announced {
                                entry.connected_announced = true;
                                self.emit(RoomEventKind::PeerConnected {
                                    peer_id: peer_id.to_string(),
                                });
                            }
                        }
                    }
                    TransportConnectionState::Failed => {
                        // Liveness detection is the application's concern;
                        // the entry stays until a peer-left arrives.
                        warn!(peer_id = %peer_id, "transport connection failed");
                    }
                    _ => {}
                }
            }
        }
    }

    // ── Entry management ────────────────────────────────────────────────

    /// Track `peer_id`, creating the entry if needed.  Returns whether an
    /// entry exists afterwards.  At most one entry per peer id, ever.
    async fn ensure_entry(&mut self, peer_id: &str, initiator: bool) -> bool {
        if peer_id == self.relay.local_peer_id() {
            return false;
        }
        if self.peers.contains_key(peer_id) {
            return true;
        }
        match self
            .factory
            .create(peer_id, &self.media, self.transport_tx.clone())
            .await
        {
            Ok(transport) => {
                info!(
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    initiator,
                    "tracking new peer"
                );
                self.peers.insert(
                    peer_id.to_string(),
                    PeerConnectionEntry::new(peer_id, transport, initiator),
                );
                self.emit(RoomEventKind::PeerJoined {
                    peer_id: peer_id.to_string(),
                });
                self.publish_roster();
                true
            }
            Err(e) => {
                warn!(peer_id = %peer_id, error = %e, "transport creation failed, peer not tracked");
                false
            }
        }
    }

    async fn kick_negotiation(&mut self, peer_id: &str) {
        let Some(entry) = self.peers.get_mut(peer_id) else {
            return;
        };
        let verdict = self
            .controller
            .negotiation_needed(entry, self.relay.as_ref())
            .await;
        self.apply_verdict(peer_id, verdict).await;
    }

    async fn apply_verdict(&mut self, peer_id: &str, verdict: Verdict) {
        match verdict {
            Verdict::Continue => {}
            Verdict::Unreachable => {
                if let Some(mut entry) = self.peers.remove(peer_id) {
                    self.controller.close(&mut entry).await;
                }
                self.emit(RoomEventKind::PeerUnreachable {
                    peer_id: peer_id.to_string(),
                });
                self.publish_roster();
            }
        }
    }

    // ── Teardown ────────────────────────────────────────────────────────

    async fn shutdown(&mut self) {
        for (_, mut entry) in self.peers.drain() {
            self.controller.close(&mut entry).await;
        }
        self.media.release();
        if let Err(e) = self.relay.leave_room(&self.room_id).await {
            debug!(room_id = %self.room_id, error = %e, "relay leave failed during shutdown");
        }
        self.publish_roster();
        info!(room_id = %self.room_id, "left room");
    }

    // ── Outputs ─────────────────────────────────────────────────────────

    fn emit(&self, data: RoomEventKind) {
        let event = RoomEvent::new(data);
        debug!(room_id = %self.room_id, event = ?event.data, "room event");
        let _ = self.events.send(event);
    }

    fn publish_roster(&self) {
        let mut roster: Vec<String> = self.peers.keys().cloned().collect();
        roster.sort();
        self.roster_tx.send_replace(roster);
    }

    fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut peers: Vec<PeerSnapshot> = self
            .peers
            .values()
            .map(|entry| PeerSnapshot {
                peer_id: entry.remote_peer_id().to_string(),
                state: entry.state(),
                initiator: entry.initiator,
                remote_tracks: entry.remote_tracks().len(),
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
