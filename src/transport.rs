// src/transport.rs
//
// The media transport seam.
//
// The negotiation state machine never talks to webrtc directly; it drives
// a `MediaTransport`, and the session creates one per remote peer through
// a `TransportFactory`.  Transport-originated happenings (a gathered ICE
// candidate, a negotiation-needed kick, an incoming remote track) are
// forwarded into the session's event loop over a channel, tagged with the
// remote peer id they belong to.  `rtc.rs` provides the webrtc-rs backed
// implementation; tests use the in-memory fake at the bottom.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::NegotiationError;
use crate::media::{LocalMediaSource, TrackKind};
use crate::signal::{IceCandidateInit, SessionDescription};

// ─── Transport events ───────────────────────────────────────────────────────

/// Metadata of a remote track the transport started receiving.  The
/// presentation layer maps this onto a render target; the core never
/// holds render handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub mime_type: String,
}

/// Point-to-point connectivity of one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Everything a transport can report back to the session loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The set of outgoing tracks/transceivers changed; (re)negotiation
    /// should be considered.
    NegotiationNeeded,
    /// A locally gathered ICE candidate to forward to the remote peer.
    IceCandidate(IceCandidateInit),
    /// A remote track became available.
    RemoteTrack(RemoteTrackInfo),
    /// Connectivity change.
    ConnectionState(TransportConnectionState),
}

/// Channel endpoint transports push their events into, tagged with the
/// remote peer id the transport belongs to.
pub type TransportEventSender = mpsc::UnboundedSender<(String, TransportEvent)>;

// ─── MediaTransport contract ────────────────────────────────────────────────

/// One point-to-point media channel, created fresh per peer entry and
/// never reused.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Requires a remote offer to have been applied first.
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// Discard the pending local offer.  The caller owns the state-machine
    /// side of the rollback; this is only the transport mechanism.
    async fn rollback_local(&self) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidateInit)
        -> Result<(), NegotiationError>;

    /// Whether a remote description has been applied yet.  Candidates
    /// arriving earlier must be buffered by the caller.
    async fn has_remote_description(&self) -> bool;

    /// Close the transport.  Idempotent; in-flight operations may still
    /// complete but their results are ignored by the caller.
    async fn close(&self);
}

// ─── TransportFactory contract ──────────────────────────────────────────────

#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a transport for `remote_peer_id`, attach every local track
    /// as outgoing, and wire transport callbacks into `events`.
    async fn create(
        &self,
        remote_peer_id: &str,
        media: &LocalMediaSource,
        events: TransportEventSender,
    ) -> Result<Arc<dyn MediaTransport>, NegotiationError>;
}

// ─── In-memory fake (test support) ──────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::signal::SdpKind;

    /// Transport double that records descriptions and candidates and can
    /// fail on demand.
    pub struct FakeTransport {
        pub label: String,
        offer_seq: AtomicU32,
        pub local: Mutex<Option<SessionDescription>>,
        pub remote: Mutex<Option<SessionDescription>>,
        pub candidates: Mutex<Vec<IceCandidateInit>>,
        pub closed: AtomicBool,
        pub rollbacks: AtomicU32,
        /// When set, the next `set_local_description` fails once.
        pub fail_next_local: AtomicBool,
        /// When set, the next `set_remote_description` fails once.
        pub fail_next_remote: AtomicBool,
    }

    impl FakeTransport {
        pub fn new(label: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                label: label.into(),
                offer_seq: AtomicU32::new(0),
                local: Mutex::new(None),
                remote: Mutex::new(None),
                candidates: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                rollbacks: AtomicU32::new(0),
                fail_next_local: AtomicBool::new(false),
                fail_next_remote: AtomicBool::new(false),
            })
        }

        pub fn applied_candidates(&self) -> Vec<IceCandidateInit> {
            self.candidates.lock().unwrap().clone()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
            let n = self.offer_seq.fetch_add(1, Ordering::SeqCst);
            Ok(SessionDescription::offer(format!(
                "v=0 {} offer {n}",
                self.label
            )))
        }

        async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
            let remote = self.remote.lock().unwrap();
            match remote.as_ref() {
                Some(desc) if desc.kind == SdpKind::Offer => Ok(SessionDescription::answer(
                    format!("v=0 {} answer-to [{}]", self.label, desc.sdp),
                )),
                _ => Err(NegotiationError::CreateDescription {
                    kind: SdpKind::Answer,
                    reason: "no remote offer applied".into(),
                }),
            }
        }

        async fn set_local_description(
            &self,
            description: SessionDescription,
        ) -> Result<(), NegotiationError> {
            if self.fail_next_local.swap(false, Ordering::SeqCst) {
                return Err(NegotiationError::ApplyLocal("injected failure".into()));
            }
            *self.local.lock().unwrap() = Some(description);
            Ok(())
        }

        async fn set_remote_description(
            &self,
            description: SessionDescription,
        ) -> Result<(), NegotiationError> {
            if self.fail_next_remote.swap(false, Ordering::SeqCst) {
                return Err(NegotiationError::ApplyRemote("injected failure".into()));
            }
            *self.remote.lock().unwrap() = Some(description);
            Ok(())
        }

        async fn rollback_local(&self) -> Result<(), NegotiationError> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            *self.local.lock().unwrap() = None;
            Ok(())
        }

        async fn add_ice_candidate(
            &self,
            candidate: IceCandidateInit,
        ) -> Result<(), NegotiationError> {
            if self.is_closed() {
                return Err(NegotiationError::Closed);
            }
            self.candidates.lock().unwrap().push(candidate);
            Ok(())
        }

        async fn has_remote_description(&self) -> bool {
            self.remote.lock().unwrap().is_some()
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Factory double; keeps every created transport around so tests can
    /// inspect them.
    #[derive(Default)]
    pub struct FakeFactory {
        pub created: Mutex<Vec<(String, Arc<FakeTransport>)>>,
    }

    impl FakeFactory {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn transport_for(&self, remote_peer_id: &str) -> Option<Arc<FakeTransport>> {
            self.created
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| id == remote_peer_id)
                .map(|(_, t)| Arc::clone(t))
        }
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn create(
            &self,
            remote_peer_id: &str,
            _media: &LocalMediaSource,
            _events: TransportEventSender,
        ) -> Result<Arc<dyn MediaTransport>, NegotiationError> {
            let transport = FakeTransport::new(remote_peer_id);
            self.created
                .lock()
                .unwrap()
                .push((remote_peer_id.to_string(), Arc::clone(&transport)));
            Ok(transport)
        }
    }
}
