// src/peer.rs
//
// Per-remote-peer state: the negotiation state machine position, the
// transport handle, and the per-entry flags the controller works with.
// Exactly one entry exists per remote peer id; a Closed entry leaves the
// peer map and is never revived (a rejoin brings a new peer id and a
// fresh entry).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::signal::IceCandidateInit;
use crate::transport::{MediaTransport, RemoteTrackInfo};

// ─── NegotiationState ───────────────────────────────────────────────────────

/// Offer/answer negotiation position, mirroring the standard signaling
/// states.  In steady state it matches the partner's corresponding state
/// (eventual consistency after message delivery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::HaveLocalOffer => "have-local-offer",
            Self::HaveRemoteOffer => "have-remote-offer",
            Self::Closed => "closed",
        }
    }

    /// Legal transitions.  `Closed` is terminal and reachable from any
    /// state; no other transition skips a state.
    pub fn can_transition(self, to: NegotiationState) -> bool {
        use NegotiationState::*;
        match (self, to) {
            (_, Closed) => true,
            (Stable, HaveLocalOffer) | (Stable, HaveRemoteOffer) => true,
            (HaveLocalOffer, Stable) | (HaveRemoteOffer, Stable) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── PeerConnectionEntry ────────────────────────────────────────────────────

/// Everything tracked for one remote participant.
pub struct PeerConnectionEntry {
    remote_peer_id: String,
    /// Point-to-point media channel, created fresh for this entry.
    pub transport: Arc<dyn MediaTransport>,
    state: NegotiationState,
    /// Guard against re-entrant offer creation while one is in flight.
    pub is_negotiating: bool,
    /// Whether the local side initiates first contact with this peer.
    pub initiator: bool,
    /// ICE candidates that arrived before any remote description.
    pending_candidates: Vec<IceCandidateInit>,
    /// Consecutive failed description steps.
    failures: u32,
    /// Whether `PeerConnected` has been announced for this pair.
    pub connected_announced: bool,
    remote_tracks: Vec<RemoteTrackInfo>,
}

impl PeerConnectionEntry {
    pub fn new(
        remote_peer_id: impl Into<String>,
        transport: Arc<dyn MediaTransport>,
        initiator: bool,
    ) -> Self {
        Self {
            remote_peer_id: remote_peer_id.into(),
            transport,
            state: NegotiationState::Stable,
            is_negotiating: false,
            initiator,
            pending_candidates: Vec::new(),
            failures: 0,
            connected_announced: false,
            remote_tracks: Vec::new(),
        }
    }

    pub fn remote_peer_id(&self) -> &str {
        &self.remote_peer_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    /// Move the state machine.  Invalid transitions are ignored with a
    /// warning — they indicate a controller bug, not a recoverable
    /// condition worth corrupting state over.
    pub(crate) fn transition(&mut self, to: NegotiationState) {
        if self.state == to {
            return;
        }
        if !self.state.can_transition(to) {
            warn!(
                peer_id = %self.remote_peer_id,
                from = %self.state,
                to = %to,
                "invalid negotiation state transition ignored"
            );
            return;
        }
        trace!(
            peer_id = %self.remote_peer_id,
            from = %self.state,
            to = %to,
            "negotiation state transition"
        );
        self.state = to;
    }

    // ── Candidate buffer ────────────────────────────────────────────────

    pub(crate) fn buffer_candidate(&mut self, candidate: IceCandidateInit) {
        debug!(
            peer_id = %self.remote_peer_id,
            buffered = self.pending_candidates.len() + 1,
            "ice candidate arrived before remote description, buffering"
        );
        self.pending_candidates.push(candidate);
    }

    pub(crate) fn take_pending_candidates(&mut self) -> Vec<IceCandidateInit> {
        std::mem::take(&mut self.pending_candidates)
    }

    #[cfg(test)]
    pub(crate) fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    // ── Failure accounting ──────────────────────────────────────────────

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.failures += 1;
        self.failures
    }

    pub(crate) fn clear_failures(&mut self) {
        self.failures = 0;
    }

    // ── Remote tracks ───────────────────────────────────────────────────

    pub(crate) fn add_remote_track(&mut self, info: RemoteTrackInfo) {
        self.remote_tracks.push(info);
    }

    pub fn remote_tracks(&self) -> &[RemoteTrackInfo] {
        &self.remote_tracks
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
