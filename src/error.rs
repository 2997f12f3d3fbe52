// src/error.rs
//
// Error taxonomy for the signaling/negotiation core.
//
// Propagation policy: errors local to one peer pair never cross over to
// other pairs or to the room session as a whole.  Only `MediaAccessError`
// (at join time) and `RelayError` surface to the top-level caller; every
// per-entry negotiation failure is handled inside the controller and at
// worst turns into a "peer unreachable" room event.  Stale signaling
// traffic (a late answer, a duplicate offer) is never an error value at
// all — it is logged at debug level and dropped.

use thiserror::Error;

use crate::signal::SdpKind;

// ─── MediaAccessError ───────────────────────────────────────────────────────

/// Local capture could not be acquired.  Fatal to joining a room with
/// media; the caller may still join with an empty media source.
#[derive(Debug, Error)]
pub enum MediaAccessError {
    #[error("capture permission denied")]
    PermissionDenied,

    #[error("no capture device matches the requested constraints: {0}")]
    NoDevice(String),

    #[error("capture backend failure: {0}")]
    Backend(String),
}

// ─── RelayError ─────────────────────────────────────────────────────────────

/// The signaling relay refused or failed an operation.
///
/// Non-fatal to existing peer entries: they stall optimistically until the
/// relay client reconnects, and resume signaling afterwards.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("not connected to the signaling relay")]
    Disconnected,

    #[error("target peer '{0}' is not reachable through the relay")]
    UnknownPeer(String),

    #[error("already joined room '{0}'")]
    AlreadyJoined(String),

    #[error("relay transport failure: {0}")]
    Transport(String),
}

// ─── NegotiationError ───────────────────────────────────────────────────────

/// An offer/answer/ICE step failed for a single peer pair.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("failed to create {kind}: {reason}")]
    CreateDescription { kind: SdpKind, reason: String },

    #[error("failed to apply local description: {0}")]
    ApplyLocal(String),

    #[error("failed to apply remote description: {0}")]
    ApplyRemote(String),

    #[error("failed to roll back pending local offer: {0}")]
    Rollback(String),

    #[error("ice candidate rejected: {0}")]
    Candidate(String),

    #[error("transport could not be constructed: {0}")]
    Transport(String),

    #[error("entry is closed")]
    Closed,
}

// ─── SessionError ───────────────────────────────────────────────────────────

/// The only failures `RoomSession::join` can surface.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaAccessError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

// ─── Tests ──────────────────────────────────────────────────────────────────
