// src/lib.rs
//
// MeshLink — room-based multi-peer WebRTC mesh core.

//! Room-scoped WebRTC mesh signaling and negotiation.
//!
//! Every participant in a room keeps one peer connection per remote
//! participant (full mesh).  This crate owns the hard part of that
//! topology: per-pair offer/answer negotiation with glare handling,
//! out-of-order ICE buffering, room membership tracking, and resource
//! teardown.  Media transports and the signaling relay sit behind
//! injected traits, so the negotiation core runs identically against
//! real webrtc peer connections or in-process test doubles.
//!
//! ```no_run
//! use std::sync::Arc;
//! use webrtc_mesh::{
//!     LoopbackHub, MediaConstraints, MeshConfig, RoomSession, SessionContext,
//!     SyntheticCapture, WebRtcTransportFactory,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = LoopbackHub::new();
//!     let config = MeshConfig::default();
//!     let ctx = SessionContext {
//!         relay: Arc::new(hub.client()),
//!         factory: Arc::new(WebRtcTransportFactory::new(config.clone())),
//!         config,
//!     };
//!
//!     let session = RoomSession::join_with_capture(
//!         ctx,
//!         "demo",
//!         &SyntheticCapture,
//!         MediaConstraints::audio_video(),
//!     )
//!     .await?;
//!
//!     let mut events = session.events();
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!
//!     session.leave().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod relay;
pub mod rtc;
pub mod session;
pub mod signal;
pub mod transport;

pub use config::{IceServerConfig, MeshConfig};
pub use error::{MediaAccessError, NegotiationError, RelayError, SessionError};
pub use media::{
    LocalMediaSource, LocalTrack, MediaCapture, MediaConstraints, SyntheticCapture, TrackKind,
};
pub use negotiation::{NegotiationController, Verdict};
pub use peer::{NegotiationState, PeerConnectionEntry};
pub use relay::{LoopbackHub, LoopbackRelay, SignalRelay};
pub use rtc::{WebRtcTransport, WebRtcTransportFactory};
pub use session::{PeerSnapshot, RoomEvent, RoomEventKind, RoomSession, SessionContext};
pub use signal::{
    IceCandidateInit, RelayEvent, RelayStatus, SdpKind, SessionDescription, SignalPayload,
};
pub use transport::{
    MediaTransport, RemoteTrackInfo, TransportConnectionState, TransportEvent,
    TransportEventSender, TransportFactory,
};
