// src/media.rs
//
// Local media ownership.
//
// `LocalMediaSource` holds the session's outgoing tracks.  It is acquired
// once per session through a `MediaCapture` capability and shared by
// reference into every peer transport — every pair transmits the same
// underlying tracks.  Releasing the source stops each track exactly once,
// no matter how many times teardown runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::MediaAccessError;

// ─── Track kind ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Constraints ────────────────────────────────────────────────────────────

/// What the session wants to capture, in `getUserMedia` terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }
}

// ─── LocalTrack ─────────────────────────────────────────────────────────────

/// One outgoing track plus the machinery to stop it.
///
/// The capture pipeline feeding the track watches `cancellation()`; once
/// the token fires, no further samples are written.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    rtp: Arc<dyn TrackLocal + Send + Sync>,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, rtp: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self {
            id: format!("track_{}", uuid::Uuid::new_v4()),
            kind,
            rtp,
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Handle attached to peer transports as an outgoing track.
    pub fn rtp(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtp)
    }

    /// Token the capture pipeline watches; cancelled on stop.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the track.  Returns `true` only for the call that actually
    /// stopped it.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        debug!(track_id = %self.id, kind = %self.kind, "local track stopped");
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

// The raw track handle carries no Debug, so the derive is off the table.
impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

// ─── MediaCapture boundary ──────────────────────────────────────────────────

/// Capability to request capture handles.  Device enumeration and
/// permission prompts live behind this boundary, outside the core.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<LocalTrack>, MediaAccessError>;
}

// ─── LocalMediaSource ───────────────────────────────────────────────────────

/// The session's local tracks, shared read-only across all peer entries.
pub struct LocalMediaSource {
    tracks: Vec<LocalTrack>,
    released: AtomicBool,
}

impl LocalMediaSource {
    /// Request capture handles for `constraints`.
    pub async fn acquire(
        capture: &dyn MediaCapture,
        constraints: MediaConstraints,
    ) -> Result<Self, MediaAccessError> {
        let tracks = capture.acquire(constraints).await?;
        info!(tracks = tracks.len(), "local media acquired");
        Ok(Self {
            tracks,
            released: AtomicBool::new(false),
        })
    }

    /// A source with no tracks — joining a room media-less (degraded mode).
    pub fn empty() -> Self {
        Self {
            tracks: Vec::new(),
            released: AtomicBool::new(false),
        }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Stop every held track.  Idempotent; each track stops exactly once.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!("local media already released");
            return;
        }
        let stopped = self.tracks.iter().filter(|t| t.stop()).count();
        info!(stopped, "local media released");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LocalMediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMediaSource")
            .field("tracks", &self.tracks)
            .field("released", &self.is_released())
            .finish()
    }
}

// ─── SyntheticCapture ───────────────────────────────────────────────────────

/// Capture implementation producing silent/blank sample tracks.  Used by
/// the demo binary and anywhere a real device is not available.
pub struct SyntheticCapture;

#[async_trait]
impl MediaCapture for SyntheticCapture {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<LocalTrack>, MediaAccessError> {
        if constraints.is_empty() {
            return Err(MediaAccessError::NoDevice(
                "neither audio nor video requested".into(),
            ));
        }

        let mut tracks = Vec::new();
        if constraints.video {
            let rtp = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90_000,
                    ..Default::default()
                },
                "video".to_owned(),
                "meshlink-local".to_owned(),
            ));
            tracks.push(LocalTrack::new(TrackKind::Video, rtp));
        }
        if constraints.audio {
            let rtp = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48_000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_owned(),
                "meshlink-local".to_owned(),
            ));
            tracks.push(LocalTrack::new(TrackKind::Audio, rtp));
        }
        Ok(tracks)
    }
}

// ─── Test captures ──────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) struct DenyingCapture;

#[cfg(test)]
#[async_trait]
impl MediaCapture for DenyingCapture {
    async fn acquire(
        &self,
        _constraints: MediaConstraints,
    ) -> Result<Vec<LocalTrack>, MediaAccessError> {
        Err(MediaAccessError::PermissionDenied)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_capture_honors_constraints() {
        let source = LocalMediaSource::acquire(
            &SyntheticCapture,
            MediaConstraints {
                audio: true,
                video: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(source.tracks().len(), 1);
        assert_eq!(source.tracks()[0].kind(), TrackKind::Audio);
    }

    #[tokio::test]
    async fn empty_constraints_fail_with_no_device() {
        let err = SyntheticCapture
            .acquire(MediaConstraints {
                audio: false,
                video: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MediaAccessError::NoDevice(_)));
    }

    #[tokio::test]
    async fn denied_capture_is_fatal() {
        let err = LocalMediaSource::acquire(&DenyingCapture, MediaConstraints::audio_video())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaAccessError::PermissionDenied));
    }

    #[tokio::test]
    async fn release_stops_each_track_exactly_once() {
        let source = LocalMediaSource::acquire(&SyntheticCapture, MediaConstraints::audio_video())
            .await
            .unwrap();
        let token = source.tracks()[0].cancellation();

        source.release();
        source.release();

        assert!(source.is_released());
        assert!(token.is_cancelled());
        assert!(format!("{source:?}").contains("released: true"));
        for track in source.tracks() {
            assert!(track.is_stopped());
            // A later stop attempt reports it had already happened.
            assert!(!track.stop());
        }
    }
}
