// src/rtc.rs
//
// webrtc-rs backed media transport.
//
// `WebRtcTransportFactory` builds one `RTCPeerConnection` per remote peer
// with the ICE servers from configuration, attaches the local tracks as
// outgoing, and bridges the connection's callbacks onto the session's
// transport event channel.  Unlike a server-side answerer this transport
// trickles ICE: candidates are forwarded as they are gathered instead of
// blocking on gathering completion.
//
// The underlying peer connection supports no rollback operation, neither
// as an explicit rollback description nor implicitly by applying a remote
// offer over a pending local one.  Discarding a pending offer therefore
// replaces the connection wholesale: the transport keeps everything needed
// to stand up a fresh connection (config, tracks, event sender) and swaps
// it in behind a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

use crate::config::MeshConfig;
use crate::error::NegotiationError;
use crate::media::{LocalMediaSource, TrackKind};
use crate::signal::{IceCandidateInit, SdpKind, SessionDescription};
use crate::transport::{
    MediaTransport, RemoteTrackInfo, TransportConnectionState, TransportEvent,
    TransportEventSender, TransportFactory,
};

// ─── Description conversions ────────────────────────────────────────────────

fn to_rtc_description(
    description: &SessionDescription,
) -> Result<RTCSessionDescription, NegotiationError> {
    let result = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp.clone()),
    };
    result.map_err(|e| NegotiationError::CreateDescription {
        kind: description.kind,
        reason: format!("invalid sdp: {e}"),
    })
}

fn from_rtc_description(
    description: &RTCSessionDescription,
) -> Result<SessionDescription, NegotiationError> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp.clone())),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp.clone())),
        other => Err(NegotiationError::CreateDescription {
            kind: SdpKind::Offer,
            reason: format!("unexpected sdp type '{other}'"),
        }),
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> TransportConnectionState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
            TransportConnectionState::New
        }
        RTCPeerConnectionState::Connecting => TransportConnectionState::Connecting,
        RTCPeerConnectionState::Connected => TransportConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => TransportConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => TransportConnectionState::Failed,
        RTCPeerConnectionState::Closed => TransportConnectionState::Closed,
    }
}

// ─── Peer connection construction ───────────────────────────────────────────

/// Build a configured peer connection with the outgoing tracks attached
/// and callbacks wired.  Called at entry creation and again on every
/// rollback rebuild.
async fn build_peer_connection(
    config: &MeshConfig,
    remote_peer_id: &str,
    tracks: &[Arc<dyn TrackLocal + Send + Sync>],
    events: TransportEventSender,
) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| NegotiationError::Transport(format!("codec registration: {e}")))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| NegotiationError::Transport(format!("interceptor registry: {e}")))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let ice_servers: Vec<RTCIceServer> = config
        .ice_servers()
        .into_iter()
        .map(|s| RTCIceServer {
            urls: s.urls,
            username: s.username.unwrap_or_default(),
            credential: s.credential.unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    let rtc_config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    let pc = Arc::new(
        api.new_peer_connection(rtc_config)
            .await
            .map_err(|e| NegotiationError::Transport(format!("peer connection: {e}")))?,
    );

    for track in tracks {
        pc.add_track(Arc::clone(track))
            .await
            .map_err(|e| NegotiationError::Transport(format!("add_track: {e}")))?;
    }
    debug!(
        peer_id = %remote_peer_id,
        tracks = tracks.len(),
        "peer connection built, local tracks attached"
    );

    wire_callbacks(&pc, remote_peer_id, events);
    Ok(pc)
}

// ─── Callback wiring ────────────────────────────────────────────────────────

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, remote_peer_id: &str, events: TransportEventSender) {
    // on_negotiation_needed — track/transceiver changes ask for an offer.
    {
        let events = events.clone();
        let peer_id = remote_peer_id.to_string();
        pc.on_negotiation_needed(Box::new(move || {
            let _ = events.send((peer_id.clone(), TransportEvent::NegotiationNeeded));
            Box::pin(async {})
        }));
    }

    // on_ice_candidate — trickle gathered candidates out.  The `None`
    // sentinel marks end of gathering and carries no information the
    // session needs.
    {
        let events = events.clone();
        let peer_id = remote_peer_id.to_string();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = events.clone();
            let peer_id = peer_id.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send((
                            peer_id,
                            TransportEvent::IceCandidate(IceCandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }),
                        ));
                    }
                    Err(e) => warn!(peer_id = %peer_id, error = %e, "ice candidate serialisation failed"),
                }
            })
        }));
    }

    // on_track — surface remote track metadata; the media itself keeps
    // flowing inside webrtc-rs and is consumed by the renderer.
    {
        let events = events.clone();
        let peer_id = remote_peer_id.to_string();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            let peer_id = peer_id.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    RTPCodecType::Unspecified => {
                        warn!(peer_id = %peer_id, "remote track with unspecified codec type ignored");
                        return;
                    }
                };
                let info = RemoteTrackInfo {
                    id: track.id(),
                    kind,
                    mime_type: track.codec().capability.mime_type.clone(),
                };
                info!(
                    peer_id = %peer_id,
                    track_id = %info.id,
                    kind = %info.kind,
                    mime = %info.mime_type,
                    "remote track received"
                );
                let _ = events.send((peer_id, TransportEvent::RemoteTrack(info)));
            })
        }));
    }

    // on_peer_connection_state_change — connectivity for room events.
    {
        let peer_id = remote_peer_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let _ = events.send((
                peer_id.clone(),
                TransportEvent::ConnectionState(map_connection_state(state)),
            ));
            Box::pin(async {})
        }));
    }
}

// ─── WebRtcTransportFactory ─────────────────────────────────────────────────

/// Creates webrtc-rs peer connections configured from [`MeshConfig`].
pub struct WebRtcTransportFactory {
    config: MeshConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: MeshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        remote_peer_id: &str,
        media: &LocalMediaSource,
        events: TransportEventSender,
    ) -> Result<Arc<dyn MediaTransport>, NegotiationError> {
        let tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> =
            media.tracks().iter().map(|t| t.rtp()).collect();

        let pc =
            build_peer_connection(&self.config, remote_peer_id, &tracks, events.clone()).await?;
        info!(peer_id = %remote_peer_id, tracks = tracks.len(), "webrtc transport created");

        Ok(Arc::new(WebRtcTransport {
            remote_peer_id: remote_peer_id.to_string(),
            config: self.config.clone(),
            tracks,
            events,
            pc: Mutex::new(pc),
            closed: AtomicBool::new(false),
        }))
    }
}

// ─── WebRtcTransport ────────────────────────────────────────────────────────

/// One peer connection, driven through the transport contract.  The inner
/// connection is replaced on rollback, so every operation goes through the
/// lock to pick up the current one.
pub struct WebRtcTransport {
    remote_peer_id: String,
    config: MeshConfig,
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
    events: TransportEventSender,
    pc: Mutex<Arc<RTCPeerConnection>>,
    closed: AtomicBool,
}

impl WebRtcTransport {
    async fn current(&self) -> Arc<RTCPeerConnection> {
        self.pc.lock().await.clone()
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .current()
            .await
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::CreateDescription {
                kind: SdpKind::Offer,
                reason: e.to_string(),
            })?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .current()
            .await
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::CreateDescription {
                kind: SdpKind::Answer,
                reason: e.to_string(),
            })?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let rtc = to_rtc_description(&description)?;
        self.current()
            .await
            .set_local_description(rtc)
            .await
            .map_err(|e| NegotiationError::ApplyLocal(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let rtc = to_rtc_description(&description)?;
        self.current()
            .await
            .set_remote_description(rtc)
            .await
            .map_err(|e| NegotiationError::ApplyRemote(e.to_string()))
    }

    async fn rollback_local(&self) -> Result<(), NegotiationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NegotiationError::Closed);
        }

        // No rollback in the underlying stack: replace the connection
        // with a fresh one carrying the same tracks and callbacks.
        let fresh = build_peer_connection(
            &self.config,
            &self.remote_peer_id,
            &self.tracks,
            self.events.clone(),
        )
        .await
        .map_err(|e| NegotiationError::Rollback(e.to_string()))?;

        let stale = {
            let mut pc = self.pc.lock().await;
            std::mem::replace(&mut *pc, fresh)
        };
        if let Err(e) = stale.close().await {
            debug!(peer_id = %self.remote_peer_id, error = %e, "stale peer connection close failed");
        }
        debug!(
            peer_id = %self.remote_peer_id,
            "pending local offer discarded, peer connection rebuilt"
        );
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidateInit,
    ) -> Result<(), NegotiationError> {
        self.current()
            .await
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            })
            .await
            .map_err(|e| NegotiationError::Candidate(e.to_string()))
    }

    async fn has_remote_description(&self) -> bool {
        self.current().await.remote_description().await.is_some()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.current().await.close().await {
            debug!(error = %e, "peer connection close failed");
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
