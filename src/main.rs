// src/main.rs
//
// MeshLink demo binary: two sessions meet over an in-process loopback
// relay and negotiate real webrtc transports carrying synthetic tracks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webrtc_mesh::{
    LoopbackHub, MediaConstraints, MeshConfig, RoomEvent, RoomSession, SessionContext,
    SyntheticCapture, WebRtcTransportFactory,
};

const DEMO_ROOM: &str = "demo";

// ─── Session setup ──────────────────────────────────────────────────────────

async fn join_demo_room(name: &'static str, hub: &LoopbackHub, config: &MeshConfig) -> RoomSession {
    let ctx = SessionContext {
        relay: Arc::new(hub.client()),
        factory: Arc::new(WebRtcTransportFactory::new(config.clone())),
        config: config.clone(),
    };

    let session = RoomSession::join_with_capture(
        ctx,
        DEMO_ROOM,
        &SyntheticCapture,
        MediaConstraints::audio_video(),
    )
    .await
    .expect("failed to join demo room");

    info!(
        session = name,
        peer_id = %session.local_peer_id(),
        room_id = %session.room_id(),
        "session joined"
    );
    session
}

// ─── Event logger ───────────────────────────────────────────────────────────

fn spawn_event_logger(
    name: &'static str,
    mut events: broadcast::Receiver<RoomEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(session = name, "{json}"),
                    Err(e) => warn!(session = name, error = %e, "event serialisation failed"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(session = name, missed, "event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ─── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // ── Install rustls CryptoProvider (required by rustls 0.23+) ────────
    // Must happen before any DTLS operation.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // ── Load configuration ──────────────────────────────────────────────
    // Load .env before anything else so MESHLINK_LOG_LEVEL is available.
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("MESHLINK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    let config = MeshConfig::from_env();
    if config.turn_urls.is_empty() {
        warn!("No TURN server configured — peers behind symmetric NAT will fail to connect");
    }

    // ── Run the two-session demo ────────────────────────────────────────

    let hub = LoopbackHub::new();

    let alice = join_demo_room("alice", &hub, &config).await;
    let bob = join_demo_room("bob", &hub, &config).await;

    let _alice_log = spawn_event_logger("alice", alice.events());
    let _bob_log = spawn_event_logger("bob", bob.events());

    // Give negotiation and ICE a moment, then report where things stand.
    tokio::time::sleep(Duration::from_secs(2)).await;

    for (name, session) in [("alice", &alice), ("bob", &bob)] {
        for peer in session.peers().await {
            info!(
                session = name,
                peer_id = %peer.peer_id,
                state = %peer.state,
                initiator = peer.initiator,
                remote_tracks = peer.remote_tracks,
                "peer snapshot"
            );
        }
    }

    alice.leave().await;
    bob.leave().await;
    info!("demo complete");
}
