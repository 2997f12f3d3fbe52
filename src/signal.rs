// src/signal.rs
//
// Wire model for MeshLink signaling.
//
// Everything a peer exchanges through the relay is represented here as a
// typed, serde-serialisable value: session descriptions, ICE candidates,
// the addressed signaling payloads, and the room-membership events the
// relay delivers back.  Field shapes follow the W3C dictionaries
// (`RTCSessionDescriptionInit`, `RTCIceCandidateInit`) so browser peers
// can speak the same JSON.

use serde::{Deserialize, Serialize};

// ─── Session descriptions ───────────────────────────────────────────────────

/// The two SDP kinds that travel over the relay.
///
/// Rollback is deliberately absent: discarding a pending local offer is a
/// state-machine transition on this side of the wire, never a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session description as produced and consumed by a media transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

// ─── ICE candidates ─────────────────────────────────────────────────────────

/// A single advertised network path, in `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

// ─── Signaling payloads ─────────────────────────────────────────────────────

/// A signaling payload addressed to one specific remote peer.
///
/// ```json
/// { "type": "offer", "sdp": "v=0..." }
/// { "type": "ice-candidate", "candidate": "candidate:...", "sdp_mid": "0" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalPayload {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_mline_index: Option<u16>,
    },
}

impl SignalPayload {
    /// Wrap an offer description for the wire.
    pub fn offer(description: &SessionDescription) -> Self {
        Self::Offer {
            sdp: description.sdp.clone(),
        }
    }

    /// Wrap an answer description for the wire.
    pub fn answer(description: &SessionDescription) -> Self {
        Self::Answer {
            sdp: description.sdp.clone(),
        }
    }

    /// Wrap a locally gathered ICE candidate for the wire.
    pub fn candidate(init: IceCandidateInit) -> Self {
        Self::IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }

    /// Stable string used in logs and filter expressions.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
        }
    }
}

// ─── Relay status ───────────────────────────────────────────────────────────

/// Connection status of the signaling relay itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Connected,
    Disconnected,
}

impl std::fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

// ─── Relay events ───────────────────────────────────────────────────────────

/// Everything the relay can deliver to a joined peer.
///
/// `ExistingPeers` arrives exactly once, right after joining a room.  No
/// ordering guarantee stronger than per-sender FIFO should be assumed for
/// `Signal` events — an ICE candidate may outrun the offer it belongs to,
/// and a `Signal` may even outrun the `PeerJoined` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RelayEvent {
    ExistingPeers {
        peer_ids: Vec<String>,
    },
    PeerJoined {
        peer_id: String,
    },
    PeerLeft {
        peer_id: String,
    },
    Signal {
        from_peer_id: String,
        payload: SignalPayload,
    },
    StatusChanged {
        status: RelayStatus,
    },
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_payload_json_shape() {
        let payload = SignalPayload::offer(&SessionDescription::offer("v=0 test"));
        let json = serde_json::to_string(&payload).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "offer");
        assert_eq!(value["sdp"], "v=0 test");
    }

    #[test]
    fn candidate_payload_omits_absent_fields() {
        let payload = SignalPayload::candidate(IceCandidateInit {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host".into(),
            sdp_mid: None,
            sdp_mline_index: None,
        });
        let json = serde_json::to_string(&payload).unwrap();

        assert!(json.contains("\"type\":\"ice-candidate\""));
        assert!(!json.contains("sdp_mid"));
        assert!(!json.contains("sdp_mline_index"));
    }

    #[test]
    fn signal_payload_round_trips() {
        let payload = SignalPayload::candidate(IceCandidateInit {
            candidate: "candidate:2 1 udp 1694498815 198.51.100.7 61000 typ srflx".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        });
        let json = serde_json::to_string(&payload).unwrap();
        let back: SignalPayload = serde_json::from_str(&json).unwrap();

        assert_eq!(back, payload);
        assert_eq!(back.kind_str(), "ice-candidate");
    }

    #[test]
    fn relay_event_is_tagged() {
        let event = RelayEvent::Signal {
            from_peer_id: "peer_1".into(),
            payload: SignalPayload::answer(&SessionDescription::answer("v=0 a")),
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event"], "signal");
        assert_eq!(value["from_peer_id"], "peer_1");
        assert_eq!(value["payload"]["type"], "answer");
    }

    #[test]
    fn existing_peers_round_trips() {
        let event = RelayEvent::ExistingPeers {
            peer_ids: vec!["a".into(), "b".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: RelayEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
