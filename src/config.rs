use serde::{Deserialize, Serialize};
use tracing::info;

// ---------------------------------------------------------------------------
// MeshLink configuration — loaded from environment variables
// ---------------------------------------------------------------------------

/// Configuration for a mesh session.
///
/// Every field can be set via an environment variable prefixed with
/// `MESHLINK_`.  Defaults are suitable for local development; deployments
/// behind NAT MUST provide TURN settings or direct media will fail for a
/// large share of peer pairs.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    // ── ICE ─────────────────────────────────────────────────────────────
    /// STUN server URLs handed to every peer connection.
    pub stun_urls: Vec<String>,
    /// TURN server URLs (empty when no relay fallback is available).
    pub turn_urls: Vec<String>,
    /// TURN username (long-term credentials).
    pub turn_username: String,
    /// TURN password.
    pub turn_password: String,

    // ── Negotiation ─────────────────────────────────────────────────────
    /// Consecutive description failures tolerated for one peer pair before
    /// the entry is closed and the peer reported unreachable.
    pub negotiation_failure_limit: u32,

    // ── Logging ──────────────────────────────────────────────────────────
    pub log_level: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_urls: Vec::new(),
            turn_username: String::new(),
            turn_password: String::new(),
            negotiation_failure_limit: 3,
            log_level: "info".to_string(),
        }
    }
}

impl MeshConfig {
    /// Load configuration from environment variables.
    ///
    /// Automatically loads a `.env` file if present (via `dotenvy`).
    pub fn from_env() -> Self {
        // Best-effort .env loading — ignore errors.
        let _ = dotenvy::dotenv();

        let stun_urls = env_csv("MESHLINK_STUN_URLS", &["stun:stun.l.google.com:19302"]);
        let turn_urls = env_csv("MESHLINK_TURN_URLS", &[]);
        let turn_username = env_or("MESHLINK_TURN_USERNAME", "");
        let turn_password = env_or("MESHLINK_TURN_PASSWORD", "");

        let negotiation_failure_limit = env_or("MESHLINK_NEGOTIATION_FAILURE_LIMIT", "3")
            .parse::<u32>()
            .unwrap_or(3)
            .max(1);

        let log_level = env_or("MESHLINK_LOG_LEVEL", "info");

        let config = MeshConfig {
            stun_urls,
            turn_urls,
            turn_username,
            turn_password,
            negotiation_failure_limit,
            log_level,
        };

        config.log_summary();
        config
    }

    /// Build the ICE server list for a peer connection.
    ///
    /// STUN entries carry no credentials; TURN entries reuse the shared
    /// long-term credentials.  The same list is JSON-serialisable in the
    /// W3C `RTCIceServer` dictionary shape, so it can be forwarded to
    /// browser peers as-is.
    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        let mut servers: Vec<IceServerConfig> = Vec::new();

        for url in &self.stun_urls {
            servers.push(IceServerConfig {
                urls: vec![url.clone()],
                username: None,
                credential: None,
            });
        }

        for url in &self.turn_urls {
            servers.push(IceServerConfig {
                urls: vec![url.clone()],
                username: Some(self.turn_username.clone()),
                credential: Some(self.turn_password.clone()),
            });
        }

        servers
    }

    fn log_summary(&self) {
        info!("──── MeshLink Configuration ────");
        info!("  stun_urls            : {:?}", self.stun_urls);
        info!("  turn_urls            : {:?}", self.turn_urls);
        info!(
            "  negotiation_failures : {} (limit per peer)",
            self.negotiation_failure_limit
        );
        info!("  log_level            : {}", self.log_level);
        info!("────────────────────────────────");
    }
}

// ---------------------------------------------------------------------------
// ICE server configuration type
// ---------------------------------------------------------------------------

/// ICE server entry in the W3C `RTCIceServer` dictionary shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_csv(key: &str, defaults: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
