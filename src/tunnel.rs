//! Simulated tunnel session management.
//!
//! Sessions move through a one-way state machine:
//! `connecting -> active -> disconnected`. There is no path back from
//! `active` to `connecting`; a degraded session must be recreated.
//!
//! The handshake is simulated by a timer task. Instead of a fire-and-forget
//! delay, each session carries a watch channel so callers can await the
//! `active` transition deterministically via [`TunnelSessionManager::wait_until_active`].
use crate::config::TunnelConfig;
use crate::error::{Result, SecurityError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

/// Simulated handshake duration between `connecting` and `active`.
const DEFAULT_HANDSHAKE_DELAY: Duration = Duration::from_secs(1);

/// Sessions older than this fail their health check.
const MAX_SESSION_AGE_MS: i64 = 60 * 60 * 1000;

const ENDPOINTS: [&str; 4] = [
    "ams1.tunnel.securegrid.example:51820",
    "zrh1.tunnel.securegrid.example:51820",
    "sgp1.tunnel.securegrid.example:51820",
    "yto1.tunnel.securegrid.example:51820",
];

/// Lifecycle state of a tunnel session.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Connecting,
    Active,
    Disconnected,
}

/// A logical, time-bounded routing context.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TunnelSession {
    pub session_id: String,
    /// Session creation time, milliseconds since the epoch.
    pub start_time: i64,
    /// Serialized payload bytes pushed through the tunnel. Monotonically
    /// non-decreasing until the session closes.
    pub bytes_transferred: u64,
    pub endpoint: String,
    pub status: TunnelStatus,
}

/// Wire frame wrapped around encapsulated payloads.
#[derive(Serialize, Deserialize, Debug)]
struct TunnelFrame {
    /// Base64 of the serialized payload.
    payload: String,
    /// Truncated random key, simulating per-frame tunnel keying.
    tunnel_key: String,
    timestamp: i64,
}

struct SessionEntry {
    session: TunnelSession,
    status_tx: watch::Sender<TunnelStatus>,
}

/// Creates, encapsulates through, health-checks, and closes simulated
/// tunnel sessions.
#[derive(Clone)]
pub struct TunnelSessionManager {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    handshake_delay: Duration,
}

impl Default for TunnelSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelSessionManager {
    pub fn new() -> Self {
        Self::with_handshake_delay(DEFAULT_HANDSHAKE_DELAY)
    }

    /// Creates a manager with a custom simulated handshake delay.
    pub fn with_handshake_delay(handshake_delay: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            handshake_delay,
        }
    }

    /// Opens a new tunnel session for a user.
    ///
    /// The returned snapshot is in `connecting` state. A timer task flips
    /// the stored session to `active` after the handshake delay; await
    /// [`Self::wait_until_active`] to observe the transition.
    pub async fn create_tunnel(&self, user_id: &str, config: &TunnelConfig) -> TunnelSession {
        let endpoint = ENDPOINTS[OsRng.gen_range(0..ENDPOINTS.len())];

        let session = TunnelSession {
            session_id: Uuid::new_v4().to_string(),
            start_time: chrono::Utc::now().timestamp_millis(),
            bytes_transferred: 0,
            endpoint: endpoint.to_string(),
            status: TunnelStatus::Connecting,
        };

        tracing::info!(
            user_id,
            session_id = %session.session_id,
            endpoint,
            protocol = ?config.protocol,
            "Opening tunnel session"
        );

        let (status_tx, _) = watch::channel(TunnelStatus::Connecting);
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                session.session_id.clone(),
                SessionEntry {
                    session: session.clone(),
                    status_tx,
                },
            );
        }

        let sessions = Arc::clone(&self.sessions);
        let session_id = session.session_id.clone();
        let delay = self.handshake_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut sessions = sessions.write().await;
            if let Some(entry) = sessions.get_mut(&session_id) {
                // Only a still-connecting session completes its handshake;
                // a close racing the timer wins.
                if entry.session.status == TunnelStatus::Connecting {
                    entry.session.status = TunnelStatus::Active;
                    let _ = entry.status_tx.send(TunnelStatus::Active);
                    tracing::info!(session_id = %session_id, "Tunnel session active");
                }
            }
        });

        session
    }

    /// Waits until the session completes its handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::TunnelInactive`] if the session is unknown
    /// or disconnects before ever becoming active.
    pub async fn wait_until_active(&self, session_id: &str) -> Result<()> {
        let mut status_rx = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| SecurityError::TunnelInactive(session_id.to_string()))?;
            entry.status_tx.subscribe()
        };

        loop {
            match *status_rx.borrow() {
                TunnelStatus::Active => return Ok(()),
                TunnelStatus::Disconnected => {
                    return Err(SecurityError::TunnelInactive(session_id.to_string()))
                }
                TunnelStatus::Connecting => {}
            }
            if status_rx.changed().await.is_err() {
                // Sender dropped, session was removed.
                return Err(SecurityError::TunnelInactive(session_id.to_string()));
            }
        }
    }

    /// Wraps a payload for transmission through an active tunnel.
    ///
    /// The payload is serialized, base64-encoded, framed with a truncated
    /// random tunnel key and a timestamp, and the frame is base64-encoded
    /// again. The serialized payload length (not the wrapped length) is
    /// added to the session's byte counter.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::TunnelInactive`] unless the session exists
    /// and is `active`.
    pub async fn encapsulate_request(
        &self,
        session_id: &str,
        data: &serde_json::Value,
    ) -> Result<String> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| SecurityError::TunnelInactive(session_id.to_string()))?;
        if entry.session.status != TunnelStatus::Active {
            return Err(SecurityError::TunnelInactive(session_id.to_string()));
        }

        let serialized = serde_json::to_string(data)?;

        let mut key_bytes = [0u8; 16];
        getrandom::getrandom(&mut key_bytes)
            .map_err(|e| SecurityError::RandomSource(e.to_string()))?;
        let mut tunnel_key = hex::encode(key_bytes);
        tunnel_key.truncate(16);

        let frame = TunnelFrame {
            payload: BASE64.encode(serialized.as_bytes()),
            tunnel_key,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        entry.session.bytes_transferred += serialized.len() as u64;
        tracing::debug!(
            session_id,
            bytes = serialized.len(),
            total = entry.session.bytes_transferred,
            "Encapsulated request"
        );

        Ok(BASE64.encode(serde_json::to_string(&frame)?.as_bytes()))
    }

    /// Unwraps a tunnel frame back into its payload.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::InvalidTunnelData`] on any decode or parse
    /// failure.
    pub fn unwrap_from_tunnel(&self, wrapped: &str) -> Result<serde_json::Value> {
        let frame_bytes = BASE64
            .decode(wrapped)
            .map_err(|e| SecurityError::InvalidTunnelData(format!("outer base64: {}", e)))?;
        let frame: TunnelFrame = serde_json::from_slice(&frame_bytes)
            .map_err(|e| SecurityError::InvalidTunnelData(format!("frame: {}", e)))?;
        let payload_bytes = BASE64
            .decode(&frame.payload)
            .map_err(|e| SecurityError::InvalidTunnelData(format!("payload base64: {}", e)))?;

        serde_json::from_slice(&payload_bytes)
            .map_err(|e| SecurityError::InvalidTunnelData(format!("payload: {}", e)))
    }

    /// Closes a session: marks it disconnected and drops it from the active
    /// set. Closing an unknown session is a no-op.
    pub async fn close_tunnel(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(mut entry) = sessions.remove(session_id) {
            entry.session.status = TunnelStatus::Disconnected;
            let _ = entry.status_tx.send(TunnelStatus::Disconnected);
            tracing::info!(
                session_id,
                bytes_transferred = entry.session.bytes_transferred,
                "Closed tunnel session"
            );
        }
    }

    /// Advisory health check: true only for an `active` session younger
    /// than one hour. Never remediates; a failed check leaves the session
    /// untouched.
    pub async fn health_check(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        let Some(entry) = sessions.get(session_id) else {
            return false;
        };
        if entry.session.status != TunnelStatus::Active {
            return false;
        }

        let age_ms = chrono::Utc::now().timestamp_millis() - entry.session.start_time;
        age_ms <= MAX_SESSION_AGE_MS
    }

    /// Snapshot of a session's current state, if it is still tracked.
    pub async fn session(&self, session_id: &str) -> Option<TunnelSession> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|e| e.session.clone())
    }
}
