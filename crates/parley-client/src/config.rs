//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the client can start with no
//! configuration against a local server.

use std::time::Duration;

use parley_shared::constants::{
    CONNECT_TIMEOUT_SECS, DEDUP_CAPACITY, DEFAULT_SERVER_URL, DISCONNECT_TIMEOUT_MS,
    HANDSHAKE_TIMEOUT_SECS, HEARTBEAT_INTERVAL_SECS,
};

use crate::dedup::EvictionPolicy;
use crate::reconnect::ReconnectPolicy;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the messaging server.
    /// Env: `PARLEY_SERVER_URL`
    /// Default: `ws://localhost:8080/ws`
    pub server_url: String,

    /// Bound on opening the raw transport.
    /// Env: `PARLEY_CONNECT_TIMEOUT_SECS`
    /// Default: 10 s
    pub connect_timeout: Duration,

    /// Bound on receiving CONNECTED after the transport is up.
    /// Env: `PARLEY_HANDSHAKE_TIMEOUT_SECS`
    /// Default: 5 s
    pub handshake_timeout: Duration,

    /// Bound on the best-effort close in `disconnect`.
    pub disconnect_timeout: Duration,

    /// Presence keepalive period.
    /// Env: `PARLEY_HEARTBEAT_SECS`
    /// Default: 12 s
    pub heartbeat_interval: Duration,

    /// Number of message ids remembered for duplicate suppression.
    /// Env: `PARLEY_DEDUP_CAPACITY`
    /// Default: 1000
    pub dedup_capacity: usize,

    /// Env: `PARLEY_DEDUP_POLICY` (`evict-oldest` / `clear-all`)
    /// Default: `evict-oldest`
    pub dedup_policy: EvictionPolicy,

    /// Env: `PARLEY_AUTO_RECONNECT` (true/false/1/0),
    /// `PARLEY_RECONNECT_MAX_ATTEMPTS`
    /// Default: disabled, 8 attempts
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            disconnect_timeout: Duration::from_millis(DISCONNECT_TIMEOUT_MS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            dedup_capacity: DEDUP_CAPACITY,
            dedup_policy: EvictionPolicy::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("PARLEY_SERVER_URL") {
            config.server_url = url;
        }

        if let Some(secs) = parse_var::<u64>(&var, "PARLEY_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&var, "PARLEY_HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&var, "PARLEY_HEARTBEAT_SECS") {
            if secs > 0 {
                config.heartbeat_interval = Duration::from_secs(secs);
            } else {
                tracing::warn!("PARLEY_HEARTBEAT_SECS must be > 0, using default");
            }
        }

        if let Some(capacity) = parse_var::<usize>(&var, "PARLEY_DEDUP_CAPACITY") {
            config.dedup_capacity = capacity.max(1);
        }

        if let Some(policy) = parse_var::<EvictionPolicy>(&var, "PARLEY_DEDUP_POLICY") {
            config.dedup_policy = policy;
        }

        if let Some(enabled) = parse_flag(&var, "PARLEY_AUTO_RECONNECT") {
            config.reconnect.enabled = enabled;
        }

        if let Some(attempts) = parse_var::<u32>(&var, "PARLEY_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = attempts;
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = var(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

/// `true`/`false` as parsed by [`bool`], plus `1`/`0`.
fn parse_flag(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    match var(name)?.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => parse_var::<bool>(var, name),
    }
}
