use std::fmt;

use thiserror::Error;

/// Phase of `connect` that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Transport,
    Handshake,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => f.write_str("transport connect"),
            Self::Handshake => f.write_str("handshake"),
        }
    }
}

/// Why `connect` failed. The client is left disconnected and never retries
/// on its own behalf for these; the caller decides.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Timed out during {0}")]
    Timeout(ConnectStage),

    #[error("Handshake rejected by server: {0}")]
    HandshakeRejected(String),

    #[error("Cannot reach server: {0}")]
    TransportUnavailable(String),
}

/// Why an outbound message was not handed to the transport.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Not connected")]
    NotConnected,

    #[error("Failed to encode {kind} message: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Transport closed while sending")]
    Transport,
}
