//! Transport abstraction.
//!
//! A connected transport runs in its own tokio task. The client talks to it
//! through typed command and event channels, the same split the network
//! layer uses everywhere: commands go *into* the task, events come *out*.
//! The task is the single writer of the underlying socket.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::frame::Frame;

/// Commands sent *into* the transport task.
#[derive(Debug)]
pub enum TransportCommand {
    /// Write a frame to the socket.
    Send(Frame),
    /// Close the socket and stop the task.
    Shutdown,
}

/// Events sent *from* the transport task.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete frame arrived from the server.
    Frame(Frame),
    /// The socket closed; no further events follow.
    Closed { reason: Option<String> },
}

/// Both ends of a live transport as seen by the client.
#[derive(Debug)]
pub struct TransportLink {
    pub commands: mpsc::Sender<TransportCommand>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(
        commands: mpsc::Sender<TransportCommand>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { commands, events }
    }
}

/// Opens transports to the messaging server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the raw transport. The STOMP handshake is performed by
    /// the caller over the returned link.
    async fn connect(&self) -> Result<TransportLink, TransportError>;

    /// Value for the STOMP `host` header.
    fn host(&self) -> String;
}
