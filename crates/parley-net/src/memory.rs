//! In-process transport.
//!
//! `memory_transport()` returns a connector and a listener joined by a
//! channel. Every `connect()` hands the listener a [`MemoryPeer`] that plays
//! the server side of one connection. Used by integration tests and local
//! demos; no sockets are involved.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use parley_shared::constants::TRANSPORT_CHANNEL_CAPACITY;

use crate::error::TransportError;
use crate::frame::{Command, Frame};
use crate::transport::{Connector, TransportCommand, TransportEvent, TransportLink};

/// Create a connected connector/listener pair.
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { accept_tx },
        MemoryListener { accept_rx },
    )
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        let (cmd_tx, cmd_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);

        let peer = MemoryPeer {
            commands: cmd_rx,
            events: event_tx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Unavailable("memory listener dropped".to_string()))?;

        Ok(TransportLink::new(cmd_tx, event_rx))
    }

    fn host(&self) -> String {
        "memory".to_string()
    }
}

/// Accepts connections opened through the paired [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Server side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    commands: mpsc::Receiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
}

impl MemoryPeer {
    /// Next frame written by the client, or `None` once it shut down.
    pub async fn recv(&mut self) -> Option<Frame> {
        match self.commands.recv().await {
            Some(TransportCommand::Send(frame)) => Some(frame),
            Some(TransportCommand::Shutdown) | None => None,
        }
    }

    /// Next frame with the given command, skipping others.
    pub async fn recv_command(&mut self, command: Command) -> Option<Frame> {
        loop {
            let frame = self.recv().await?;
            if frame.command == command {
                return Some(frame);
            }
            debug!(expected = %command, got = %frame.command, "Skipping frame");
        }
    }

    /// Deliver a frame to the client. Returns `false` if it hung up.
    pub async fn send(&self, frame: Frame) -> bool {
        self.events.send(TransportEvent::Frame(frame)).await.is_ok()
    }

    /// Wait for CONNECT and answer CONNECTED with the given extra headers.
    /// Returns the CONNECT frame.
    pub async fn accept_handshake(&mut self, headers: &[(&str, &str)]) -> Option<Frame> {
        let connect = self.recv_command(Command::Connect).await?;
        let mut reply = Frame::connected();
        for (name, value) in headers {
            reply = reply.header(*name, *value);
        }
        self.send(reply).await;
        Some(connect)
    }

    /// Drop the connection as a failing server would.
    pub async fn close(self, reason: Option<String>) {
        let _ = self.events.send(TransportEvent::Closed { reason }).await;
    }
}
