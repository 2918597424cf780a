//! WebSocket transport built on tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, trace, warn};

use parley_shared::constants::TRANSPORT_CHANNEL_CAPACITY;

use crate::error::TransportError;
use crate::frame::Frame;
use crate::transport::{Connector, TransportCommand, TransportEvent, TransportLink};

/// Connects to a `ws://` or `wss://` endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        debug!(url = %self.url, "Opening WebSocket");
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        info!(url = %self.url, "WebSocket established");
        Ok(spawn_socket_task(stream))
    }

    fn host(&self) -> String {
        host_of(&self.url)
    }
}

/// Extract the authority part of a URL for the STOMP `host` header.
fn host_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host = authority.rsplit('@').next().unwrap_or(authority);
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host.to_string(),
    }
}

/// Spawn the socket pump and hand back its command/event channels.
fn spawn_socket_task<S>(stream: WebSocketStream<S>) -> TransportLink
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<TransportCommand>(TRANSPORT_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(TRANSPORT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let (mut sink, mut source) = stream.split();

        let reason = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(TransportCommand::Send(frame)) => {
                            let message = match String::from_utf8(frame.encode()) {
                                Ok(text) => Message::Text(text.into()),
                                Err(e) => Message::Binary(e.into_bytes().into()),
                            };
                            if let Err(e) = sink.send(message).await {
                                error!(command = %frame.command, error = %e, "WebSocket write failed");
                                break Some(e.to_string());
                            }
                        }
                        Some(TransportCommand::Shutdown) | None => {
                            debug!("Transport shutdown requested");
                            if let Err(e) = sink.send(Message::Close(None)).await {
                                debug!(error = %e, "Close frame not delivered");
                            }
                            break None;
                        }
                    }
                }

                msg = source.next() => {
                    let data = match msg {
                        Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                        Some(Ok(Message::Binary(data))) => data.to_vec(),
                        Some(Ok(Message::Close(close))) => {
                            break close.map(|c| c.reason.as_str().to_string());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket read failed");
                            break Some(e.to_string());
                        }
                        None => break Some("stream ended".to_string()),
                    };

                    match Frame::decode(&data) {
                        Ok(Some(frame)) => {
                            if event_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                debug!("Event receiver dropped, stopping transport");
                                break None;
                            }
                        }
                        Ok(None) => trace!("Heart-beat received"),
                        Err(e) => {
                            warn!(error = %e, len = data.len(), "Dropping undecodable frame");
                        }
                    }
                }
            }
        };

        let _ = event_tx.send(TransportEvent::Closed { reason }).await;
        info!("WebSocket transport task terminated");
    });

    TransportLink::new(cmd_tx, event_rx)
}
