//! Outbound sender.
//!
//! Builds typed outbound messages, serializes them, and hands them to the
//! transport task, which is the only writer of the socket. "Sent" means
//! handed to the transport: nothing is acknowledged, queued, or retried.
//! While disconnected every send is a logged no-op.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_net::{Frame, TransportCommand};
use parley_shared::protocol::{
    MessageType, OutboundChat, OutboundMessage, OutboundPrivate, SessionRegistration,
    StatusChange, TypingIndicator,
};
use parley_shared::types::{RoomId, UserId};

use crate::error::SendError;

/// Write side of the current connection generation.
#[derive(Debug, Clone)]
pub(crate) struct Writer {
    pub generation: u64,
    pub commands: mpsc::Sender<TransportCommand>,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OutboundSender {
    writer: Arc<RwLock<Option<Writer>>>,
}

impl OutboundSender {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, writer: Writer) {
        *self.writer.write().unwrap_or_else(PoisonError::into_inner) = Some(writer);
    }

    pub(crate) fn detach(&self) -> Option<Writer> {
        self.writer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn writer(&self) -> Option<Writer> {
        self.writer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A writer is attached and its transport task is still running.
    pub fn is_attached(&self) -> bool {
        self.writer().is_some_and(|w| !w.commands.is_closed())
    }

    pub async fn send_chat(&self, room_id: RoomId, content: impl Into<String>) -> Result<(), SendError> {
        self.send(OutboundMessage::Chat(OutboundChat {
            room_id,
            content: content.into(),
            message_type: MessageType::Text,
        }))
        .await
    }

    pub async fn send_private(
        &self,
        recipient_id: UserId,
        content: impl Into<String>,
    ) -> Result<(), SendError> {
        self.send(OutboundMessage::Private(OutboundPrivate {
            recipient_id,
            content: content.into(),
            message_type: MessageType::Text,
        }))
        .await
    }

    /// Typing indicators carry the session identity when one is known.
    pub async fn send_typing(&self, room_id: RoomId, is_typing: bool) -> Result<(), SendError> {
        let (user_id, username) = self
            .writer()
            .map(|w| (w.user_id, w.username))
            .unwrap_or_default();
        self.send(OutboundMessage::Typing(TypingIndicator {
            room_id,
            user_id,
            username,
            is_typing,
        }))
        .await
    }

    pub async fn send_status(&self, user_id: UserId, is_online: bool) -> Result<(), SendError> {
        self.send(OutboundMessage::Status(StatusChange { user_id, is_online }))
            .await
    }

    pub async fn register_session(&self, user_id: UserId) -> Result<(), SendError> {
        let username = self.writer().and_then(|w| w.username);
        self.send(OutboundMessage::RegisterSession(SessionRegistration {
            user_id,
            username,
        }))
        .await
    }

    pub async fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        let kind = message.kind_name();
        let body = message
            .to_json()
            .map_err(|source| SendError::Encode { kind, source })?;
        let destination = message.destination();

        let result = self.send_frame(Frame::send(&destination, body)).await;
        match &result {
            Ok(()) => debug!(kind, destination = %destination, "Message handed to transport"),
            Err(SendError::NotConnected) => {
                debug!(kind, destination = %destination, "Not connected, message dropped")
            }
            Err(e) => warn!(kind, destination = %destination, error = %e, "Send failed"),
        }
        result
    }

    /// Hand a raw frame to the current transport.
    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<(), SendError> {
        let writer = self.writer().ok_or(SendError::NotConnected)?;
        writer
            .commands
            .send(TransportCommand::Send(frame))
            .await
            .map_err(|_| SendError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached(user_id: Option<UserId>) -> (OutboundSender, mpsc::Receiver<TransportCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let sender = OutboundSender::new();
        sender.attach(Writer {
            generation: 1,
            commands: tx,
            user_id,
            username: Some("ana".into()),
        });
        (sender, rx)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<TransportCommand>) -> Frame {
        match rx.recv().await {
            Some(TransportCommand::Send(frame)) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_while_detached_is_noop() {
        let sender = OutboundSender::new();
        let result = sender.send_chat(RoomId(1), "hello").await;
        assert!(matches!(result, Err(SendError::NotConnected)));
    }

    #[tokio::test]
    async fn test_chat_goes_to_room_destination() {
        let (sender, mut rx) = attached(Some(UserId(3)));
        sender.send_chat(RoomId(4), "hello").await.unwrap();

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.get("destination"), Some("/app/chat.send.4"));
        let body: serde_json::Value = serde_json::from_slice(&frame.body).unwrap();
        assert_eq!(body["content"], "hello");
    }

    #[tokio::test]
    async fn test_typing_carries_identity() {
        let (sender, mut rx) = attached(Some(UserId(3)));
        sender.send_typing(RoomId(4), true).await.unwrap();

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame.get("destination"), Some("/app/chat.typing.4"));
        let body: serde_json::Value = serde_json::from_slice(&frame.body).unwrap();
        assert_eq!(body["userId"], 3);
        assert_eq!(body["username"], "ana");
        assert_eq!(body["isTyping"], true);
    }

    #[tokio::test]
    async fn test_closed_transport_reports_error() {
        let (sender, rx) = attached(None);
        drop(rx);
        assert!(!sender.is_attached());
        assert!(matches!(
            sender.send_status(UserId(1), true).await,
            Err(SendError::Transport)
        ));
    }

    #[tokio::test]
    async fn test_detach_stops_delivery() {
        let (sender, _rx) = attached(None);
        assert!(sender.detach().is_some());
        assert!(matches!(
            sender.send_private(UserId(2), "psst").await,
            Err(SendError::NotConnected)
        ));
    }
}
