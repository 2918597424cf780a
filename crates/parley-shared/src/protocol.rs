use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{SESSION_REGISTER_DESTINATION, STATUS_DESTINATION};
use crate::error::DecodeError;
use crate::types::{MessageId, MessageKind, RoomId, UserId};

/// Content type of a chat or private message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

/// A message posted to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned id, absent on some legacy broadcasts
    #[serde(default)]
    pub id: Option<MessageId>,
    pub room_id: RoomId,
    /// Absent on system broadcasts
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub sender_name: String,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub recalled: bool,
}

/// A direct message between two users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    #[serde(default)]
    pub id: Option<MessageId>,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: String,
    pub recipient_id: UserId,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub recalled: bool,
}

/// Presence change of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: UserId,
    #[serde(alias = "online")]
    pub is_online: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FriendRequestEventType {
    Received,
    Accepted,
    Rejected,
    Removed,
}

/// Friend request lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestEvent {
    pub sender_id: UserId,
    pub event_type: FriendRequestEventType,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Invitation to join a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInviteEvent {
    pub room_id: RoomId,
    pub inviter_id: UserId,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A previously delivered message was withdrawn by its sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallEvent {
    pub message_id: MessageId,
    pub room_id: RoomId,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Identifies a message within its kind-stream for duplicate suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub kind: MessageKind,
    pub id: MessageId,
}

/// Every typed payload the server pushes to a subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Chat(ChatMessage),
    Private(PrivateMessage),
    Status(UserStatus),
    FriendRequest(FriendRequestEvent),
    RoomInvite(RoomInviteEvent),
    Recall(RecallEvent),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Chat(_) => MessageKind::Chat,
            Self::Private(_) => MessageKind::Private,
            Self::Status(_) => MessageKind::Status,
            Self::FriendRequest(_) => MessageKind::FriendRequest,
            Self::RoomInvite(_) => MessageKind::RoomInvite,
            Self::Recall(_) => MessageKind::Recall,
        }
    }

    /// Server-assigned id, when the payload carries one.
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Self::Chat(m) => m.id,
            Self::Private(m) => m.id,
            Self::Recall(r) => Some(r.message_id),
            Self::Status(_) | Self::FriendRequest(_) | Self::RoomInvite(_) => None,
        }
    }

    pub fn dedup_key(&self) -> Option<DedupKey> {
        self.id().map(|id| DedupKey {
            kind: self.kind(),
            id,
        })
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Chat(m) => Some(m.timestamp),
            Self::Private(m) => Some(m.timestamp),
            Self::Status(s) => Some(s.timestamp),
            Self::FriendRequest(e) => e.timestamp,
            Self::RoomInvite(e) => e.timestamp,
            Self::Recall(e) => e.timestamp,
        }
    }

    /// Decode a frame body as the payload kind declared by its channel.
    pub fn decode(kind: MessageKind, body: &[u8]) -> Result<Self, DecodeError> {
        let wrap = |source| DecodeError::Payload { kind, source };
        let message = match kind {
            MessageKind::Chat => Self::Chat(serde_json::from_slice(body).map_err(wrap)?),
            MessageKind::Private => Self::Private(serde_json::from_slice(body).map_err(wrap)?),
            MessageKind::Status => Self::Status(serde_json::from_slice(body).map_err(wrap)?),
            MessageKind::FriendRequest => {
                Self::FriendRequest(serde_json::from_slice(body).map_err(wrap)?)
            }
            MessageKind::RoomInvite => {
                Self::RoomInvite(serde_json::from_slice(body).map_err(wrap)?)
            }
            MessageKind::Recall => Self::Recall(serde_json::from_slice(body).map_err(wrap)?),
        };
        Ok(message)
    }

    /// Decode a body that names its own kind in a `type` field.
    pub fn decode_tagged(body: &[u8]) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(DecodeError::MissingType)?;
        let kind: MessageKind = tag.parse().map_err(DecodeError::UnknownType)?;
        Self::decode(kind, body)
    }
}

/// Message to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundChat {
    pub room_id: RoomId,
    pub content: String,
    pub message_type: MessageType,
}

/// Direct message to a single user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPrivate {
    pub recipient_id: UserId,
    pub content: String,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub room_id: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub user_id: UserId,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRegistration {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Everything the client publishes.
///
/// Outbound messages never carry a server id: the server assigns one on
/// acceptance and echoes the stored message back through the inbound path.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Chat(OutboundChat),
    Private(OutboundPrivate),
    Typing(TypingIndicator),
    Status(StatusChange),
    RegisterSession(SessionRegistration),
}

impl OutboundMessage {
    /// Destination derived from the message kind and its target id.
    pub fn destination(&self) -> String {
        match self {
            Self::Chat(m) => format!("/app/chat.send.{}", m.room_id),
            Self::Private(m) => format!("/app/private.send.{}", m.recipient_id),
            Self::Typing(m) => format!("/app/chat.typing.{}", m.room_id),
            Self::Status(_) => STATUS_DESTINATION.to_string(),
            Self::RegisterSession(_) => SESSION_REGISTER_DESTINATION.to_string(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Private(_) => "private",
            Self::Typing(_) => "typing",
            Self::Status(_) => "status",
            Self::RegisterSession(_) => "register-session",
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Chat(m) => serde_json::to_vec(m),
            Self::Private(m) => serde_json::to_vec(m),
            Self::Typing(m) => serde_json::to_vec(m),
            Self::Status(m) => serde_json::to_vec(m),
            Self::RegisterSession(m) => serde_json::to_vec(m),
        }
    }
}
