use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    FRIEND_REQUESTS_DESTINATION, FRIEND_REQUESTS_KEY, PRIVATE_FALLBACK_KEY, PRIVATE_MESSAGES_KEY,
    PRIVATE_QUEUE_DESTINATION, RECALL_KEY_PREFIX, ROOM_INVITES_DESTINATION, ROOM_INVITES_KEY,
    ROOM_KEY_PREFIX, USER_STATUS_DESTINATION, USER_STATUS_KEY,
};

// Server-assigned numeric identifiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoomId(pub i64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of payload carried by an inbound stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Chat,
    Private,
    Status,
    FriendRequest,
    RoomInvite,
    Recall,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Private => "private",
            Self::Status => "status",
            Self::FriendRequest => "friend-request",
            Self::RoomInvite => "room-invite",
            Self::Recall => "recall",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "private" => Ok(Self::Private),
            "status" => Ok(Self::Status),
            "friend-request" => Ok(Self::FriendRequest),
            "room-invite" => Ok(Self::RoomInvite),
            "recall" => Ok(Self::Recall),
            other => Err(other.to_string()),
        }
    }
}

/// Opaque identifier of one logical inbound stream.
///
/// Keys follow the naming convention shared with the server:
/// `room:{roomId}`, `recall:{roomId}`, `private-messages`,
/// `private-messages-fallback`, `user-status`, `friend-requests` and
/// `room-invites`. Any other string is accepted and mapped to a plain
/// topic of the same name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn room(room_id: RoomId) -> Self {
        Self(format!("{ROOM_KEY_PREFIX}{room_id}"))
    }

    pub fn recalls(room_id: RoomId) -> Self {
        Self(format!("{RECALL_KEY_PREFIX}{room_id}"))
    }

    pub fn private_messages() -> Self {
        Self(PRIVATE_MESSAGES_KEY.to_string())
    }

    /// Secondary path for private messages on servers without addressed
    /// user queues. Tracked independently of the primary key.
    pub fn private_fallback() -> Self {
        Self(PRIVATE_FALLBACK_KEY.to_string())
    }

    pub fn user_status() -> Self {
        Self(USER_STATUS_KEY.to_string())
    }

    pub fn friend_requests() -> Self {
        Self(FRIEND_REQUESTS_KEY.to_string())
    }

    pub fn room_invites() -> Self {
        Self(ROOM_INVITES_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Room id embedded in a `room:` or `recall:` key.
    pub fn room_id(&self) -> Option<RoomId> {
        self.0
            .strip_prefix(ROOM_KEY_PREFIX)
            .or_else(|| self.0.strip_prefix(RECALL_KEY_PREFIX))
            .and_then(|id| id.parse::<i64>().ok())
            .map(RoomId)
    }

    /// Payload kind declared by this channel, or `None` for custom keys
    /// whose bodies carry their own `type` discriminator.
    pub fn payload_kind(&self) -> Option<MessageKind> {
        match self.0.as_str() {
            PRIVATE_MESSAGES_KEY | PRIVATE_FALLBACK_KEY => Some(MessageKind::Private),
            USER_STATUS_KEY => Some(MessageKind::Status),
            FRIEND_REQUESTS_KEY => Some(MessageKind::FriendRequest),
            ROOM_INVITES_KEY => Some(MessageKind::RoomInvite),
            key if key.starts_with(ROOM_KEY_PREFIX) && self.room_id().is_some() => {
                Some(MessageKind::Chat)
            }
            key if key.starts_with(RECALL_KEY_PREFIX) && self.room_id().is_some() => {
                Some(MessageKind::Recall)
            }
            _ => None,
        }
    }

    /// Transport destination this key subscribes to.
    ///
    /// The private fallback topic is addressed by the local user id, so it
    /// resolves to `None` until the session knows who we are.
    pub fn destination(&self, own_user: Option<UserId>) -> Option<String> {
        match self.0.as_str() {
            PRIVATE_MESSAGES_KEY => Some(PRIVATE_QUEUE_DESTINATION.to_string()),
            PRIVATE_FALLBACK_KEY => own_user.map(|id| format!("/topic/private.{id}")),
            USER_STATUS_KEY => Some(USER_STATUS_DESTINATION.to_string()),
            FRIEND_REQUESTS_KEY => Some(FRIEND_REQUESTS_DESTINATION.to_string()),
            ROOM_INVITES_KEY => Some(ROOM_INVITES_DESTINATION.to_string()),
            key => match (key.starts_with(ROOM_KEY_PREFIX), self.room_id()) {
                (true, Some(room)) => Some(format!("/topic/room.{room}")),
                (false, Some(room)) => Some(format!("/topic/room.{room}.recall")),
                _ => Some(format!("/topic/{key}")),
            },
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ChannelKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Lifecycle of the single logical link to the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The link dropped and could not be re-established.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of asking the REST collaborator to join a room.
///
/// Legacy servers answer 403 both for "already a member" and for a real
/// authorization failure. The two are kept apart here: the former is only
/// recognised through the explicit `ALREADY_MEMBER` error code (or 409).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
    Forbidden,
    NotFound,
    Failed(u16),
}

impl JoinOutcome {
    pub const ALREADY_MEMBER_CODE: &'static str = "ALREADY_MEMBER";

    pub fn from_response(status: u16, error_code: Option<&str>) -> Self {
        match status {
            200..=299 => Self::Joined,
            409 => Self::AlreadyMember,
            403 if error_code == Some(Self::ALREADY_MEMBER_CODE) => Self::AlreadyMember,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            other => Self::Failed(other),
        }
    }

    /// Whether the user is a member of the room after the call.
    pub fn is_member(&self) -> bool {
        matches!(self, Self::Joined | Self::AlreadyMember)
    }
}
