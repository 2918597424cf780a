//! Types, payloads and wire constants shared by the Parley transport and
//! client crates.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::DecodeError;
pub use protocol::{InboundMessage, OutboundMessage};
pub use types::{ChannelKey, ConnectionState, JoinOutcome, MessageId, MessageKind, RoomId, UserId};
