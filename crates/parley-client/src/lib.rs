//! # parley-client
//!
//! Real-time messaging client core: one multiplexed connection carrying
//! room chat, private messages, presence, friend requests, room invites
//! and recall notifications.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use parley_client::{ClientConfig, MessagingClient};
//! use parley_shared::{ChannelKey, RoomId};
//!
//! let client = MessagingClient::with_websocket(ClientConfig::from_env());
//! client.connect("token").await?;
//! client
//!     .subscribe(ChannelKey::room(RoomId(1)), |msg| println!("{msg:?}"))
//!     .await;
//! client.send_chat(RoomId(1), "hello").await?;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod reconnect;
pub mod registry;
pub mod sender;

pub use config::ClientConfig;
pub use connection::{MessagingClient, Session};
pub use dedup::{DedupCache, EvictionPolicy};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{ConnectError, ConnectStage, SendError};
pub use reconnect::ReconnectPolicy;
pub use registry::{Callback, SubscriptionHandle, SubscriptionRegistry};
pub use sender::OutboundSender;
