// Transport layer: STOMP framing over a single WebSocket, run in a
// dedicated tokio task behind command/event channels.

pub mod error;
pub mod frame;
pub mod memory;
pub mod transport;
pub mod websocket;

pub use error::{FrameError, TransportError};
pub use frame::{Command, Frame};
pub use memory::{memory_transport, MemoryConnector, MemoryListener, MemoryPeer};
pub use transport::{Connector, TransportCommand, TransportEvent, TransportLink};
pub use websocket::WebSocketConnector;
