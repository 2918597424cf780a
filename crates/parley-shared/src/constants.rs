/// Application name
pub const APP_NAME: &str = "Parley";

/// STOMP protocol version negotiated during the handshake
pub const STOMP_VERSION: &str = "1.2";

/// Default WebSocket endpoint of the messaging server
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";

/// Bound on establishing the raw transport, in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Bound on waiting for the CONNECTED frame, in seconds
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;

/// Bound on the best-effort close performed by `disconnect`, in milliseconds
pub const DISCONNECT_TIMEOUT_MS: u64 = 1_000;

/// Presence keepalive period while logged in, in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 12;

/// Number of message ids remembered for duplicate suppression
pub const DEDUP_CAPACITY: usize = 1_000;

/// Buffer size of the command/event channels between client and transport task
pub const TRANSPORT_CHANNEL_CAPACITY: usize = 256;

/// Default buffer size for `subscribe_stream` receivers
pub const STREAM_CAPACITY: usize = 64;

// Channel keys
pub const ROOM_KEY_PREFIX: &str = "room:";
pub const RECALL_KEY_PREFIX: &str = "recall:";
pub const PRIVATE_MESSAGES_KEY: &str = "private-messages";
pub const PRIVATE_FALLBACK_KEY: &str = "private-messages-fallback";
pub const USER_STATUS_KEY: &str = "user-status";
pub const FRIEND_REQUESTS_KEY: &str = "friend-requests";
pub const ROOM_INVITES_KEY: &str = "room-invites";

// Inbound destinations
pub const PRIVATE_QUEUE_DESTINATION: &str = "/user/queue/private";
pub const USER_STATUS_DESTINATION: &str = "/topic/user-status";
pub const FRIEND_REQUESTS_DESTINATION: &str = "/user/queue/friend-requests";
pub const ROOM_INVITES_DESTINATION: &str = "/user/queue/room-invites";

// Outbound destinations
pub const STATUS_DESTINATION: &str = "/app/user.status";
pub const SESSION_REGISTER_DESTINATION: &str = "/app/session.register";
