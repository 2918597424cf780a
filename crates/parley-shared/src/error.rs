use thiserror::Error;

use crate::types::MessageKind;

/// Failure to turn an inbound frame body into a typed message.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed {kind} payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload carries no type discriminator")]
    MissingType,

    #[error("Unknown payload type: {0}")]
    UnknownType(String),
}
