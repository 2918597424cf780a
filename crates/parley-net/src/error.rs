use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unknown frame command: {0}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("Frame is not terminated by NUL")]
    MissingTerminator,

    #[error("Invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("Frame head is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}
