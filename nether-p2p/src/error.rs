use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),

    #[error("frame is missing its end marker")]
    MissingEndMarker,

    #[error("part {part} outside 1..={total}")]
    PartOutOfRange { part: usize, total: usize },

    #[error("message {id} announced {expected} parts, frame says {found}")]
    TotalMismatch { id: i64, expected: usize, found: usize },

    #[error("reassembled message is not valid UTF-8")]
    InvalidUtf8,

    #[error("message too large: {0} parts")]
    TooLarge(usize),
}

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Closed,
}

/// A wire command with missing or unparseable arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{command}: missing argument")]
    MissingArgument { command: &'static str },

    #[error("{command}: invalid argument {value:?}")]
    InvalidArgument { command: &'static str, value: String },
}
