use thiserror::Error;

use super::services::PolicyRejection;

pub type Result<T> = std::result::Result<T, BTCP2PError>;

///! BTCP2PError represents an error in the BTC proto or in the peer pool
#[derive(Debug, Error)]
pub enum BTCP2PError {
    #[error("Unknown network")]
    UnknowNetwork,

    #[error("Failed to read or write buffer")]
    BufferIOError(#[from] std::io::Error),

    #[error("Failed to dial peer: {0}")]
    Dial(#[source] std::io::Error),

    #[error("Failed to write to peer: {0}")]
    Write(#[source] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid header length {0}, expected 24")]
    InvalidHeaderLength(usize),

    #[error("Payload too short: needed {needed} bytes, got {available}")]
    PayloadTooShort { needed: usize, available: usize },

    #[error("Invalid payload length {actual}, expected {expected}")]
    InvalidPayloadLength { expected: usize, actual: usize },

    #[error("Invalid inventory length: {count} entries need {needed} bytes, got {available}")]
    InvalidLength {
        count: usize,
        needed: usize,
        available: usize,
    },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid checksum")]
    InvalidChecksum,

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Failed on decode bytes")]
    DecodeError(#[from] std::array::TryFromSliceError),

    #[error("Failed to decode command")]
    DecodeCommandError(#[from] std::string::FromUtf8Error),

    #[error("Unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: &'static str, got: String },

    #[error("Peer rejected by service policy: {0}")]
    PolicyRejected(PolicyRejection),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("No DNS seeds could be resolved")]
    NoSeedsFound,

    #[error("No available peer addresses")]
    NoAvailableAddresses,

    #[error("Exceeded {0} connection attempts")]
    MaxAttemptsExceeded(usize),
}
