//! Error types for fedchain

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Malformed data: {0}")]
    Malformed(String),
    #[error("Wrong message type: expected {expected}, got {got}")]
    WrongMessageType { expected: u8, got: u8 },
    #[error("Signature missing")]
    SignatureMissing,
    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),
    #[error("Signature failed to marshal: {0}")]
    SignatureMarshalFailed(String),
    #[error("Failure to unmarshal signature: {0}")]
    SignatureUnmarshalFailed(String),
    #[error("State indeterminate: {0}")]
    StateIndeterminate(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Chain halted: {0}")]
    ChainHalted(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("JSON error: {0}")]
    JsonError(String),
    #[error("Queue error: {0}")]
    QueueError(String),
}

/// Fieldless view of [`ChainError`] for matching on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Malformed,
    WrongMessageType,
    SignatureMissing,
    SignatureInvalid,
    SignatureMarshalFailed,
    SignatureUnmarshalFailed,
    StateIndeterminate,
    Crypto,
    Database,
    InvalidBlock,
    ChainHalted,
    Config,
    Io,
    Json,
    Queue,
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Malformed(_) => ErrorKind::Malformed,
            ChainError::WrongMessageType { .. } => ErrorKind::WrongMessageType,
            ChainError::SignatureMissing => ErrorKind::SignatureMissing,
            ChainError::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            ChainError::SignatureMarshalFailed(_) => ErrorKind::SignatureMarshalFailed,
            ChainError::SignatureUnmarshalFailed(_) => ErrorKind::SignatureUnmarshalFailed,
            ChainError::StateIndeterminate(_) => ErrorKind::StateIndeterminate,
            ChainError::CryptoError(_) => ErrorKind::Crypto,
            ChainError::DatabaseError(_) => ErrorKind::Database,
            ChainError::InvalidBlock(_) => ErrorKind::InvalidBlock,
            ChainError::ChainHalted(_) => ErrorKind::ChainHalted,
            ChainError::ConfigError(_) => ErrorKind::Config,
            ChainError::IoError(_) => ErrorKind::Io,
            ChainError::JsonError(_) => ErrorKind::Json,
            ChainError::QueueError(_) => ErrorKind::Queue,
        }
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        ChainError::Malformed(what.into())
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::JsonError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ChainError::malformed("short").kind(), ErrorKind::Malformed);
        assert_eq!(
            ChainError::WrongMessageType { expected: 0, got: 7 }.kind(),
            ErrorKind::WrongMessageType
        );
        assert_eq!(ChainError::SignatureMissing.kind(), ErrorKind::SignatureMissing);
    }

    #[test]
    fn test_display() {
        let err = ChainError::WrongMessageType { expected: 15, got: 0 };
        assert_eq!(err.to_string(), "Wrong message type: expected 15, got 0");
    }
}
