//! Error types shared across the reader, transcoder and persisted state

use std::path::PathBuf;

use thiserror::Error;

/// Custom error type for mdict operations
#[derive(Error, Debug)]
pub enum MdictError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(f64),

    #[error("Decompression error: {0}")]
    DecompressionError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Header parse error: {0}")]
    HeaderParseError(String),

    #[error("Invalid compression type: {0:08x}")]
    InvalidCompressionType(u32),

    #[error("Encrypted file requires passcode")]
    EncryptedFileRequiresPasscode,

    #[error("Reader lock poisoned")]
    Poisoned,
}

/// Result type alias for mdict operations
pub type Result<T> = std::result::Result<T, MdictError>;

/// Failure of the audio transcoding collaborator
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("failed to start transcoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder rejected input: {0}")]
    InvalidInput(String),

    #[error("transcoder did not finish within {0:?}")]
    TimedOut(std::time::Duration),
}

/// Failure reading or writing persisted dictionary state
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
