//! Error types for the Tally protocol codecs.

use thiserror::Error;

/// Errors raised while decoding V1 lines or V2 packets.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    #[error("bad packet signature 0x{byte:02x} at offset {offset}")]
    BadSignature { offset: usize, byte: u8 },

    #[error("unsupported packet version {version} at offset {offset}")]
    UnsupportedVersion { offset: usize, version: u8 },

    #[error("truncated packet at offset {offset}: {reason}")]
    Truncated { offset: usize, reason: &'static str },

    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        offset: usize,
        expected: u32,
        actual: u32,
    },

    #[error("invalid UTF-8 in packet at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("value {0} does not fit a packet number")]
    NumberTooLarge(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, ProtoError>;
