//! Protocol error types

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors that can occur while building or reading voice packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Packet too short: {0} bytes")]
    PacketTooShort(usize),

    #[error("Invalid RTP header")]
    InvalidHeader,

    #[error("Unknown encryption mode: {0}")]
    UnknownEncryptionMode(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
