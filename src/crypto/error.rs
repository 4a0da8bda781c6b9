//! Crypto error types

use thiserror::Error;

/// Errors that can occur in the crypto subsystem
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}
