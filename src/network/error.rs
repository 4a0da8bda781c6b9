//! Network error types

use thiserror::Error;

/// Errors that can occur in the network subsystem
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed discovery response: expected {expected} bytes, got {actual}")]
    MalformedDiscoveryResponse { expected: usize, actual: usize },

    #[error("Invalid address in discovery response: {0:?}")]
    InvalidDiscoveryAddress(String),

    #[error("No address found for {0}")]
    NoAddress(String),

    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}
