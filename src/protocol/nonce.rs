//! Nonce strategies negotiated for voice encryption

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

/// How the 24-byte nonce of each packet is chosen and transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NonceStrategy {
    /// 32-bit big-endian counter starting at 1, appended to the packet
    #[serde(rename = "xsalsa20_poly1305_lite")]
    IncrementingCounter,
    /// 24 fresh random bytes, appended to the packet
    #[serde(rename = "xsalsa20_poly1305_suffix")]
    RandomSequence,
    /// The RTP header zero-extended to 24 bytes, nothing appended
    #[serde(rename = "xsalsa20_poly1305")]
    ReuseHeader,
}

impl NonceStrategy {
    pub const ALL: [NonceStrategy; 3] = [
        NonceStrategy::ReuseHeader,
        NonceStrategy::RandomSequence,
        NonceStrategy::IncrementingCounter,
    ];

    /// Encryption mode name used during session negotiation
    pub fn mode_name(&self) -> &'static str {
        match self {
            NonceStrategy::IncrementingCounter => "xsalsa20_poly1305_lite",
            NonceStrategy::RandomSequence => "xsalsa20_poly1305_suffix",
            NonceStrategy::ReuseHeader => "xsalsa20_poly1305",
        }
    }

    /// Number of nonce bytes appended after the ciphertext
    pub fn suffix_length(&self) -> usize {
        match self {
            NonceStrategy::IncrementingCounter => 4,
            NonceStrategy::RandomSequence => 24,
            NonceStrategy::ReuseHeader => 0,
        }
    }
}

impl fmt::Display for NonceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode_name())
    }
}

impl FromStr for NonceStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NonceStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.mode_name() == s)
            .ok_or_else(|| ProtocolError::UnknownEncryptionMode(s.to_string()))
    }
}
