//! XSalsa20-Poly1305 secretbox
//!
//! The message is prefixed with 32 zero bytes before encryption. The first
//! 32 keystream bytes therefore come out unchanged and serve as the
//! Poly1305 one-time key; the tag covers only the ciphertext after the
//! prefix.

use subtle::ConstantTimeEq;

use super::error::CryptoError;
use super::key::SecretKey;
use super::poly1305::{authenticate, POLY1305_KEY_LENGTH, TAG_LENGTH};
use super::salsa20::{xsalsa20_apply_keystream, NONCE_LENGTH};

/// Zero bytes in front of the plaintext
pub const ZERO_PREFIX_LENGTH: usize = 32;

/// Authenticated encryption under a fixed session key
#[derive(Debug, Clone)]
pub struct SecretBox {
    key: SecretKey,
}

impl SecretBox {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    /// Encrypt `buffer` in place and return the tag
    ///
    /// `buffer` holds the zero prefix followed by the plaintext. On return
    /// `buffer[ZERO_PREFIX_LENGTH..]` is the ciphertext; the prefix region is
    /// left holding keystream and must be re-zeroed before reuse.
    pub fn seal_prefixed(
        &self,
        nonce: &[u8; NONCE_LENGTH],
        buffer: &mut [u8],
    ) -> Result<[u8; TAG_LENGTH], CryptoError> {
        if buffer.len() < ZERO_PREFIX_LENGTH {
            return Err(CryptoError::BufferTooSmall {
                needed: ZERO_PREFIX_LENGTH,
                actual: buffer.len(),
            });
        }

        xsalsa20_apply_keystream(self.key.as_bytes(), nonce, buffer);

        let (prefix, ciphertext) = buffer.split_at(ZERO_PREFIX_LENGTH);
        let mut one_time_key = [0u8; POLY1305_KEY_LENGTH];
        one_time_key.copy_from_slice(prefix);

        Ok(authenticate(&one_time_key, ciphertext))
    }

    /// Verify `tag` over `ciphertext` and decrypt it in place
    ///
    /// `ciphertext` is left untouched when verification fails.
    pub fn open_detached(
        &self,
        nonce: &[u8; NONCE_LENGTH],
        tag: &[u8; TAG_LENGTH],
        ciphertext: &mut [u8],
    ) -> Result<(), CryptoError> {
        let mut scratch = vec![0u8; ZERO_PREFIX_LENGTH + ciphertext.len()];
        scratch[ZERO_PREFIX_LENGTH..].copy_from_slice(ciphertext);

        let mut one_time_key = [0u8; POLY1305_KEY_LENGTH];
        xsalsa20_apply_keystream(self.key.as_bytes(), nonce, &mut one_time_key);

        let expected = authenticate(&one_time_key, ciphertext);
        if !bool::from(expected[..].ct_eq(&tag[..])) {
            return Err(CryptoError::AuthenticationFailed);
        }

        xsalsa20_apply_keystream(self.key.as_bytes(), nonce, &mut scratch);
        ciphertext.copy_from_slice(&scratch[ZERO_PREFIX_LENGTH..]);
        Ok(())
    }
}
