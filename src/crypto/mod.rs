//! Packet cryptography
//!
//! XSalsa20 stream cipher and Poly1305 one-time authenticator, composed into
//! the secretbox construction used for voice packets.

mod error;
mod key;
mod poly1305;
mod salsa20;
mod secretbox;

pub use error::CryptoError;
pub use key::{SecretKey, KEY_LENGTH};
pub use poly1305::{authenticate, Poly1305, POLY1305_KEY_LENGTH, TAG_LENGTH};
pub use salsa20::{hsalsa20, salsa20_block, xsalsa20_apply_keystream, BLOCK_LENGTH, NONCE_LENGTH};
pub use secretbox::{SecretBox, ZERO_PREFIX_LENGTH};
