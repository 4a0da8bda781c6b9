//! voxdispatch - Encrypted voice packet dispatch
//!
//! This library turns encoded Opus frames into encrypted RTP packets,
//! paces their delivery through a packet pump and discovers the external
//! UDP address a voice server sees.

pub mod crypto;
pub mod dispatch;
pub mod network;
pub mod protocol;

pub use crypto::SecretKey;
pub use dispatch::{SendScheduler, SessionHolder};
pub use protocol::{NonceStrategy, PacketEncoder};
