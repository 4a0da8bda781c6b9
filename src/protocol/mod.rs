//! Voice packet protocol
//!
//! RTP framing, nonce strategies and the encrypted packet layout.

mod error;
mod nonce;
mod packet;
mod rtp;

pub use error::ProtocolError;
pub use nonce::NonceStrategy;
pub use packet::{DecodedPacket, PacketDecoder, PacketEncoder, MAX_FRAME_LENGTH, MAX_PACKET_LENGTH};
pub use rtp::{RtpHeader, RTP_HEADER_LENGTH, RTP_OPUS_PAYLOAD_TYPE, RTP_VERSION_BYTE};
