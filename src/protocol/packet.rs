//! Encrypted voice packet encoding
//!
//! Packet format:
//! - RTP header: 12 bytes
//! - Poly1305 tag: 16 bytes
//! - ciphertext: payload length
//! - nonce suffix: 0, 4 or 24 bytes depending on the nonce strategy

use crate::crypto::{SecretBox, SecretKey, NONCE_LENGTH, TAG_LENGTH, ZERO_PREFIX_LENGTH};

use super::error::ProtocolError;
use super::nonce::NonceStrategy;
use super::rtp::{RtpHeader, RTP_HEADER_LENGTH};

/// Maximum encoded frame size accepted by the encoder
pub const MAX_FRAME_LENGTH: usize = 1024;

/// Largest packet the encoder can produce
pub const MAX_PACKET_LENGTH: usize =
    RTP_HEADER_LENGTH + TAG_LENGTH + MAX_FRAME_LENGTH + NONCE_LENGTH;

const SSRC_INDEX: usize = 8;

/// Per-strategy nonce state
enum NonceState {
    IncrementingCounter { counter: u32 },
    RandomSequence,
    ReuseHeader,
}

impl NonceState {
    fn new(strategy: NonceStrategy) -> Self {
        match strategy {
            NonceStrategy::IncrementingCounter => NonceState::IncrementingCounter { counter: 0 },
            NonceStrategy::RandomSequence => NonceState::RandomSequence,
            NonceStrategy::ReuseHeader => NonceState::ReuseHeader,
        }
    }

    fn strategy(&self) -> NonceStrategy {
        match self {
            NonceState::IncrementingCounter { .. } => NonceStrategy::IncrementingCounter,
            NonceState::RandomSequence => NonceStrategy::RandomSequence,
            NonceState::ReuseHeader => NonceStrategy::ReuseHeader,
        }
    }
}

/// Builds encrypted RTP packets for one session
///
/// Not safe for concurrent use: the header, nonce counter and scratch
/// buffers are reused across calls, so callers serialize access.
pub struct PacketEncoder {
    secret_box: SecretBox,
    header: [u8; RTP_HEADER_LENGTH],
    nonce_state: NonceState,
    /// Zero prefix followed by the payload region; the prefix is never written
    plaintext: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl PacketEncoder {
    /// Create an encoder for the given key, source identifier and nonce strategy
    pub fn new(key: SecretKey, ssrc: u32, strategy: NonceStrategy) -> Self {
        Self {
            secret_box: SecretBox::new(key),
            header: RtpHeader::template(ssrc),
            nonce_state: NonceState::new(strategy),
            plaintext: vec![0u8; ZERO_PREFIX_LENGTH + MAX_FRAME_LENGTH],
            ciphertext: vec![0u8; ZERO_PREFIX_LENGTH + MAX_FRAME_LENGTH],
        }
    }

    /// Source identifier written into every header
    pub fn ssrc(&self) -> u32 {
        let h = &self.header;
        u32::from_be_bytes([
            h[SSRC_INDEX],
            h[SSRC_INDEX + 1],
            h[SSRC_INDEX + 2],
            h[SSRC_INDEX + 3],
        ])
    }

    pub fn nonce_strategy(&self) -> NonceStrategy {
        self.nonce_state.strategy()
    }

    /// Region the caller fills with frame bytes before calling [`encode`](Self::encode)
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.plaintext[ZERO_PREFIX_LENGTH..]
    }

    /// Encrypt the first `payload_length` bytes of the payload region into `out`
    ///
    /// `out` is cleared first and receives the complete wire packet.
    pub fn encode(
        &mut self,
        payload_length: usize,
        sequence: u16,
        timestamp: u32,
        out: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        if payload_length > MAX_FRAME_LENGTH {
            return Err(ProtocolError::FrameTooLarge(payload_length));
        }

        RtpHeader::stamp(&mut self.header, sequence, timestamp);
        let nonce = self.next_nonce();

        let message_length = ZERO_PREFIX_LENGTH + payload_length;
        let sealed = &mut self.ciphertext[..message_length];
        sealed.copy_from_slice(&self.plaintext[..message_length]);
        let tag = self.secret_box.seal_prefixed(&nonce, sealed)?;

        let suffix_length = self.nonce_state.strategy().suffix_length();

        out.clear();
        out.reserve(RTP_HEADER_LENGTH + TAG_LENGTH + payload_length + suffix_length);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&sealed[ZERO_PREFIX_LENGTH..]);
        out.extend_from_slice(&nonce[..suffix_length]);

        Ok(())
    }

    /// Copy `frame` into the payload region and encode it
    pub fn encode_frame(
        &mut self,
        frame: &[u8],
        sequence: u16,
        timestamp: u32,
        out: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        if frame.len() > MAX_FRAME_LENGTH {
            return Err(ProtocolError::FrameTooLarge(frame.len()));
        }

        self.payload_mut()[..frame.len()].copy_from_slice(frame);
        self.encode(frame.len(), sequence, timestamp, out)
    }

    fn next_nonce(&mut self) -> [u8; NONCE_LENGTH] {
        let mut nonce = [0u8; NONCE_LENGTH];

        match &mut self.nonce_state {
            NonceState::IncrementingCounter { counter } => {
                *counter = counter.wrapping_add(1);
                nonce[..4].copy_from_slice(&counter.to_be_bytes());
            }
            NonceState::RandomSequence => {
                nonce = rand::random();
            }
            NonceState::ReuseHeader => {
                nonce[..RTP_HEADER_LENGTH].copy_from_slice(&self.header);
            }
        }

        nonce
    }
}

/// A verified and decrypted voice packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub header: RtpHeader,
    pub payload: Vec<u8>,
}

/// Receiving counterpart of [`PacketEncoder`]
pub struct PacketDecoder {
    secret_box: SecretBox,
    strategy: NonceStrategy,
}

impl PacketDecoder {
    pub fn new(key: SecretKey, strategy: NonceStrategy) -> Self {
        Self {
            secret_box: SecretBox::new(key),
            strategy,
        }
    }

    /// Reconstruct the nonce, verify the tag and decrypt the payload
    pub fn decode(&self, packet: &[u8]) -> Result<DecodedPacket, ProtocolError> {
        let suffix_length = self.strategy.suffix_length();
        if packet.len() < RTP_HEADER_LENGTH + TAG_LENGTH + suffix_length {
            return Err(ProtocolError::PacketTooShort(packet.len()));
        }

        let header = RtpHeader::from_bytes(packet).ok_or(ProtocolError::InvalidHeader)?;
        let body_end = packet.len() - suffix_length;

        let mut nonce = [0u8; NONCE_LENGTH];
        match self.strategy {
            NonceStrategy::ReuseHeader => {
                nonce[..RTP_HEADER_LENGTH].copy_from_slice(&packet[..RTP_HEADER_LENGTH]);
            }
            NonceStrategy::IncrementingCounter | NonceStrategy::RandomSequence => {
                nonce[..suffix_length].copy_from_slice(&packet[body_end..]);
            }
        }

        let mut tag = [0u8; TAG_LENGTH];
        tag.copy_from_slice(&packet[RTP_HEADER_LENGTH..RTP_HEADER_LENGTH + TAG_LENGTH]);

        let mut payload = packet[RTP_HEADER_LENGTH + TAG_LENGTH..body_end].to_vec();
        self.secret_box.open_detached(&nonce, &tag, &mut payload)?;

        Ok(DecodedPacket { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoError;

    const KEY: [u8; 32] = [0x42; 32];
    const SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

    fn encoder(strategy: NonceStrategy) -> PacketEncoder {
        PacketEncoder::new(SecretKey::new(KEY), 0x1234_5678, strategy)
    }

    #[test]
    fn test_packet_layout() {
        let mut encoder = encoder(NonceStrategy::IncrementingCounter);
        let mut out = Vec::new();
        encoder.encode_frame(&SILENCE, 7, 960, &mut out).unwrap();

        assert_eq!(out.len(), RTP_HEADER_LENGTH + TAG_LENGTH + SILENCE.len() + 4);
        assert_eq!(&out[..2], &[0x80, 0x78]);
        assert_eq!(&out[2..4], &7u16.to_be_bytes());
        assert_eq!(&out[4..8], &960u32.to_be_bytes());
        assert_eq!(&out[8..12], &0x1234_5678u32.to_be_bytes());
        assert_eq!(&out[out.len() - 4..], &1u32.to_be_bytes());
    }

    #[test]
    fn test_counter_nonce_increments() {
        let mut encoder = encoder(NonceStrategy::IncrementingCounter);
        let mut out = Vec::new();

        for expected in 1u32..=5 {
            encoder.encode_frame(&SILENCE, 0, 0, &mut out).unwrap();
            assert_eq!(&out[out.len() - 4..], &expected.to_be_bytes());
        }
    }

    #[test]
    fn test_header_nonce_has_no_suffix() {
        let mut encoder = encoder(NonceStrategy::ReuseHeader);
        let mut out = Vec::new();
        encoder.encode_frame(&[1, 2, 3, 4, 5], 1, 2, &mut out).unwrap();

        assert_eq!(out.len(), RTP_HEADER_LENGTH + TAG_LENGTH + 5);
    }

    #[test]
    fn test_random_nonce_suffix_changes() {
        let mut encoder = encoder(NonceStrategy::RandomSequence);
        let mut first = Vec::new();
        let mut second = Vec::new();
        encoder.encode_frame(&SILENCE, 1, 0, &mut first).unwrap();
        encoder.encode_frame(&SILENCE, 1, 0, &mut second).unwrap();

        assert_eq!(first.len(), RTP_HEADER_LENGTH + TAG_LENGTH + SILENCE.len() + 24);
        assert_ne!(&first[first.len() - 24..], &second[second.len() - 24..]);
    }

    #[test]
    fn test_decode_roundtrip_all_strategies() {
        for strategy in NonceStrategy::ALL {
            let mut encoder = encoder(strategy);
            let decoder = PacketDecoder::new(SecretKey::new(KEY), strategy);
            let mut out = Vec::new();

            let frame: Vec<u8> = (0..MAX_FRAME_LENGTH).map(|i| i as u8).collect();
            encoder.encode_frame(&frame, 300, 96_000, &mut out).unwrap();

            let decoded = decoder.decode(&out).unwrap();
            assert_eq!(decoded.payload, frame, "strategy {}", strategy);
            assert_eq!(decoded.header.sequence, 300);
            assert_eq!(decoded.header.timestamp, 96_000);
            assert_eq!(decoded.header.ssrc, 0x1234_5678);
        }
    }

    #[test]
    fn test_payload_region_is_reused() {
        let mut encoder = encoder(NonceStrategy::ReuseHeader);
        let decoder = PacketDecoder::new(SecretKey::new(KEY), NonceStrategy::ReuseHeader);
        let mut out = Vec::new();

        encoder.encode_frame(&[9; 100], 1, 0, &mut out).unwrap();
        encoder.encode_frame(&[5; 10], 2, 0, &mut out).unwrap();

        assert_eq!(decoder.decode(&out).unwrap().payload, vec![5; 10]);
    }

    #[test]
    fn test_header_tamper_detected_with_header_nonce() {
        let mut encoder = encoder(NonceStrategy::ReuseHeader);
        let decoder = PacketDecoder::new(SecretKey::new(KEY), NonceStrategy::ReuseHeader);
        let mut out = Vec::new();
        encoder.encode_frame(&SILENCE, 10, 9600, &mut out).unwrap();

        for index in 2..RTP_HEADER_LENGTH {
            let mut tampered = out.clone();
            tampered[index] ^= 0x01;
            assert_eq!(
                decoder.decode(&tampered),
                Err(ProtocolError::Crypto(CryptoError::AuthenticationFailed))
            );
        }
    }

    #[test]
    fn test_frame_too_large() {
        let mut encoder = encoder(NonceStrategy::ReuseHeader);
        let mut out = Vec::new();

        assert_eq!(
            encoder.encode(MAX_FRAME_LENGTH + 1, 0, 0, &mut out),
            Err(ProtocolError::FrameTooLarge(MAX_FRAME_LENGTH + 1))
        );
    }

    #[test]
    fn test_decode_too_short() {
        let decoder = PacketDecoder::new(SecretKey::new(KEY), NonceStrategy::RandomSequence);
        assert_eq!(
            decoder.decode(&[0x80; 40]),
            Err(ProtocolError::PacketTooShort(40))
        );
    }

    #[test]
    fn test_ssrc_accessor() {
        assert_eq!(encoder(NonceStrategy::ReuseHeader).ssrc(), 0x1234_5678);
    }
}
