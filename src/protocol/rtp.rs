//! RTP header for Opus voice packets
//!
//! Header format (12 bytes, big-endian fields):
//! - version/padding/extension: 1 byte (always 0x80)
//! - payload type: 1 byte (always 0x78)
//! - sequence: 2 bytes
//! - timestamp: 4 bytes (in samples)
//! - ssrc: 4 bytes

/// Header size in bytes
pub const RTP_HEADER_LENGTH: usize = 12;

/// RTP version 2, no padding, no extension, no CSRCs
pub const RTP_VERSION_BYTE: u8 = 0x80;

/// Payload type used for Opus voice
pub const RTP_OPUS_PAYLOAD_TYPE: u8 = 0x78;

const SEQUENCE_INDEX: usize = 2;
const TIMESTAMP_INDEX: usize = 4;
const SSRC_INDEX: usize = 8;

/// Variable fields of an RTP voice header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header template with the fixed bytes and ssrc filled in
    pub fn template(ssrc: u32) -> [u8; RTP_HEADER_LENGTH] {
        let mut header = [0u8; RTP_HEADER_LENGTH];
        header[0] = RTP_VERSION_BYTE;
        header[1] = RTP_OPUS_PAYLOAD_TYPE;
        header[SSRC_INDEX..].copy_from_slice(&ssrc.to_be_bytes());
        header
    }

    /// Overwrite the sequence and timestamp fields of an existing header
    pub fn stamp(header: &mut [u8; RTP_HEADER_LENGTH], sequence: u16, timestamp: u32) {
        header[SEQUENCE_INDEX..TIMESTAMP_INDEX].copy_from_slice(&sequence.to_be_bytes());
        header[TIMESTAMP_INDEX..SSRC_INDEX].copy_from_slice(&timestamp.to_be_bytes());
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; RTP_HEADER_LENGTH] {
        let mut header = Self::template(self.ssrc);
        Self::stamp(&mut header, self.sequence, self.timestamp);
        header
    }

    /// Parse a header from the start of `data`
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < RTP_HEADER_LENGTH {
            return None;
        }

        if data[0] != RTP_VERSION_BYTE || data[1] != RTP_OPUS_PAYLOAD_TYPE {
            return None;
        }

        Some(Self {
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}
