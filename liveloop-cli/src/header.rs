//! RTP fixed header decoding
//!
//! Only what the reception statistics need is extracted: sequence number,
//! timestamp, SSRC and the payload length after CSRCs, header extension and
//! padding are accounted for.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Fixed header size (without CSRC list)
pub const HEADER_SIZE: usize = 12;

/// Only RTP version 2 is accepted
pub const RTP_VERSION: u8 = 2;

/// Header decoding errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unsupported RTP version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid padding length {padding} for {available} payload bytes")]
    InvalidPadding { padding: usize, available: usize },
}

/// Decoded RTP data header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc_count: u8,
    /// Bytes before the payload, including CSRCs and extension
    pub header_len: usize,
    /// Payload bytes, excluding padding
    pub payload_len: usize,
}

impl RtpHeader {
    /// Decode the header of one datagram (network byte order)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_SIZE {
            return Err(HeaderError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = bytes;
        let first = buf.get_u8();
        let second = buf.get_u8();

        let version = first >> 6;
        if version != RTP_VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let has_padding = first & 0x20 != 0;
        let has_extension = first & 0x10 != 0;
        let csrc_count = first & 0x0F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let mut header_len = HEADER_SIZE + 4 * csrc_count as usize;
        Self::ensure(bytes, header_len)?;

        if has_extension {
            Self::ensure(bytes, header_len + 4)?;
            let mut ext = &bytes[header_len + 2..header_len + 4];
            let words = ext.get_u16() as usize;
            header_len += 4 + 4 * words;
            Self::ensure(bytes, header_len)?;
        }

        let mut payload_len = bytes.len() - header_len;
        if has_padding {
            let padding = bytes[bytes.len() - 1] as usize;
            if padding == 0 || padding > payload_len {
                return Err(HeaderError::InvalidPadding {
                    padding,
                    available: payload_len,
                });
            }
            payload_len -= padding;
        }

        Ok(RtpHeader {
            marker: second & 0x80 != 0,
            payload_type: second & 0x7F,
            sequence_number,
            timestamp,
            ssrc,
            csrc_count,
            header_len,
            payload_len,
        })
    }

    fn ensure(bytes: &[u8], expected: usize) -> Result<(), HeaderError> {
        if bytes.len() < expected {
            return Err(HeaderError::InsufficientData {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(())
    }

    /// Encode a plain header (no CSRCs, extension or padding) followed by
    /// `payload`
    pub fn encode(
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        payload_type: u8,
        payload: &[u8],
    ) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(payload_type & 0x7F);
        buf.put_u16(sequence_number);
        buf.put_u32(timestamp);
        buf.put_u32(ssrc);
        buf.put_slice(payload);
        buf
    }
}
