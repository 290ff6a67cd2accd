//! Frame codec: wire encode/decode of the uTP header, optional extension
//! sub-header, and payload.
//!
//! No checksum travels on this wire format — the overlay authenticates
//! frames before they reach this core, so one here would be redundant.

use crate::config::{EXTENSION_HEADER_SIZE, HEADER_SIZE, VERSION};
use crate::error::{Error, Result};

/// uTP frame type, occupying the low nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0,
    Fin = 1,
    State = 2,
    Reset = 3,
    Syn = 4,
}

impl FrameType {
    pub const fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::Fin),
            2 => Ok(FrameType::State),
            3 => Ok(FrameType::Reset),
            4 => Ok(FrameType::Syn),
            _ => Err(Error::ProtocolViolation),
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// uTP extension type, either carried in the header byte or re-read from
/// the body-level framing bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Extension {
    None = 0,
    SelectiveAck = 1,
    SingleAck = 2,
}

impl Extension {
    pub const fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Extension::None),
            1 => Ok(Extension::SelectiveAck),
            2 => Ok(Extension::SingleAck),
            _ => Err(Error::ProtocolViolation),
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A decoded (or to-be-encoded) uTP frame. The payload and extension
/// payload are borrowed slices into the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub frame_type: FrameType,
    pub extension: Extension,
    pub connection_id: u16,
    /// Reconstructed full microsecond timestamp. On the wire only the low
    /// 32 bits travel; the high bits come from the local clock at decode
    /// time, or are whatever the caller set at encode time.
    pub timestamp_us: u64,
    pub timestamp_diff_us: u32,
    pub wnd_size: u16,
    pub seq_nr: u16,
    pub ack_nr: u16,
    pub payload: &'a [u8],
    pub extension_payload: Option<&'a [u8]>,
}

impl<'a> Frame<'a> {
    /// Convenience constructor for a SYN frame.
    pub fn new_syn(connection_id: u16, timestamp_us: u64, seq_nr: u16) -> Frame<'static> {
        Frame {
            frame_type: FrameType::Syn,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us: 0,
            wnd_size: 0,
            seq_nr,
            ack_nr: 0,
            payload: &[],
            extension_payload: None,
        }
    }

    /// Convenience constructor for a DATA frame.
    pub fn new_data(
        connection_id: u16,
        timestamp_us: u64,
        timestamp_diff_us: u32,
        wnd_size: u16,
        seq_nr: u16,
        ack_nr: u16,
        payload: &'a [u8],
    ) -> Frame<'a> {
        Frame {
            frame_type: FrameType::Data,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size,
            seq_nr,
            ack_nr,
            payload,
            extension_payload: None,
        }
    }

    /// Convenience constructor for a FIN frame.
    pub fn new_fin(
        connection_id: u16,
        timestamp_us: u64,
        timestamp_diff_us: u32,
        wnd_size: u16,
        seq_nr: u16,
        ack_nr: u16,
    ) -> Frame<'static> {
        Frame {
            frame_type: FrameType::Fin,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size,
            seq_nr,
            ack_nr,
            payload: &[],
            extension_payload: None,
        }
    }

    /// Convenience constructor for a RESET frame.
    pub fn new_reset(connection_id: u16, timestamp_us: u64, seq_nr: u16, ack_nr: u16) -> Frame<'static> {
        Frame {
            frame_type: FrameType::Reset,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us: 0,
            wnd_size: 0,
            seq_nr,
            ack_nr,
            payload: &[],
            extension_payload: None,
        }
    }

    /// Convenience constructor for a plain STATE (ack) frame.
    pub fn new_state(
        connection_id: u16,
        timestamp_us: u64,
        timestamp_diff_us: u32,
        wnd_size: u16,
        seq_nr: u16,
        ack_nr: u16,
    ) -> Frame<'static> {
        Frame {
            frame_type: FrameType::State,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size,
            seq_nr,
            ack_nr,
            payload: &[],
            extension_payload: None,
        }
    }

    /// Convenience constructor for a STATE frame carrying a SINGLE_ACK
    /// retransmission request. `extension_payload` is the ASCII-decimal
    /// seq_nr the receiver wants retransmitted.
    pub fn new_single_ack(
        connection_id: u16,
        timestamp_us: u64,
        timestamp_diff_us: u32,
        wnd_size: u16,
        seq_nr: u16,
        ack_nr: u16,
        extension_payload: &'a [u8],
    ) -> Frame<'a> {
        Frame {
            frame_type: FrameType::State,
            extension: Extension::SingleAck,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size,
            seq_nr,
            ack_nr,
            payload: &[],
            extension_payload: Some(extension_payload),
        }
    }

    /// Encodes this frame into `buf`. Returns the number of bytes written.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        let ext_framing = match self.extension {
            Extension::None => 0,
            _ => EXTENSION_HEADER_SIZE + self.extension_payload.map_or(0, |p| p.len()),
        };
        let body_len = ext_framing + self.payload.len();
        let total = HEADER_SIZE + body_len;
        if buf.len() < total {
            return Err(Error::BufferTooSmall);
        }
        if body_len > u16::MAX as usize {
            return Err(Error::BufferTooSmall);
        }

        buf[0] = (VERSION << 4) | self.frame_type.as_u8();
        buf[1] = self.extension.as_u8();
        buf[2..4].copy_from_slice(&self.connection_id.to_be_bytes());
        buf[4..8].copy_from_slice(&(self.timestamp_us as u32).to_be_bytes());
        buf[8..12].copy_from_slice(&self.timestamp_diff_us.to_be_bytes());
        buf[12..14].copy_from_slice(&self.wnd_size.to_be_bytes());
        buf[14..16].copy_from_slice(&self.seq_nr.to_be_bytes());
        buf[16..18].copy_from_slice(&self.ack_nr.to_be_bytes());
        buf[18..20].copy_from_slice(&(body_len as u16).to_be_bytes());

        let mut offset = HEADER_SIZE;
        if !matches!(self.extension, Extension::None) {
            let ext_payload = self.extension_payload.unwrap_or(&[]);
            buf[offset] = self.extension.as_u8();
            buf[offset + 1] = ext_payload.len() as u8;
            offset += EXTENSION_HEADER_SIZE;
            buf[offset..offset + ext_payload.len()].copy_from_slice(ext_payload);
            offset += ext_payload.len();
        }
        buf[offset..offset + self.payload.len()].copy_from_slice(self.payload);

        Ok(total)
    }

    /// Decodes a frame from `buf`. `local_now_us` supplies the high 32 bits
    /// used to reconstruct the full timestamp from the wire's truncated low
    /// 32 bits. Returns the decoded frame and the number of bytes consumed.
    pub fn deserialize(buf: &'a [u8], local_now_us: u64) -> Result<(Self, usize)> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::MalformedFrame);
        }

        let version = buf[0] >> 4;
        if version != VERSION {
            return Err(Error::ProtocolViolation);
        }
        let frame_type = FrameType::from_u8(buf[0] & 0x0F)?;
        let header_extension = Extension::from_u8(buf[1])?;
        let connection_id = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp_low32 = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let timestamp_diff_us = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let wnd_size = u16::from_be_bytes([buf[12], buf[13]]);
        let seq_nr = u16::from_be_bytes([buf[14], buf[15]]);
        let ack_nr = u16::from_be_bytes([buf[16], buf[17]]);
        let body_len = u16::from_be_bytes([buf[18], buf[19]]) as usize;

        let high = local_now_us & !0xFFFF_FFFFu64;
        let timestamp_us = high | timestamp_low32 as u64;

        let body = buf
            .get(HEADER_SIZE..HEADER_SIZE + body_len)
            .ok_or(Error::TruncatedPacket)?;

        let (extension, extension_payload, payload) = match header_extension {
            Extension::None => (Extension::None, None, body),
            _ => {
                if body.len() < EXTENSION_HEADER_SIZE {
                    return Err(Error::InvalidExtension);
                }
                let ext_type = body[0];
                let ext_len = body[1] as usize;
                if body.len() < EXTENSION_HEADER_SIZE + ext_len {
                    return Err(Error::InvalidExtension);
                }
                if ext_type != Extension::SingleAck.as_u8() {
                    return Err(Error::UnsupportedExtension);
                }
                let ext_payload = &body[EXTENSION_HEADER_SIZE..EXTENSION_HEADER_SIZE + ext_len];
                let rest = &body[EXTENSION_HEADER_SIZE + ext_len..];
                (Extension::SingleAck, Some(ext_payload), rest)
            }
        };

        let frame = Frame {
            frame_type,
            extension,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size,
            seq_nr,
            ack_nr,
            payload,
            extension_payload,
        };

        Ok((frame, HEADER_SIZE + body_len))
    }
}

/// Encodes a seq_nr as the ASCII-decimal extension payload used by
/// SINGLE_ACK retransmission requests, writing into `buf` and returning the
/// written slice.
pub fn encode_seq_ascii(seq: u16, buf: &mut [u8; 5]) -> &[u8] {
    let s = seq.to_string();
    let bytes = s.as_bytes();
    buf[..bytes.len()].copy_from_slice(bytes);
    &buf[..bytes.len()]
}

/// Parses an ASCII-decimal seq_nr from a SINGLE_ACK extension payload.
pub fn decode_seq_ascii(payload: &[u8]) -> Result<u16> {
    let s = core::str::from_utf8(payload).map_err(|_| Error::InvalidExtension)?;
    s.parse::<u16>().map_err(|_| Error::InvalidExtension)
}
