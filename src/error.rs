//! Error types for the uTP core.
//!
//! This module defines all possible errors that can occur while decoding
//! frames or driving a connection.

use core::fmt;

/// Result type alias for uTP core operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error taxonomy for the uTP reliability core.
///
/// Every variant here is either a decode-time failure (dropped silently by
/// the multiplexer, never surfaced to the application) or a local
/// programming-boundary failure (buffer too small to serialize into).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Header shorter than 20 bytes, or a length field exceeds the buffer.
    MalformedFrame,

    /// Advertised `payload_plus_extension_length` exceeds the remaining buffer.
    TruncatedPacket,

    /// Extension sub-body is truncated (the two framing bytes demand more
    /// bytes than remain).
    InvalidExtension,

    /// Extension type is not `NONE` or `SINGLE_ACK`.
    UnsupportedExtension,

    /// A non-SYN frame arrived whose `(peer, connection_id)` is not in the
    /// connection table.
    UnknownConnection,

    /// Version is not 1, or type/extension fall outside their enumerated
    /// sets, or `connection_id` matches neither of the connection's bound ids.
    ProtocolViolation,

    /// The idle timer expired; the connection was killed locally.
    LocalTimeout,

    /// An inbound RESET frame killed the connection.
    HardKill,

    /// The caller's output buffer is too small to hold the encoded frame.
    BufferTooSmall,
}

impl Error {
    /// Returns a human-readable description of the error.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Error::MalformedFrame => "malformed frame",
            Error::TruncatedPacket => "truncated packet",
            Error::InvalidExtension => "invalid extension",
            Error::UnsupportedExtension => "unsupported extension",
            Error::UnknownConnection => "unknown connection",
            Error::ProtocolViolation => "protocol violation",
            Error::LocalTimeout => "local timeout",
            Error::HardKill => "hard kill",
            Error::BufferTooSmall => "buffer too small",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Error {}
