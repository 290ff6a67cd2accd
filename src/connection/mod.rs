//! Connection state machines: the Sender and Receiver variants that each
//! own one end of a uTP flow.

mod receiver;
mod sender;

pub use receiver::Receiver;
pub use sender::Sender;

use crate::config::Config;
use crate::frame::{Extension, Frame, FrameType};

/// Connection lifecycle state, shared by both Sender and Receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    None,
    SynSent,
    SynRecv,
    Connected,
    Finalized,
}

/// An owned copy of a [`Frame`], used for `send_buffer`/`receive_buffer`
/// storage where a borrowed, buffer-tied `Frame<'a>` would not outlive the
/// decode call that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub frame_type: FrameType,
    pub extension: Extension,
    pub connection_id: u16,
    pub timestamp_us: u64,
    pub timestamp_diff_us: u32,
    pub wnd_size: u16,
    pub seq_nr: u16,
    pub ack_nr: u16,
    pub payload: Vec<u8>,
    pub extension_payload: Option<Vec<u8>>,
}

impl OwnedFrame {
    pub fn from_frame(frame: &Frame<'_>) -> Self {
        Self {
            frame_type: frame.frame_type,
            extension: frame.extension,
            connection_id: frame.connection_id,
            timestamp_us: frame.timestamp_us,
            timestamp_diff_us: frame.timestamp_diff_us,
            wnd_size: frame.wnd_size,
            seq_nr: frame.seq_nr,
            ack_nr: frame.ack_nr,
            payload: frame.payload.to_vec(),
            extension_payload: frame.extension_payload.map(|p| p.to_vec()),
        }
    }

    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            frame_type: self.frame_type,
            extension: self.extension,
            connection_id: self.connection_id,
            timestamp_us: self.timestamp_us,
            timestamp_diff_us: self.timestamp_diff_us,
            wnd_size: self.wnd_size,
            seq_nr: self.seq_nr,
            ack_nr: self.ack_nr,
            payload: &self.payload,
            extension_payload: self.extension_payload.as_deref(),
        }
    }

    /// Encodes this frame, ready to hand to the [`crate::Sink`].
    pub fn encode(&self) -> crate::error::Result<Vec<u8>> {
        let ext_len = self.extension_payload.as_ref().map_or(0, |p| p.len());
        let total = crate::config::HEADER_SIZE
            + if matches!(self.extension, Extension::None) {
                0
            } else {
                crate::config::EXTENSION_HEADER_SIZE + ext_len
            }
            + self.payload.len();
        let mut buf = vec![0u8; total];
        let n = self.as_frame().serialize(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn data(
        connection_id: u16,
        timestamp_us: u64,
        timestamp_diff_us: u32,
        wnd_size: u16,
        seq_nr: u16,
        ack_nr: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
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

    fn fin(
        connection_id: u16,
        timestamp_us: u64,
        timestamp_diff_us: u32,
        wnd_size: u16,
        seq_nr: u16,
        ack_nr: u16,
    ) -> Self {
        Self {
            frame_type: FrameType::Fin,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size,
            seq_nr,
            ack_nr,
            payload: Vec::new(),
            extension_payload: None,
        }
    }

    fn syn(connection_id: u16, timestamp_us: u64, wnd_size: u16, seq_nr: u16) -> Self {
        Self {
            frame_type: FrameType::Syn,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us: 0,
            wnd_size,
            seq_nr,
            ack_nr: 0,
            payload: Vec::new(),
            extension_payload: None,
        }
    }

    fn state(
        connection_id: u16,
        timestamp_us: u64,
        timestamp_diff_us: u32,
        wnd_size: u16,
        seq_nr: u16,
        ack_nr: u16,
    ) -> Self {
        Self {
            frame_type: FrameType::State,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size,
            seq_nr,
            ack_nr,
            payload: Vec::new(),
            extension_payload: None,
        }
    }

    fn single_ack(
        connection_id: u16,
        timestamp_us: u64,
        timestamp_diff_us: u32,
        wnd_size: u16,
        seq_nr: u16,
        ack_nr: u16,
        extension_payload: Vec<u8>,
    ) -> Self {
        Self {
            frame_type: FrameType::State,
            extension: Extension::SingleAck,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size,
            seq_nr,
            ack_nr,
            payload: Vec::new(),
            extension_payload: Some(extension_payload),
        }
    }

    fn reset(connection_id: u16, timestamp_us: u64, timestamp_diff_us: u32, seq_nr: u16, ack_nr: u16) -> Self {
        Self {
            frame_type: FrameType::Reset,
            extension: Extension::None,
            connection_id,
            timestamp_us,
            timestamp_diff_us,
            wnd_size: 0,
            seq_nr,
            ack_nr,
            payload: Vec::new(),
            extension_payload: None,
        }
    }
}

/// Either end of a uTP flow, as stored in the connection table. Dispatch is
/// a thin match over the two state machines; neither variant knows the
/// table exists.
pub enum Connection {
    Sender(Sender),
    Receiver(Receiver),
}

impl Connection {
    pub fn new_sender(data: Vec<u8>, config: &Config) -> Self {
        Connection::Sender(Sender::new(data, config))
    }

    pub fn new_receiver(config: &Config) -> Self {
        Connection::Receiver(Receiver::new(config))
    }

    pub fn conn_id_recv(&self) -> u16 {
        match self {
            Connection::Sender(s) => s.conn_id_recv(),
            Connection::Receiver(r) => r.conn_id_recv(),
        }
    }

    pub fn conn_id_send(&self) -> u16 {
        match self {
            Connection::Sender(s) => s.conn_id_send(),
            Connection::Receiver(r) => r.conn_id_send(),
        }
    }

    /// Version and the type/extension enumerations are already validated by
    /// frame decode; this only checks that `connection_id` matches one of
    /// this connection's bound ids, and only once both ids are non-zero.
    pub fn frame_is_valid(&self, frame: &Frame<'_>) -> bool {
        let (recv, send) = (self.conn_id_recv(), self.conn_id_send());
        if recv == 0 || send == 0 {
            return true;
        }
        frame.connection_id == recv || frame.connection_id == send
    }

    pub fn on_frame(&mut self, frame: &Frame<'_>, now_us: u64) -> (Vec<OwnedFrame>, Option<Vec<u8>>) {
        match self {
            Connection::Sender(s) => (s.on_frame(frame, now_us), None),
            Connection::Receiver(r) => r.on_frame(frame, now_us),
        }
    }

    pub fn poll(&mut self, now_us: u64) -> Vec<OwnedFrame> {
        match self {
            Connection::Sender(s) => s.poll(now_us),
            Connection::Receiver(r) => r.poll(now_us),
        }
    }

    pub fn close(&mut self, now_us: u64) -> Option<OwnedFrame> {
        match self {
            Connection::Sender(s) => s.close(now_us),
            Connection::Receiver(r) => r.close(now_us),
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            Connection::Sender(s) => s.is_complete(),
            Connection::Receiver(r) => r.is_complete(),
        }
    }

    pub fn last_timestamp_us(&self) -> u64 {
        match self {
            Connection::Sender(s) => s.last_timestamp_us(),
            Connection::Receiver(r) => r.last_timestamp_us(),
        }
    }
}
