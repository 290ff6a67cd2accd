//! The Sender half of a uTP flow: the initiator that has application bytes
//! to push across the wire.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::connection::{ConnectionState, OwnedFrame};
use crate::frame::{decode_seq_ascii, Frame, FrameType};
use crate::seq;
use crate::timer::Timer;

/// The initiating side of a uTP flow.
pub struct Sender {
    conn_id_recv: u16,
    conn_id_send: u16,
    seq_nr: u16,
    ack_nr: u16,
    state: ConnectionState,
    last_timestamp_us: u64,
    killed: bool,

    data: Vec<u8>,
    data_offset: usize,
    send_buffer: BTreeMap<u16, OwnedFrame>,
    final_seq_nr: Option<u16>,
    window_open: u16,

    window_size: u16,
    max_payload: usize,

    idle_timer: Timer,
    retry_timer: Timer,
}

impl Sender {
    /// Constructs a new sender holding `data`, not yet connected. Call
    /// [`Sender::create_syn`] to obtain the initial SYN frame.
    pub fn new(data: Vec<u8>, config: &Config) -> Self {
        Self {
            conn_id_recv: 0,
            conn_id_send: 0,
            seq_nr: 0,
            ack_nr: 0,
            state: ConnectionState::None,
            last_timestamp_us: 0,
            killed: false,
            data,
            data_offset: 0,
            send_buffer: BTreeMap::new(),
            final_seq_nr: None,
            window_open: config.window_size,
            window_size: config.window_size,
            max_payload: config.max_payload,
            idle_timer: Timer::new(config.idle_timeout_us),
            retry_timer: Timer::new(config.retry_interval_us),
        }
    }

    pub fn conn_id_recv(&self) -> u16 {
        self.conn_id_recv
    }

    pub fn conn_id_send(&self) -> u16 {
        self.conn_id_send
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Chooses `conn_id_recv` uniformly at random (excluding 0 and 65535, see
    /// DESIGN.md), emits the initial SYN, and transitions to `SYN_SENT`.
    pub fn create_syn(&mut self, now_us: u64) -> OwnedFrame {
        // Excludes both 0 and 65535: 0 would make this connection's own
        // conn_id_recv collide with the table's "ids not yet bound"
        // sentinel, and 65535 would make conn_id_send wrap to 0 for the
        // same reason. See DESIGN.md.
        self.conn_id_recv = 1 + rand::random::<u16>() % 65534;
        self.conn_id_send = seq::next(self.conn_id_recv);
        self.seq_nr = 1;
        self.window_open = self.window_open.saturating_sub(1);

        let frame = OwnedFrame::syn(self.conn_id_recv, now_us, self.window_open, self.seq_nr);
        self.send_buffer.insert(self.seq_nr, frame.clone());
        self.seq_nr = seq::next(self.seq_nr);
        self.state = ConnectionState::SynSent;
        self.last_timestamp_us = now_us;
        self.idle_timer.reset(now_us);
        self.retry_timer.reset(now_us);
        frame
    }

    /// Handles an inbound frame addressed to this connection, returning
    /// zero or more frames to relay to the peer.
    pub fn on_frame(&mut self, frame: &Frame<'_>, now_us: u64) -> Vec<OwnedFrame> {
        self.last_timestamp_us = now_us;
        self.idle_timer.reset(now_us);
        self.retry_timer.reset(now_us);

        if frame.frame_type == FrameType::Reset {
            self.killed = true;
            self.state = ConnectionState::Finalized;
            self.idle_timer.cancel();
            self.retry_timer.cancel();
            return Vec::new();
        }
        if frame.frame_type == FrameType::Fin {
            self.state = ConnectionState::Finalized;
            self.idle_timer.cancel();
            self.retry_timer.cancel();
        }

        if self.send_buffer.remove(&frame.ack_nr).is_some() {
            if self.state == ConnectionState::Connected {
                self.window_open = (self.window_open + 1).min(self.send_buffer.len() as u16);
            } else {
                self.window_open += 1;
            }
            if self.final_seq_nr == Some(frame.ack_nr) {
                self.state = ConnectionState::Finalized;
            }
        }

        if self.killed {
            return Vec::new();
        }

        if frame.frame_type == FrameType::State {
            return self.on_state(frame, now_us);
        }
        Vec::new()
    }

    fn on_state(&mut self, frame: &Frame<'_>, now_us: u64) -> Vec<OwnedFrame> {
        if self.state != ConnectionState::Finalized {
            self.state = ConnectionState::Connected;
        }
        self.ack_nr = frame.seq_nr;

        let mut out = Vec::new();
        let mut retransmission_scheduled = false;

        if let Some(ext_payload) = frame.extension_payload {
            if self.window_open == 0 {
                if let Ok(wanted) = decode_seq_ascii(ext_payload) {
                    if let Some(pending) = self.send_buffer.get_mut(&wanted) {
                        pending.timestamp_us = now_us;
                        pending.timestamp_diff_us = now_us.saturating_sub(frame.timestamp_us) as u32;
                        pending.wnd_size = self.window_open;
                        out.push(pending.clone());
                        retransmission_scheduled = true;
                    }
                }
            }
        }

        while self.window_open > 0 {
            if self.data_offset < self.data.len() {
                let end = (self.data_offset + self.max_payload).min(self.data.len());
                let chunk = self.data[self.data_offset..end].to_vec();
                self.data_offset = end;

                let seq_nr = self.seq_nr;
                self.window_open -= 1;
                let data_frame = OwnedFrame::data(
                    self.conn_id_send,
                    now_us,
                    now_us.saturating_sub(frame.timestamp_us) as u32,
                    self.window_open,
                    seq_nr,
                    self.ack_nr,
                    chunk,
                );
                self.seq_nr = seq::next(self.seq_nr);
                self.send_buffer.insert(seq_nr, data_frame.clone());
                out.push(data_frame);
            } else if self.final_seq_nr.is_some() {
                break;
            } else if !retransmission_scheduled {
                let seq_nr = self.seq_nr;
                self.window_open -= 1;
                let fin = OwnedFrame::fin(
                    self.conn_id_send,
                    now_us,
                    now_us.saturating_sub(frame.timestamp_us) as u32,
                    self.window_open,
                    seq_nr,
                    self.ack_nr,
                );
                self.send_buffer.insert(seq_nr, fin.clone());
                self.final_seq_nr = Some(seq_nr);
                out.push(fin);
                break;
            } else {
                break;
            }
        }

        out
    }

    /// Polls the idle and retry timers. Returns `Some(frame)` if the idle
    /// timer fired and the connection is now dead (nothing further to do),
    /// or an empty vec if only the retry timer's bookkeeping ran (the
    /// sender's own retry discipline never resends unprompted; see
    /// DESIGN.md).
    pub fn poll(&mut self, now_us: u64) -> Vec<OwnedFrame> {
        if self.idle_timer.poll(now_us) {
            self.state = ConnectionState::Finalized;
            self.killed = true;
            self.idle_timer.cancel();
            self.retry_timer.cancel();
            return Vec::new();
        }
        if self.retry_timer.poll(now_us) {
            if self.conn_id_recv == 0
                || self.conn_id_send == 0
                || self.state == ConnectionState::Finalized
            {
                self.retry_timer.cancel();
            }
        }
        Vec::new()
    }

    /// Cancels both timers, marks this connection killed, and — if it had
    /// not already finalized — returns a RESET frame to notify the peer.
    pub fn close(&mut self, now_us: u64) -> Option<OwnedFrame> {
        self.killed = true;
        self.idle_timer.cancel();
        self.retry_timer.cancel();
        if self.state != ConnectionState::Finalized {
            let diff = now_us.saturating_sub(self.last_timestamp_us) as u32;
            self.state = ConnectionState::Finalized;
            Some(OwnedFrame::reset(self.conn_id_send, now_us, diff, self.seq_nr, self.ack_nr))
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        (self.state == ConnectionState::Finalized && self.send_buffer.is_empty()) || self.killed
    }

    pub fn last_timestamp_us(&self) -> u64 {
        self.last_timestamp_us
    }
}
