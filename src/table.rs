//! Connection Table & Multiplexer.
//!
//! Per-peer `(peer, conn_id) -> Connection` routing, dispatch of inbound
//! frames, unsolicited-SYN receiver spawning, and idle-linger garbage
//! collection, over an owned table rather than a dict-of-dicts keyed by a
//! peer-discovery framework's member objects.

use std::collections::HashMap;
use std::hash::Hash;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Error;
use crate::frame::{Frame, FrameType};
use crate::seq;
use crate::sink::Sink;
use crate::timer::Timer;

/// Per-peer connection table and inbound-frame dispatcher.
pub struct ConnectionTable<P> {
    peers: HashMap<P, HashMap<u16, Connection>>,
    config: Config,
    sweep_timer: Timer,
}

impl<P: Clone + Eq + Hash> ConnectionTable<P> {
    pub fn new(config: Config) -> Self {
        let mut sweep_timer = Timer::new(config.sweep_interval_us);
        sweep_timer.reset(0);
        Self {
            peers: HashMap::new(),
            config,
            sweep_timer,
        }
    }

    /// Registers a new outbound flow and relays its SYN through `sink`.
    pub fn send(&mut self, peer: P, data: Vec<u8>, now_us: u64, sink: &mut impl Sink<P>) {
        let mut sender = Connection::new_sender(data, &self.config);
        let syn = match &mut sender {
            Connection::Sender(s) => s.create_syn(now_us),
            Connection::Receiver(_) => unreachable!(),
        };
        let conn_id = sender.conn_id_recv();
        if let Ok(bytes) = syn.encode() {
            sink.send_frame(&peer, bytes);
        } else {
            log::warn!("failed to encode outbound SYN for new connection {conn_id}");
        }
        self.peers.entry(peer).or_default().insert(conn_id, sender);
    }

    /// Decodes and dispatches one inbound datagram. Returns the assembled
    /// stream bytes if this frame completed the flow.
    pub fn on_frame_received(
        &mut self,
        peer: P,
        bytes: &[u8],
        now_us: u64,
        sink: &mut impl Sink<P>,
    ) -> Option<Vec<u8>> {
        let frame = match Frame::deserialize(bytes, now_us) {
            Ok((frame, _consumed)) => frame,
            Err(e) => {
                log::trace!("dropping malformed uTP frame: {e}");
                return None;
            }
        };

        let alt_id = seq::next(frame.connection_id);
        let conn_table = self.peers.entry(peer.clone()).or_default();

        let key = if conn_table.contains_key(&frame.connection_id) {
            frame.connection_id
        } else if frame.frame_type == FrameType::Syn {
            log::debug!("unsolicited SYN on connection {}, spawning receiver", frame.connection_id);
            conn_table.insert(alt_id, Connection::new_receiver(&self.config));
            alt_id
        } else {
            log::trace!(
                "dropping {:?} for unknown connection {}: {}",
                frame.frame_type,
                frame.connection_id,
                Error::UnknownConnection
            );
            return None;
        };

        let conn = match conn_table.get_mut(&key) {
            Some(conn) => conn,
            None => return None,
        };

        if !conn.frame_is_valid(&frame) {
            log::warn!("protocol violation on connection {key}, dropping frame");
            return None;
        }

        let (outbound, completed) = conn.on_frame(&frame, now_us);
        for out in outbound {
            match out.encode() {
                Ok(bytes) => sink.send_frame(&peer, bytes),
                Err(e) => log::warn!("failed to encode outbound frame: {e}"),
            }
        }

        if conn.is_complete() {
            conn.close(now_us);
        }

        completed
    }

    /// Drives every connection's timers, relays any frames they emit, and
    /// runs the idle-linger sweep when due. Returns `(peer, bytes)` for any
    /// connection that completed purely via a timer-driven event (the
    /// receiver's retry discipline never itself completes a stream, but the
    /// return type stays uniform with `on_frame_received`).
    pub fn poll(&mut self, now_us: u64, sink: &mut impl Sink<P>) {
        for (peer, conns) in self.peers.iter_mut() {
            for conn in conns.values_mut() {
                for out in conn.poll(now_us) {
                    match out.encode() {
                        Ok(bytes) => sink.send_frame(peer, bytes),
                        Err(e) => log::warn!("failed to encode timer-driven frame: {e}"),
                    }
                }
            }
        }

        if self.sweep_timer.poll(now_us) {
            self.sweep(now_us);
        }
    }

    /// Removes completed connections whose idle interval has elapsed, and
    /// drops now-empty per-peer entries. Mirrors `cleanup_connections` in
    /// `utp_community.py`.
    fn sweep(&mut self, now_us: u64) {
        let idle_timeout = self.config.idle_timeout_us;
        self.peers.retain(|_peer, conns| {
            conns.retain(|_id, conn| {
                !(conn.is_complete() && now_us.saturating_sub(conn.last_timestamp_us()) > idle_timeout)
            });
            !conns.is_empty()
        });
    }

    /// Number of live peers with at least one tracked connection.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of tracked connections across all peers.
    pub fn connection_count(&self) -> usize {
        self.peers.values().map(|c| c.len()).sum()
    }
}
