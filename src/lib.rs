//! `utp-core`: a uTP-style reliable, ordered, bidirectional byte-stream
//! core over an unreliable, authenticated, per-peer datagram channel.
//!
//! This crate implements only the reliability layer itself: frame codec,
//! the Sender/Receiver state machines, the connection table/multiplexer,
//! and a host-driven timer adapter. It does not perform peer discovery,
//! authentication, addressing, or encryption — those belong to the
//! surrounding overlay, which drives this crate through
//! [`UtpCore::send`], [`UtpCore::on_frame_received`], and [`UtpCore::poll`].
//!
//! ```
//! use utp_core::{Config, LoopbackSink, UtpCore};
//!
//! let mut core = UtpCore::new(Config::default());
//! core.set_on_stream_complete(|peer, bytes| {
//!     println!("stream from {peer} complete: {} bytes", bytes.len());
//! });
//! let mut sink = LoopbackSink::new();
//! core.send("peer-a", b"hello".to_vec(), 0, &mut sink);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod seq;
pub mod sink;
pub mod table;
pub mod timer;

pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use frame::{Extension, Frame, FrameType};
pub use sink::{LoopbackSink, NullSink, Sink};

use std::hash::Hash;

use table::ConnectionTable;

/// The public façade: owns the connection table and the single
/// `on_stream_complete` callback, and exposes the three entry points the
/// host event loop drives.
pub struct UtpCore<P> {
    table: ConnectionTable<P>,
    on_stream_complete: Option<Box<dyn FnMut(P, Vec<u8>)>>,
}

impl<P: Clone + Eq + Hash> UtpCore<P> {
    /// Creates a new core with the given tunable configuration.
    pub fn new(config: Config) -> Self {
        Self {
            table: ConnectionTable::new(config),
            on_stream_complete: None,
        }
    }

    /// Creates a new core with the protocol-mandated default configuration.
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Sets (or replaces) the callback invoked once a stream has been fully
    /// and correctly reassembled.
    pub fn set_on_stream_complete(&mut self, callback: impl FnMut(P, Vec<u8>) + 'static) {
        self.on_stream_complete = Some(Box::new(callback));
    }

    /// Starts sending `bytes` to `peer`: allocates a Sender, emits the
    /// initial SYN through `sink`.
    pub fn send(&mut self, peer: P, bytes: Vec<u8>, now_us: u64, sink: &mut impl Sink<P>) {
        self.table.send(peer, bytes, now_us, sink);
    }

    /// Hands one inbound datagram to the core. `frame_bytes` is the raw
    /// wire encoding already authenticated and demultiplexed to `peer` by
    /// the overlay.
    pub fn on_frame_received(&mut self, peer: P, frame_bytes: &[u8], now_us: u64, sink: &mut impl Sink<P>) {
        if let Some(bytes) = self.table.on_frame_received(peer.clone(), frame_bytes, now_us, sink) {
            if let Some(cb) = &mut self.on_stream_complete {
                cb(peer, bytes);
            }
        }
    }

    /// Drives every connection's idle/retry timers and the table's
    /// idle-linger sweep. Must be called regularly by the host scheduler;
    /// the core never reads a clock or schedules anything on its own.
    pub fn poll(&mut self, now_us: u64, sink: &mut impl Sink<P>) {
        self.table.poll(now_us, sink);
    }

    /// Number of peers with at least one tracked connection.
    pub fn peer_count(&self) -> usize {
        self.table.peer_count()
    }

    /// Number of tracked connections across all peers.
    pub fn connection_count(&self) -> usize {
        self.table.connection_count()
    }
}
