//! End-to-end two-byte-stream, boundary-size, lossy-recovery, peer-reset,
//! idle-timeout, and connection-id-collision scenarios, plus a handful of
//! quantified invariants, exercised over an in-process channel harness
//! that pumps frames between two `UtpCore`s until a completion signal
//! fires or a deadline passes.

use std::cell::RefCell;
use std::rc::Rc;

use utp_core::connection::{Connection, ConnectionState};
use utp_core::{Config, Frame, FrameType, LoopbackSink, Sink, UtpCore};

/// Low nibble of byte 0 is the frame type on the wire; see `FrameType`.
fn frame_type_of(frame: &[u8]) -> u8 {
    frame[0] & 0x0F
}

const WIRE_DATA: u8 = FrameType::Data as u8;

/// A sink that can drop frames matching a predicate, exactly once per
/// predicate match, then delivers everything else untouched.
struct DropOnceSink {
    inbox: Vec<(&'static str, Vec<u8>)>,
    predicate: Box<dyn FnMut(&[u8]) -> bool>,
    dropped: usize,
}

impl DropOnceSink {
    fn new(predicate: impl FnMut(&[u8]) -> bool + 'static) -> Self {
        Self {
            inbox: Vec::new(),
            predicate: Box::new(predicate),
            dropped: 0,
        }
    }

    fn passthrough() -> Self {
        Self::new(|_| false)
    }

    fn drain(&mut self) -> Vec<(&'static str, Vec<u8>)> {
        std::mem::take(&mut self.inbox)
    }
}

impl Sink<&'static str> for DropOnceSink {
    fn send_frame(&mut self, peer: &&'static str, frame: Vec<u8>) {
        if self.dropped == 0 && (self.predicate)(&frame) {
            self.dropped += 1;
            return;
        }
        self.inbox.push((*peer, frame));
    }
}

/// Pumps frames between two `UtpCore`s until `done()` returns true or the
/// virtual clock exceeds `deadline_us`. Returns the elapsed virtual time.
fn pump(
    client: &mut UtpCore<&'static str>,
    client_sink: &mut DropOnceSink,
    server: &mut UtpCore<&'static str>,
    server_sink: &mut DropOnceSink,
    deadline_us: u64,
    mut done: impl FnMut() -> bool,
) -> u64 {
    let mut now = 10u64;
    while !done() {
        client.poll(now, client_sink);
        server.poll(now, server_sink);
        for (_peer, frame) in client_sink.drain() {
            server.on_frame_received("client", &frame, now, server_sink);
        }
        for (_peer, frame) in server_sink.drain() {
            client.on_frame_received("server", &frame, now, client_sink);
        }
        now += 1_000;
        assert!(now < deadline_us, "scenario did not converge before the deadline");
    }
    now
}

fn harness() -> (UtpCore<&'static str>, DropOnceSink, UtpCore<&'static str>, DropOnceSink) {
    (
        UtpCore::new(Config::default()),
        DropOnceSink::passthrough(),
        UtpCore::new(Config::default()),
        DropOnceSink::passthrough(),
    )
}

fn completion_flag() -> (Rc<RefCell<Option<Vec<u8>>>>, impl FnMut(&'static str, Vec<u8>)) {
    let seen = Rc::new(RefCell::new(None));
    let cb_seen = seen.clone();
    (seen, move |_peer, bytes| *cb_seen.borrow_mut() = Some(bytes))
}

#[test]
fn s1_two_byte_stream_completes() {
    let (mut client, mut client_sink, mut server, mut server_sink) = harness();
    let (received, cb) = completion_flag();
    server.set_on_stream_complete(cb);

    let payload = b"hi".to_vec();
    client.send("server", payload.clone(), 0, &mut client_sink);

    pump(&mut client, &mut client_sink, &mut server, &mut server_sink, 2_000_000, || {
        received.borrow().is_some()
    });

    assert_eq!(received.borrow().as_deref(), Some(payload.as_slice()));
}

#[test]
fn s2_exact_max_utp_data_boundary() {
    let (mut client, mut client_sink, mut server, mut server_sink) = harness();
    let (received, cb) = completion_flag();
    server.set_on_stream_complete(cb);

    // 800 bytes == exactly two 400-byte MAX_UTP_DATA frames, no remainder.
    let payload: Vec<u8> = (0..800).map(|i| (i % 256) as u8).collect();
    client.send("server", payload.clone(), 0, &mut client_sink);

    pump(&mut client, &mut client_sink, &mut server, &mut server_sink, 2_000_000, || {
        received.borrow().is_some()
    });

    assert_eq!(received.borrow().as_deref(), Some(payload.as_slice()));
}

#[test]
fn s3_lost_middle_data_is_recovered_via_single_ack() {
    let (mut client, mut server) = (UtpCore::new(Config::default()), UtpCore::new(Config::default()));
    // Drop the second DATA frame on its first traversal only.
    let mut seen_data = 0u32;
    let mut client_sink = DropOnceSink::new(move |frame| {
        if frame_type_of(frame) == WIRE_DATA {
            seen_data += 1;
            seen_data == 2
        } else {
            false
        }
    });
    let mut server_sink = DropOnceSink::passthrough();
    let (received, cb) = completion_flag();
    server.set_on_stream_complete(cb);

    // Three DATA frames' worth of payload.
    let payload: Vec<u8> = (0..1100).map(|i| (i % 251) as u8).collect();
    client.send("server", payload.clone(), 0, &mut client_sink);

    pump(&mut client, &mut client_sink, &mut server, &mut server_sink, 20_000_000, || {
        received.borrow().is_some()
    });

    assert_eq!(received.borrow().as_deref(), Some(payload.as_slice()));
    assert_eq!(client_sink.dropped, 1, "exactly one DATA frame should have been dropped");
}

#[test]
fn s4_peer_reset_kills_sender_without_callback() {
    // Drive the Sender state machine directly: once CONNECTED, the peer
    // emits an (out-of-band) RESET exactly as `Connection::close` would.
    let cfg = Config::builder().window_size(3).max_payload(400).build();
    let mut sender = Connection::new_sender(b"partial transfer".to_vec(), &cfg);
    let syn = match &mut sender {
        Connection::Sender(s) => s.create_syn(0),
        _ => unreachable!(),
    };
    assert_eq!(sender.conn_id_send(), syn.connection_id.wrapping_add(1));

    let ack = Frame::new_state(sender.conn_id_recv(), 0, 0, 0, 1, 1);
    let (frames, completed) = sender.on_frame(&ack, 10);
    assert!(!frames.is_empty());
    assert!(completed.is_none());

    let reset = Frame::new_reset(sender.conn_id_recv(), 0, 0, 0);
    let (frames, completed) = sender.on_frame(&reset, 20);
    assert!(frames.is_empty(), "a RESET must not provoke any response");
    assert!(completed.is_none());
    assert!(sender.is_complete());

    // No further frames are emitted, even if more inbound traffic arrives.
    let (frames, completed) = sender.on_frame(&ack, 30);
    assert!(frames.is_empty());
    assert!(completed.is_none());
}

#[test]
fn s5_idle_timeout_reaps_connection_without_callback() {
    let mut client = UtpCore::new(Config::default());
    let (received, cb) = completion_flag();
    client.set_on_stream_complete(cb);

    let mut sink = LoopbackSink::new();
    client.send("server", b"anyone there?".to_vec(), 0, &mut sink);
    assert_eq!(client.connection_count(), 1);

    // Idle timeout (10s) then the 30s sweep, both in microseconds.
    client.poll(11_000_000, &mut sink);
    client.poll(41_000_000, &mut sink);

    assert_eq!(client.connection_count(), 0, "the killed connection should have been reaped");
    assert!(received.borrow().is_none(), "no stream ever completes after an idle timeout");
    assert!(sink.is_empty(), "a dead connection must not emit any more frames");
}

#[test]
fn s6_connection_id_collision_across_peers_is_benign() {
    use utp_core::table::ConnectionTable;

    let mut table = ConnectionTable::new(Config::default());
    let mut sink_a = DropOnceSink::passthrough();
    let mut sink_b = DropOnceSink::passthrough();

    // Two distinct peers both SYN the same node with identical connection_id.
    let syn = Frame::new_syn(777, 0, 1);
    let mut buf = [0u8; 64];
    let n = syn.serialize(&mut buf).unwrap();

    table.on_frame_received("peer-a", &buf[..n], 0, &mut sink_a);
    table.on_frame_received("peer-b", &buf[..n], 0, &mut sink_b);
    assert_eq!(table.peer_count(), 2);
    assert_eq!(table.connection_count(), 2);

    let ack_a = sink_a.drain();
    let ack_b = sink_b.drain();
    assert_eq!(ack_a.len(), 1);
    assert_eq!(ack_b.len(), 1);

    // Closing out peer-a's flow (FIN with no preceding DATA) must not
    // affect peer-b's independent, still-open flow.
    let fin = Frame::new_fin(777, 0, 0, 0, 2, 0);
    let mut buf = [0u8; 64];
    let n = fin.serialize(&mut buf).unwrap();
    let completed_a = table.on_frame_received("peer-a", &buf[..n], 100, &mut sink_a);
    assert_eq!(completed_a, Some(Vec::new()));
    assert_eq!(table.connection_count(), 2, "peer-b's flow must still be tracked");
}

#[test]
fn duplicate_data_frame_yields_zero_outbound_frames() {
    let cfg = Config::builder().window_size(3).build();
    let mut receiver = Connection::new_receiver(&cfg);
    let syn = Frame::new_syn(1, 0, 1);
    receiver.on_frame(&syn, 0);

    let data = Frame::new_data(receiver.conn_id_send(), 0, 0, 1, 2, 0, b"hi");
    let (first, _) = receiver.on_frame(&data, 10);
    assert_eq!(first.len(), 1);

    let (second, completed) = receiver.on_frame(&data, 11);
    assert!(second.is_empty());
    assert!(completed.is_none());
}

#[test]
fn sender_never_exceeds_window_size_frames_in_flight_after_one_ack() {
    let cfg = Config::builder().window_size(3).max_payload(1).build();
    let mut sender = Connection::new_sender(b"abcdefghij".to_vec(), &cfg);
    let Connection::Sender(s) = &mut sender else { unreachable!() };
    s.create_syn(0);

    let ack = Frame::new_state(sender.conn_id_recv(), 0, 0, 0, 1, 1);
    let (frames, _) = sender.on_frame(&ack, 10);
    // Window size 3: the SYN already consumed one credit, so at most 3
    // more frames may be in flight after the first ACK.
    assert!(frames.len() <= 3);
}

#[test]
fn conn_id_send_is_conn_id_recv_plus_one_at_initiator() {
    let cfg = Config::default();
    let mut sender = Connection::new_sender(Vec::new(), &cfg);
    let Connection::Sender(s) = &mut sender else { unreachable!() };
    s.create_syn(0);
    assert_eq!(sender.conn_id_send(), sender.conn_id_recv().wrapping_add(1));
}

#[test]
fn conn_id_recv_is_conn_id_send_plus_one_at_responder() {
    use utp_core::connection::Receiver;

    let cfg = Config::default();
    let mut receiver = Receiver::new(&cfg);
    let syn = Frame::new_syn(555, 0, 1);
    receiver.on_frame(&syn, 0);
    assert_eq!(receiver.conn_id_recv(), receiver.conn_id_send().wrapping_add(1));
    assert_eq!(receiver.state(), ConnectionState::SynRecv);
}
