//! Minimal two-node exchange over a lossless loopback channel.
//!
//! Shows the full handshake → data → FIN lifecycle with no frame loss:
//! `send` on one `UtpCore`, pump frames through `LoopbackSink` until
//! `on_stream_complete` fires on the other.
//!
//! Run with: cargo run --example echo_stream

use std::cell::RefCell;
use std::rc::Rc;

use utp_core::{Config, LoopbackSink, UtpCore};

fn main() {
    env_logger::init();

    let mut client = UtpCore::new(Config::default());
    let mut server = UtpCore::new(Config::default());
    let mut client_sink = LoopbackSink::new();
    let mut server_sink = LoopbackSink::new();

    let received = Rc::new(RefCell::new(None));
    let received_cb = received.clone();
    server.set_on_stream_complete(move |peer, bytes| {
        println!(
            "server: stream from {peer} complete ({} bytes): {:?}",
            bytes.len(),
            String::from_utf8_lossy(&bytes)
        );
        *received_cb.borrow_mut() = Some(bytes);
    });

    let payload = b"hello from the client".to_vec();
    println!("client: sending {} bytes to server", payload.len());
    client.send("server", payload.clone(), 0, &mut client_sink);

    let mut now_us = 10;
    while received.borrow().is_none() {
        for (_peer, frame) in client_sink.drain() {
            server.on_frame_received("client", &frame, now_us, &mut server_sink);
        }
        for (_peer, frame) in server_sink.drain() {
            client.on_frame_received("server", &frame, now_us, &mut client_sink);
        }
        now_us += 10;
        if now_us > 1_000_000 {
            panic!("stream never completed");
        }
    }

    assert_eq!(received.borrow().as_deref(), Some(payload.as_slice()));
    println!("done: {now_us} virtual microseconds elapsed");
}
