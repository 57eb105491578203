//! Single-client stand-in for the broker: answers every message with a reply
//! whose addresses are swapped, so `rpc` and `listen` have something to see.
//!
//! Run with:
//!   cargo run --example fake-broker -- 7915
//!
//! In another terminal:
//!   cargo run -- rpc localhost:7915 --daddr 5 --type 33 --hex "01 02" \
//!     --reply-saddr 5 --reply-type 33

use std::net::TcpListener;

use sosbus::frame::{FrameReader, FrameWriter, Message};
use sosbus::transport::BusStream;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = match std::env::args().nth(1) {
        Some(port) => port.parse()?,
        None => sosbus::transport::DEFAULT_PORT,
    };
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    eprintln!("Listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        let stream = BusStream::from_tcp(stream?);
        eprintln!("Client connected: {}", stream.peer_addr()?);

        let mut writer = FrameWriter::new(stream.try_clone()?);
        let mut reader = FrameReader::new(stream);
        loop {
            let request = match reader.read_message() {
                Ok(request) => request,
                Err(e) => {
                    eprintln!("Client disconnected: {e}");
                    break;
                }
            };
            eprintln!(
                "Received type {} for node {:#06x} ({} bytes)",
                request.msg_type(),
                request.dest_addr(),
                request.payload().len()
            );
            let reply = Message::new(
                request.src_module(),
                request.dest_module(),
                request.src_addr(),
                request.dest_addr(),
                request.msg_type(),
                request.payload().clone(),
            )?;
            writer.send(&reply)?;
        }
    }
    Ok(())
}
