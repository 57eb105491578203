//! Send one request to a node and print its replies.
//!
//! Run with:
//!   cargo run --example ping-node -- localhost:7915 5

use std::time::Duration;

use sosbus::{Client, ClientConfig, Pattern, Route};

const PING_TYPE: u8 = 33;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let server: sosbus::transport::Endpoint = args
        .next()
        .unwrap_or_else(|| "localhost:7915".to_string())
        .parse()?;
    let node: u16 = args.next().unwrap_or_else(|| "1".to_string()).parse()?;

    let client = Client::new(
        ClientConfig {
            retries: 3,
            ..ClientConfig::default()
        }
        .with_endpoint(&server),
    );
    client.connect()?;

    let replies = client.post_rpc(
        &Route::new().dest_addr(node).msg_type(PING_TYPE),
        b"ping".to_vec(),
        &Pattern::any().src_addr(node).msg_type(PING_TYPE),
        Some(Duration::from_secs(2)),
        1,
    )?;

    match replies.first() {
        Some(reply) => println!(
            "node {:#06x} answered with {} bytes",
            reply.src_addr(),
            reply.payload().len()
        ),
        None => println!("node {node:#06x} did not answer"),
    }
    Ok(())
}
