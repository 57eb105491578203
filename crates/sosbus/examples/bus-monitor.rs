//! Print every message seen on the bus until the broker goes away.
//!
//! Run with:
//!   cargo run --example bus-monitor -- localhost:7915

use std::sync::mpsc;

use sosbus::{Client, ClientConfig, Pattern};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server: sosbus::transport::Endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost:7915".to_string())
        .parse()?;

    let client = Client::new(ClientConfig::default().with_endpoint(&server));
    let (tx, rx) = mpsc::channel();
    client.register_trigger(Pattern::any(), move |message| {
        tx.send(message.clone())?;
        Ok(())
    });
    client.connect()?;
    eprintln!("Monitoring {server}");

    while client.is_connected() {
        let Ok(message) = rx.recv_timeout(std::time::Duration::from_millis(500)) else {
            continue;
        };
        println!(
            "{:#06x} -> {:#06x} type {} ({}) {:?}",
            message.src_addr(),
            message.dest_addr(),
            message.msg_type(),
            sosbus::frame::msg_type_class(message.msg_type()),
            message.payload().as_ref()
        );
    }
    eprintln!("Broker connection closed");
    Ok(())
}
