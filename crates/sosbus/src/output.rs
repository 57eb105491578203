use std::fmt::Write as _;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use sosbus_frame::{is_broadcast, msg_type_class, Message};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput {
    dest_module: u8,
    src_module: u8,
    dest_addr: u16,
    src_addr: u16,
    broadcast: bool,
    msg_type: u8,
    msg_class: &'static str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

impl MessageOutput {
    fn new(message: &Message) -> Self {
        Self {
            dest_module: message.dest_module(),
            src_module: message.src_module(),
            dest_addr: message.dest_addr(),
            src_addr: message.src_addr(),
            broadcast: is_broadcast(message.dest_addr()),
            msg_type: message.msg_type(),
            msg_class: msg_type_class(message.msg_type()),
            payload_size: message.payload().len(),
            payload: hex_string(message.payload(), ""),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_message(message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&MessageOutput::new(message))
                    .unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DID", "SID", "DADDR", "SADDR", "TYPE", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    message.dest_module().to_string(),
                    message.src_module().to_string(),
                    format!("{:#06x}", message.dest_addr()),
                    format!("{:#06x}", message.src_addr()),
                    format!("{} ({})", message.msg_type(), msg_type_class(message.msg_type())),
                    message.payload().len().to_string(),
                    hex_string(message.payload(), " "),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", pretty_line(message)),
        OutputFormat::Raw => print_raw(message.payload()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn pretty_line(message: &Message) -> String {
    format!(
        "did={} sid={} daddr={:#06x} saddr={:#06x} type={} ({}) size={} payload={}",
        message.dest_module(),
        message.src_module(),
        message.dest_addr(),
        message.src_addr(),
        message.msg_type(),
        msg_type_class(message.msg_type()),
        message.payload().len(),
        hex_string(message.payload(), " ")
    )
}

pub fn hex_string(bytes: &[u8], separator: &str) -> String {
    let mut out = String::with_capacity(bytes.len() * (2 + separator.len()));
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            out.push_str(separator);
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
