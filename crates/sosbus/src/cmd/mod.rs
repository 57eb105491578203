use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use sosbus_client::{ClientConfig, Pattern, Route};
use sosbus_transport::Endpoint;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod rpc;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a single message.
    Send(SendArgs),
    /// Print messages received from the bus.
    Listen(ListenArgs),
    /// Send a request and print the matching replies.
    Rpc(RpcArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Rpc(args) => rpc::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Broker address as host[:port].
    #[arg(value_name = "SERVER", default_value = "localhost:7915")]
    pub server: Endpoint,
    /// Extra connection attempts after the first one fails.
    #[arg(long, value_name = "N", default_value = "0")]
    pub retries: u32,
}

impl ServerArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            retries: self.retries,
            ..ClientConfig::default()
        }
        .with_endpoint(&self.server)
    }
}

/// Routing fields; decimal or 0x-prefixed hex.
#[derive(Args, Debug, Clone, Default)]
pub struct RouteArgs {
    /// Destination module id.
    #[arg(long, value_name = "N", value_parser = parse_u8)]
    pub did: Option<u8>,
    /// Source module id.
    #[arg(long, value_name = "N", value_parser = parse_u8)]
    pub sid: Option<u8>,
    /// Destination node address.
    #[arg(long, value_name = "N", value_parser = parse_u16)]
    pub daddr: Option<u16>,
    /// Source node address.
    #[arg(long, value_name = "N", value_parser = parse_u16)]
    pub saddr: Option<u16>,
    /// Message type.
    #[arg(long = "type", value_name = "N", value_parser = parse_u8)]
    pub msg_type: Option<u8>,
}

impl RouteArgs {
    pub fn route(&self) -> Route {
        Route {
            dest_module: self.did,
            src_module: self.sid,
            dest_addr: self.daddr,
            src_addr: self.saddr,
            msg_type: self.msg_type,
        }
    }

    /// Given fields match exactly; missing fields match anything.
    pub fn pattern(&self) -> Pattern {
        Pattern {
            dest_module: self.did.into(),
            src_module: self.sid.into(),
            dest_addr: self.daddr.into(),
            src_addr: self.saddr.into(),
            msg_type: self.msg_type.into(),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PayloadArgs {
    /// Payload as hex bytes ("aa bb cc", "aa:bb:cc" or "aabbcc").
    #[arg(long, value_name = "BYTES", conflicts_with_all = ["text", "file"])]
    pub hex: Option<String>,
    /// Payload as a UTF-8 string.
    #[arg(long, value_name = "STRING", conflicts_with_all = ["hex", "file"])]
    pub text: Option<String>,
    /// Read payload from file.
    #[arg(long, value_name = "PATH", conflicts_with_all = ["hex", "text"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    #[command(flatten)]
    pub route: RouteArgs,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    // Only messages matching these fields are printed.
    #[command(flatten)]
    pub filter: RouteArgs,
    /// Exit after receiving N messages.
    #[arg(long, value_name = "N")]
    pub count: Option<usize>,
}

/// Reply filter for `rpc`.
#[derive(Args, Debug, Clone, Default)]
pub struct ReplyArgs {
    /// Reply destination module id.
    #[arg(long = "reply-did", id = "reply-did", value_name = "N", value_parser = parse_u8)]
    pub did: Option<u8>,
    /// Reply source module id.
    #[arg(long = "reply-sid", id = "reply-sid", value_name = "N", value_parser = parse_u8)]
    pub sid: Option<u8>,
    /// Reply destination node address.
    #[arg(long = "reply-daddr", id = "reply-daddr", value_name = "N", value_parser = parse_u16)]
    pub daddr: Option<u16>,
    /// Reply source node address.
    #[arg(long = "reply-saddr", id = "reply-saddr", value_name = "N", value_parser = parse_u16)]
    pub saddr: Option<u16>,
    /// Reply message type.
    #[arg(long = "reply-type", id = "reply-type", value_name = "N", value_parser = parse_u8)]
    pub msg_type: Option<u8>,
}

impl ReplyArgs {
    pub fn pattern(&self) -> Pattern {
        Pattern {
            dest_module: self.did.into(),
            src_module: self.sid.into(),
            dest_addr: self.daddr.into(),
            src_addr: self.saddr.into(),
            msg_type: self.msg_type.into(),
        }
    }
}

#[derive(Args, Debug)]
pub struct RpcArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    #[command(flatten)]
    pub route: RouteArgs,
    #[command(flatten)]
    pub payload: PayloadArgs,
    #[command(flatten)]
    pub reply: ReplyArgs,
    /// Time to wait for replies (e.g. 2s, 2.5s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
    /// Number of replies to wait for.
    #[arg(long, value_name = "N", default_value = "1")]
    pub nreplies: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_u8(input: &str) -> Result<u8, String> {
    let value = parse_number(input)?;
    u8::try_from(value).map_err(|_| format!("{input} does not fit in 8 bits"))
}

pub fn parse_u16(input: &str) -> Result<u16, String> {
    let value = parse_number(input)?;
    u16::try_from(value).map_err(|_| format!("{input} does not fit in 16 bits"))
}

fn parse_number(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse::<u32>(),
    };
    parsed.map_err(|_| format!("invalid number: {input}"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, per_second) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1000.0)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, 1.0)
    } else {
        (input, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if !value.is_finite() || value <= 0.0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Duration::try_from_secs_f64(value / per_second)
        .map_err(|_| CliError::new(USAGE, format!("duration out of range: {input}")))
}

pub fn parse_hex_payload(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);

    if !digits.is_ascii() {
        return Err(CliError::new(USAGE, format!("--hex is not valid hex: {input}")));
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::new(
            USAGE,
            format!("--hex needs an even number of digits: {input}"),
        ));
    }

    (0..digits.len())
        .step_by(2)
        .map(|at| {
            u8::from_str_radix(&digits[at..at + 2], 16)
                .map_err(|_| CliError::new(USAGE, format!("--hex is not valid hex: {input}")))
        })
        .collect()
}

pub fn resolve_payload(args: &PayloadArgs) -> CliResult<Vec<u8>> {
    if let Some(hex) = &args.hex {
        return parse_hex_payload(hex);
    }
    if let Some(text) = &args.text {
        return Ok(text.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return std::fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}
