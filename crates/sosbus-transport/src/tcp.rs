use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::BusStream;

/// Host the broker listens on unless told otherwise.
pub const DEFAULT_HOST: &str = "localhost";

/// Port the broker listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 7915;

/// Host and port of a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                addr: self.to_string(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve {
                addr: self.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ),
            });
        }
        Ok(addrs)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses `host`, `host:port` or `[v6]:port`. A missing port means [`DEFAULT_PORT`].
impl FromStr for Endpoint {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err("endpoint must not be empty".to_string());
        }

        if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("unterminated '[' in endpoint: {input}"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(format!("invalid endpoint: {input}")),
            };
            return Ok(Self::new(host, port));
        }

        match input.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                if host.is_empty() {
                    return Err(format!("missing host in endpoint: {input}"));
                }
                Ok(Self::new(host, parse_port(port)?))
            }
            _ => Ok(Self::new(input, DEFAULT_PORT)),
        }
    }
}

fn parse_port(port: &str) -> std::result::Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("invalid port: {port}"))
}

/// Connect to a broker with a single attempt (blocking).
pub fn connect(endpoint: &Endpoint) -> Result<BusStream> {
    connect_with_retries(endpoint, 0, Duration::ZERO)
}

/// Connect to a broker, retrying up to `retries` more times after a failed attempt.
///
/// Every address the host resolves to is tried on each attempt. On failure the
/// error carries the last I/O error and the number of attempts made.
pub fn connect_with_retries(
    endpoint: &Endpoint,
    retries: u32,
    retry_delay: Duration,
) -> Result<BusStream> {
    let addrs = endpoint.resolve()?;
    let attempts = retries.saturating_add(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match try_addrs(&addrs) {
            Ok(stream) => {
                info!(addr = %endpoint, attempt, "connected to broker");
                return Ok(BusStream::from_tcp(stream));
            }
            Err(err) => {
                debug!(addr = %endpoint, attempt, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }

        if attempt < attempts && !retry_delay.is_zero() {
            std::thread::sleep(retry_delay);
        }
    }

    Err(TransportError::Connect {
        addr: endpoint.to_string(),
        attempts,
        source: last_err
            .unwrap_or_else(|| std::io::Error::other("no connection attempt was made")),
    })
}

fn try_addrs(addrs: &[SocketAddr]) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("no addresses to connect to")))
}
