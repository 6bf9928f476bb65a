//! FTP Protocol Module
//!
//! This module implements the client side of the FTP control channel
//! (RFC 959) needed to push files:
//! - Sending commands as `CMD args\r\n`
//! - Reading single- and multi-line replies
//! - Parsing the `PASV` data address
//!
//! ## Upload Exchange
//!
//! ```text
//! Client                                   Server
//!   |<------------------------ 220 ready ----|
//!   |-- USER name ------------------------->|
//!   |<---------------------- 331 password ---|
//!   |-- PASS secret ----------------------->|
//!   |<---------------------- 230 logged in --|
//!   |-- TYPE I ---------------------------->|
//!   |<------------------------------ 200 ----|
//!   |-- PASV ------------------------------>|
//!   |<------- 227 (h1,h2,h3,h4,p1,p2) -------|
//!   |== data connection to h1.h2.h3.h4:p ===|
//!   |-- STOR dir/name --------------------->|
//!   |<---------------------- 150 opening ----|
//!   |== [file bytes] , close ===============|
//!   |<------------------- 226 complete ------|
//!   |-- QUIT ------------------------------>|
//! ```
//!
//! Every control-channel read and write is bounded by the configured
//! timeout, matching the socket timeout semantics of classic FTP clients.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::debug;

/// Chunk size for file transfers (64 KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Longest reply line accepted before the server is considered broken
pub const MAX_REPLY_LINE: usize = 8 * 1024;

/// Anything the control or data channel can run over (plain TCP or TLS)
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Type-erased stream so TLS upgrades do not change the channel's type
pub type BoxedStream = Box<dyn AsyncStream>;

/// Session and protocol errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Credentials rejected: {0}")]
    Auth(Reply),

    #[error("Server refused {command}: {reply}")]
    Rejected { command: String, reply: Reply },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Server closed the connection")]
    Disconnected,

    #[error("Invalid session state: expected {expected}, was {actual}")]
    State {
        expected: &'static str,
        actual: &'static str,
    },
}

/// A complete server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// 1xx: action started, expect another reply
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx: action completed
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Reply text without the leading code, lines joined by spaces
    pub fn message(&self) -> String {
        self.lines
            .iter()
            .map(|line| {
                if line.len() >= 4 && line.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
                    line.get(4..).unwrap_or_default().trim()
                } else if line.len() == 3 && line.bytes().all(|b| b.is_ascii_digit()) {
                    ""
                } else {
                    line.trim()
                }
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message())
    }
}

/// Command/reply codec over the control connection
pub struct ControlChannel {
    stream: BufReader<BoxedStream>,
    timeout: Duration,
}

impl ControlChannel {
    pub fn new(stream: BoxedStream, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Release the underlying stream, e.g. to wrap it in TLS
    ///
    /// Only valid between exchanges: any bytes still buffered are dropped.
    pub fn into_inner(self) -> BoxedStream {
        self.stream.into_inner()
    }

    /// Send one command line
    pub async fn send(&mut self, command: &str) -> Result<(), SessionError> {
        debug!(">>> {}", redact(command));

        let line = format!("{}\r\n", command);
        let writer = self.stream.get_mut();
        with_timeout(self.timeout, "Sending command", async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            Ok(())
        })
        .await
    }

    /// Read one complete (possibly multi-line) reply
    pub async fn read_reply(&mut self) -> Result<Reply, SessionError> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first];

        if lines[0].as_bytes().get(3) == Some(&b'-') {
            let code_text = code.to_string();
            let terminator = format!("{} ", code_text);
            loop {
                let line = self.read_line().await?;
                let done = line.starts_with(&terminator) || line == code_text;
                lines.push(line);
                if done {
                    break;
                }
            }
        }

        let reply = Reply { code, lines };
        debug!("<<< {}", reply);
        Ok(reply)
    }

    /// Send a command and read its reply
    pub async fn execute(&mut self, command: &str) -> Result<Reply, SessionError> {
        self.send(command).await?;
        self.read_reply().await
    }

    /// Send a command and require a 2xx reply
    pub async fn expect_completion(&mut self, command: &str) -> Result<Reply, SessionError> {
        let reply = self.execute(command).await?;
        if !reply.is_completion() {
            return Err(SessionError::Rejected {
                command: command_name(command).to_string(),
                reply,
            });
        }
        Ok(reply)
    }

    async fn read_line(&mut self) -> Result<String, SessionError> {
        let mut buffer = Vec::new();
        let stream = &mut self.stream;
        let read = with_timeout(self.timeout, "Waiting for server reply", async {
            Ok(stream.read_until(b'\n', &mut buffer).await?)
        })
        .await?;

        if read == 0 {
            return Err(SessionError::Disconnected);
        }
        if buffer.len() > MAX_REPLY_LINE {
            return Err(SessionError::Protocol(format!(
                "Reply line of {} bytes exceeds {} bytes",
                buffer.len(),
                MAX_REPLY_LINE
            )));
        }

        let line = String::from_utf8_lossy(&buffer);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Run `operation`, mapping expiry of `limit` to [`SessionError::Timeout`]
pub async fn with_timeout<T, F>(
    limit: Duration,
    operation: &'static str,
    future: F,
) -> Result<T, SessionError>
where
    F: std::future::Future<Output = Result<T, SessionError>>,
{
    timeout(limit, future)
        .await
        .map_err(|_| SessionError::Timeout {
            operation,
            timeout: limit,
        })?
}

/// Parse the 3-digit reply code from the start of a line
fn parse_code(line: &str) -> Result<u16, SessionError> {
    let digits = line
        .get(..3)
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| SessionError::Protocol(format!("Invalid reply: {:?}", line)))?;

    let separator = line.as_bytes().get(3).copied();
    if !matches!(separator, None | Some(b' ') | Some(b'-')) {
        return Err(SessionError::Protocol(format!("Invalid reply: {:?}", line)));
    }

    digits
        .parse()
        .map_err(|_| SessionError::Protocol(format!("Invalid reply code: {:?}", line)))
}

/// Parse the data address out of a `227` reply
///
/// The address is the first run of six comma-separated numbers, with or
/// without the customary parentheses. An unspecified address (`0.0.0.0`)
/// is replaced by `control_peer`, as is common behind NAT.
pub fn parse_pasv_reply(reply: &Reply, control_peer: IpAddr) -> Result<SocketAddr, SessionError> {
    let text = reply.lines.join(" ");
    let bytes = text.as_bytes();

    for (start, byte) in bytes.iter().enumerate().skip(3) {
        if !byte.is_ascii_digit() || bytes[start - 1].is_ascii_digit() {
            continue;
        }
        if let Some(numbers) = six_numbers(&text[start..]) {
            let ip = IpAddr::from([numbers[0], numbers[1], numbers[2], numbers[3]]);
            let port = u16::from(numbers[4]) << 8 | u16::from(numbers[5]);
            let ip = if ip.is_unspecified() { control_peer } else { ip };
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(SessionError::Protocol(format!(
        "Cannot parse passive address from {:?}",
        text
    )))
}

fn six_numbers(text: &str) -> Option<[u8; 6]> {
    let mut numbers = [0u8; 6];
    let mut parts = text.splitn(7, ',');
    for (index, slot) in numbers.iter_mut().enumerate() {
        let part = parts.next()?;
        let digits = if index == 5 {
            let end = part
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(part.len());
            &part[..end]
        } else {
            part
        };
        *slot = digits.parse().ok()?;
    }
    Some(numbers)
}

/// First word of a command, for error messages that must not leak arguments
pub fn command_name(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or(command)
}

/// Mask the password argument of `PASS`
fn redact(command: &str) -> &str {
    if command_name(command).eq_ignore_ascii_case("PASS") {
        "PASS ****"
    } else {
        command
    }
}
