//! Authenticated control channel between the short-lived client and the
//! resident daemon: line-delimited JSON over TCP, preceded by a
//! challenge/response handshake over the shared secret.
use std::{
    io::{self, BufRead, BufReader, Write},
    net::{TcpStream, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    constants::AUTH_NONCE_LENGTH,
    error::Severity,
    manager::StatusDict,
    runner::RunnerReport,
};

/// Buffered reader over one control connection. The handshake and the
/// command that follows share this reader, since both lines may arrive in
/// the same packet.
pub type ControlReader<'a> = BufReader<&'a TcpStream>;

/// Message sent from CLI invocations to the resident daemon. The variants
/// group into the three exported objects: the runner manager, the roster
/// config, and the utilities object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Start a service (manager).
    Start {
        /// Service executable path.
        path: PathBuf,
    },
    /// Stop a service and drop it from the table (manager).
    Stop {
        /// Service executable path.
        path: PathBuf,
    },
    /// Stop (tolerantly) and start a service (manager).
    Restart {
        /// Service executable path.
        path: PathBuf,
    },
    /// Re-resolve configuration, hot-swapping streams (manager).
    Reload {
        /// Service executable path.
        path: PathBuf,
    },
    /// Fetch one runner's snapshot (manager).
    Status {
        /// Service executable path.
        path: PathBuf,
    },
    /// Fetch the aggregate status of every known path (manager).
    List,
    /// Reap non-running runners (manager).
    Gc,
    /// Deliver a signal to a running service (manager).
    Signal {
        /// Service executable path.
        path: PathBuf,
        /// Signal number.
        signal: i32,
    },
    /// Add a path to the roster (roster).
    Add {
        /// Service executable path.
        path: PathBuf,
    },
    /// Remove a path from the roster (roster).
    Delete {
        /// Service executable path.
        path: PathBuf,
    },
    /// Mark a roster entry enabled-at-boot (roster).
    Enable {
        /// Service executable path.
        path: PathBuf,
    },
    /// Mark a roster entry disabled-at-boot (roster).
    Disable {
        /// Service executable path.
        path: PathBuf,
    },
    /// Liveness / version probe (utils).
    Ping,
    /// Resolve patterns against the known-path set (utils).
    Match {
        /// Exact names, shell globs, or substrings.
        patterns: Vec<String>,
    },
    /// Keyword search over the config directory tree (utils).
    Find {
        /// Substring matched against file names.
        keyword: String,
    },
    /// Ask the daemon to shut down.
    Shutdown,
}

/// Response sent by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    /// Command completed successfully.
    Ok,
    /// Command completed with a status message.
    Message(String),
    /// Command failed; severity steers the client's exit behaviour.
    Error {
        /// Level the daemon logged the failure at.
        severity: Severity,
        /// Human-readable message.
        message: String,
    },
    /// One runner's snapshot.
    Status(Box<RunnerReport>),
    /// Aggregate status flags per path.
    List(StatusDict),
    /// A list of paths (match, find, and gc results).
    Paths(Vec<PathBuf>),
    /// Ping reply.
    Pong {
        /// Daemon version string.
        version: String,
    },
}

/// Errors raised by the control channel helpers.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Control socket I/O error.
    #[error("control connection I/O failed: {0}")]
    Io(#[from] io::Error),
    /// Error serializing or deserializing control messages.
    #[error("failed to serialise control message: {0}")]
    Serde(#[from] serde_json::Error),
    /// The daemon rejected the shared secret.
    #[error("authentication failed")]
    AuthFailed,
    /// Daemon reported an error.
    #[error("{message}")]
    Server {
        /// Severity the daemon attached.
        severity: Severity,
        /// Human-readable message.
        message: String,
    },
    /// Daemon not reachable at the given endpoint.
    #[error("daemon not reachable")]
    NotAvailable,
}

/// Computes the handshake digest: `sha256(nonce ‖ password)` as lowercase hex.
pub fn auth_digest(nonce: &[u8], password: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(password);
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&text[index..index + 2], 16).ok())
        .collect()
}

fn read_line(reader: &mut ControlReader<'_>) -> Result<String, ControlError> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Err(ControlError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-protocol",
        )));
    }
    Ok(line.trim().to_string())
}

fn write_line(mut stream: &TcpStream, payload: &[u8]) -> Result<(), ControlError> {
    stream.write_all(payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

/// Server side of the handshake: emits a random nonce and verifies the
/// client's digest against the shared secret.
pub fn server_handshake(
    reader: &mut ControlReader<'_>,
    stream: &TcpStream,
    password: &[u8],
) -> Result<bool, ControlError> {
    let mut nonce = [0u8; AUTH_NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);

    write_line(stream, to_hex(&nonce).as_bytes())?;
    let answer = read_line(reader)?;
    Ok(answer == auth_digest(&nonce, password))
}

/// Client side of the handshake: answers the server's nonce challenge.
fn client_handshake(
    reader: &mut ControlReader<'_>,
    stream: &TcpStream,
    password: &[u8],
) -> Result<(), ControlError> {
    let nonce_hex = read_line(reader)?;
    let nonce = from_hex(&nonce_hex).ok_or(ControlError::AuthFailed)?;
    write_line(stream, auth_digest(&nonce, password).as_bytes())?;
    Ok(())
}

/// Connects to the daemon, authenticates, sends one command, and waits for
/// the response. `Error` responses are surfaced as [`ControlError::Server`].
pub fn send_command(
    address: &str,
    port: u16,
    password: &[u8],
    command: &ControlCommand,
) -> Result<ControlResponse, ControlError> {
    let endpoint = (address, port)
        .to_socket_addrs()
        .map_err(|_| ControlError::NotAvailable)?
        .next()
        .ok_or(ControlError::NotAvailable)?;
    let stream = TcpStream::connect_timeout(&endpoint, Duration::from_secs(5))
        .map_err(|_| ControlError::NotAvailable)?;
    stream.set_read_timeout(Some(Duration::from_secs(60)))?;

    let mut reader = BufReader::new(&stream);
    client_handshake(&mut reader, &stream, password)?;

    let payload = serde_json::to_vec(command)?;
    write_line(&stream, &payload)?;

    let response_line = read_line(&mut reader)?;
    let response: ControlResponse = serde_json::from_str(&response_line)?;
    if let ControlResponse::Error { severity, message } = &response {
        return Err(ControlError::Server {
            severity: *severity,
            message: message.clone(),
        });
    }
    Ok(response)
}

/// Reads one command from an authenticated connection. Used by the daemon's
/// accept loop.
pub fn read_command(
    reader: &mut ControlReader<'_>,
) -> Result<ControlCommand, ControlError> {
    let line = read_line(reader)?;
    Ok(serde_json::from_str(&line)?)
}

/// Writes a response to the connected client.
pub fn write_response(
    stream: &TcpStream,
    response: &ControlResponse,
) -> Result<(), ControlError> {
    let payload = serde_json::to_vec(response)?;
    write_line(stream, &payload)?;
    Ok(())
}
