use std::io;
use thiserror::Error;

/// Errors surfaced by console sessions.
///
/// Low-level read deadlines are not errors: `read_until` and `expect` return
/// partial data when they time out. The variants here are the fatal
/// conditions a caller must decide how to handle, plus session-level
/// timeouts (`ExpectTimeout`), which terminate the session that raised them.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Connect timeout for {host}:{port}")]
    ConnectTimeout { host: String, port: u16 },
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },
    #[error("Connection closed: {host}:{port}")]
    ConnectionClosed { host: String, port: u16 },
    #[error("Failed to write to {host}:{port} (connection may be closed): {source}")]
    WriteFailed {
        host: String,
        port: u16,
        source: io::Error,
    },
    #[error("Timed out waiting for {expected:?} on {host}:{port}")]
    ExpectTimeout {
        expected: String,
        host: String,
        port: u16,
        output: String,
    },
    #[error("Failed to log in to {host}:{port} as {username}")]
    LoginFailed {
        host: String,
        port: u16,
        username: String,
    },
    #[error("Malformed return-code sentinel: {text:?}")]
    BadReturnCode { text: String },
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to load config from {path}: {reason}")]
    Config { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
