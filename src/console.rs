//! Transport-agnostic view of a remote console session.
//!
//! Provisioning flows drive consoles through this trait so the same logic
//! works whether the console is reached over telnet, a terminal server, or
//! anything else that can carry a login shell.

use crate::error::Result;
use crate::telnet::{ExpectOutcome, TelnetClient};
use async_trait::async_trait;
use regex::bytes::Regex;
use std::time::Duration;

/// A logged-in (or log-in-able) line-oriented console.
#[async_trait]
pub trait RemoteConsole: Send {
    /// Send one line of input, newline appended.
    async fn write_line(&mut self, text: &str) -> Result<()>;

    /// Wait for `expected` to appear; fatal if it does not. Returns the
    /// output with the echoed input and trailing prompt stripped.
    async fn get_read_until(&mut self, expected: &str, timeout: Duration) -> Result<String>;

    /// Wait for the first of `patterns` to match the decoded stream.
    async fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ExpectOutcome>;

    /// Authenticate, optionally through the forced password-change flow.
    async fn login(&mut self, username: &str, password: &str, reset: bool) -> Result<()>;

    /// Wait for the shell prompt, returning the output that preceded it.
    async fn find_prompt(&mut self, timeout: Duration) -> Result<String>;

    /// Run a command and return `(return_code, output)`.
    async fn exec_cmd(&mut self, cmd: &str, timeout: Duration) -> Result<(i32, String)>;

    /// Tear the session down. Idempotent.
    async fn close(&mut self);
}

#[async_trait]
impl RemoteConsole for TelnetClient {
    async fn write_line(&mut self, text: &str) -> Result<()> {
        TelnetClient::write_line(self, text).await
    }

    async fn get_read_until(&mut self, expected: &str, timeout: Duration) -> Result<String> {
        TelnetClient::get_read_until(self, expected, timeout).await
    }

    async fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ExpectOutcome> {
        TelnetClient::expect(self, patterns, timeout).await
    }

    async fn login(&mut self, username: &str, password: &str, reset: bool) -> Result<()> {
        TelnetClient::login(self, username, password, reset).await
    }

    async fn find_prompt(&mut self, timeout: Duration) -> Result<String> {
        TelnetClient::find_prompt(self, timeout).await
    }

    async fn exec_cmd(&mut self, cmd: &str, timeout: Duration) -> Result<(i32, String)> {
        TelnetClient::exec_cmd(self, cmd, timeout).await
    }

    async fn close(&mut self) {
        TelnetClient::close(self).await;
    }
}
