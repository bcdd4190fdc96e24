//! TELNET console client (RFC 854 framing plus a VT100 device-status
//! auto-responder) with deadline-bounded reads and a line-oriented session
//! layer used to drive serial consoles during bare-metal provisioning.

mod decode;
pub mod negotiate;

use crate::error::{ConsoleError, Result};
use decode::FrameDecoder;
use negotiate::NegotiationCallback;
use regex::bytes::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

/// One `recv` pulls at most this many bytes. Keeping the chunk small bounds
/// the re-anchored scan window in `read_until`, which would otherwise go
/// quadratic on large buffers.
const RAWQ_CHUNK: usize = 50;

/// Everything a telnet session recognizes, with its default. Values mirror
/// the consoles this client is pointed at: a shell prompt ending in `$`,
/// truncated login/password prompts that match any capitalization, and
/// square-bracket markers around the return-code sentinel.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub negotiate: bool,
    pub vt100query: bool,
    pub prompt: String,
    pub login_prompt: String,
    pub password_prompt: String,
    /// Factory password expected by the first-boot password-change flow.
    pub default_password: String,
    pub marker_open: char,
    pub marker_close: char,
    pub connect_timeout: Duration,
    pub expect_timeout: Duration,
    pub login_attempts: usize,
    /// Byte-level session log; every decoded byte is appended here.
    pub log_path: Option<PathBuf>,
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            negotiate: false,
            vt100query: false,
            prompt: r".*\$ ?".to_string(),
            login_prompt: "ogin:".to_string(),
            password_prompt: "assword:".to_string(),
            default_password: "admin".to_string(),
            marker_open: '[',
            marker_close: ']',
            connect_timeout: Duration::from_secs(15),
            expect_timeout: Duration::from_secs(3600),
            login_attempts: 35,
            log_path: None,
        }
    }
}

/// Result of an [`TelnetClient::expect`] call.
///
/// `index` is the position of the winning pattern in the caller's list, or
/// `None` when the deadline passed without a match (a normal outcome,
/// distinct from a dead connection). `text` holds everything consumed up to
/// and including the match, or the partial buffer contents on timeout;
/// `span` locates the match inside `text`.
#[derive(Debug)]
pub struct ExpectOutcome {
    pub index: Option<usize>,
    pub span: Option<(usize, usize)>,
    pub text: Vec<u8>,
}

/// A serial console reached over TELNET.
///
/// The client exclusively owns the socket and all protocol buffers and is
/// driven through `&mut self`, so a connection has exactly one consumer and
/// operations are strictly serial. Every blocking operation takes an
/// explicit deadline; suspension happens only in the readiness wait of the
/// refill loop.
pub struct TelnetClient {
    host: String,
    port: u16,
    stream: TcpStream,
    profile: SessionProfile,
    eof: bool,
    rawq: Vec<u8>,
    cookedq: Vec<u8>,
    decoder: FrameDecoder,
    prompt_re: Regex,
    rc_re: Regex,
    log_sink: Option<File>,
}

impl TelnetClient {
    pub async fn connect(host: &str, port: u16, profile: SessionProfile) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let stream = time::timeout(profile.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ConsoleError::ConnectTimeout {
                host: host.to_string(),
                port,
            })?
            .map_err(|source| ConsoleError::ConnectFailed {
                host: host.to_string(),
                port,
                source,
            })?;

        let prompt_re = Regex::new(&profile.prompt)?;
        let rc_re = Regex::new(&format!(
            "{}\\d+{}",
            regex::escape(&profile.marker_open.to_string()),
            regex::escape(&profile.marker_close.to_string()),
        ))?;
        let log_sink = profile.log_path.as_ref().and_then(|path| {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "Session log disabled");
                    None
                }
            }
        });

        tracing::info!(host, port, "Telnet connection established");
        let decoder = FrameDecoder::new(profile.negotiate, profile.vt100query);
        Ok(Self {
            host: host.to_string(),
            port,
            stream,
            profile,
            eof: false,
            rawq: Vec::new(),
            cookedq: Vec::new(),
            decoder,
            prompt_re,
            rc_re,
            log_sink,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Once true, stays true.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Hand all negotiation decisions to `callback`; the default policy
    /// table is bypassed entirely for the rest of the session.
    pub fn set_negotiation_callback(&mut self, callback: NegotiationCallback) {
        self.decoder.set_callback(callback);
    }

    /// Shut the connection down. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if !self.eof {
            tracing::debug!(host = %self.host, port = self.port, "Closing telnet session");
        }
        let _ = self.stream.shutdown().await;
        self.eof = true;
        let held = self.decoder.reset();
        self.log_bytes(&held);
        self.cookedq.extend_from_slice(&held);
    }

    /// Write raw bytes, doubling any IAC. A failure here is fatal: a broken
    /// console session cannot be resumed mid-command.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let payload = negotiate::escape_iac(data);
        self.send_raw(&payload).await
    }

    /// Write `text` followed by a newline.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        tracing::debug!(host = %self.host, line = text, "Send");
        self.write(format!("{text}\n").as_bytes()).await
    }

    /// Read until `target` appears in the decoded stream or the deadline
    /// passes. On a match, everything up to and including the target is
    /// returned and the remainder stays buffered. On timeout, whatever has
    /// accumulated is returned instead; EOF with nothing buffered is fatal.
    pub async fn read_until(&mut self, target: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let n = target.len();
        let deadline = Instant::now() + timeout;
        self.pump_rawq().await?;
        if let Some(pos) = find_subsequence(&self.cookedq, target, 0) {
            return Ok(self.consume_cooked(pos + n));
        }
        while !self.eof {
            // Re-anchor the search so a target straddling the previous scan
            // boundary is still found: back off by one target length.
            let anchor = self.cookedq.len().saturating_sub(n);
            if Instant::now() >= deadline || !self.fill_rawq(deadline).await? {
                break;
            }
            self.pump_rawq().await?;
            if let Some(pos) = find_subsequence(&self.cookedq, target, anchor) {
                return Ok(self.consume_cooked(pos + n));
            }
        }
        self.read_very_lazy()
    }

    /// Read until one of `patterns` matches the decoded stream. Patterns are
    /// tried in list order against the entire buffer each round; the first by
    /// index wins even if a later pattern matches at an earlier offset.
    pub async fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<ExpectOutcome> {
        let deadline = Instant::now() + timeout;
        while !self.eof {
            self.pump_rawq().await?;
            for (index, pattern) in patterns.iter().enumerate() {
                let found = pattern.find(&self.cookedq).map(|m| (m.start(), m.end()));
                if let Some((start, end)) = found {
                    let text = self.consume_cooked(end);
                    return Ok(ExpectOutcome {
                        index: Some(index),
                        span: Some((start, end)),
                        text,
                    });
                }
            }
            if Instant::now() >= deadline || !self.fill_rawq(deadline).await? {
                break;
            }
        }
        let text = self.read_very_lazy()?;
        Ok(ExpectOutcome {
            index: None,
            span: None,
            text,
        })
    }

    /// Drain whatever is queued plus anything the socket can deliver right
    /// now, without waiting.
    pub async fn read_very_eager(&mut self) -> Result<Vec<u8>> {
        self.pump_rawq().await?;
        while !self.eof && self.sock_avail().await {
            self.fill_rawq(Instant::now()).await?;
            self.pump_rawq().await?;
        }
        self.read_very_lazy()
    }

    /// Like [`read_very_eager`](Self::read_very_eager) but stops pulling from
    /// the socket as soon as any cooked data is available.
    pub async fn read_eager(&mut self) -> Result<Vec<u8>> {
        self.pump_rawq().await?;
        while self.cookedq.is_empty() && !self.eof && self.sock_avail().await {
            self.fill_rawq(Instant::now()).await?;
            self.pump_rawq().await?;
        }
        self.read_very_lazy()
    }

    /// Decode what is already queued and drain it; no socket reads.
    pub async fn read_lazy(&mut self) -> Result<Vec<u8>> {
        self.pump_rawq().await?;
        self.read_very_lazy()
    }

    /// Drain the cooked queue only. Fails with `ConnectionClosed` when the
    /// queue is empty, the raw queue is empty and EOF has been seen.
    pub fn read_very_lazy(&mut self) -> Result<Vec<u8>> {
        let buf = std::mem::take(&mut self.cookedq);
        if buf.is_empty() && self.eof && self.rawq.is_empty() {
            return Err(self.closed());
        }
        Ok(buf)
    }

    /// Drain the bytes captured between the most recent SB…SE pair.
    pub fn read_sb_data(&mut self) -> Vec<u8> {
        self.decoder.take_sb_data()
    }

    /// Fatal wrapper over [`read_until`](Self::read_until): the expected text
    /// must appear before the deadline. The echoed command line and the
    /// trailing prompt fragment are stripped from the returned output.
    pub async fn get_read_until(&mut self, expected: &str, timeout: Duration) -> Result<String> {
        tracing::debug!(expected, "Looking for text");
        let output = self.read_until(expected.as_bytes(), timeout).await?;
        let output = String::from_utf8_lossy(&output).into_owned();
        if !output.contains(expected) {
            tracing::warn!(
                expected,
                host = %self.host,
                port = self.port,
                output = %output,
                "Expected text did not appear before the deadline"
            );
            return Err(self.expect_timeout(expected, output));
        }
        Ok(strip_echo_and_prompt(&output))
    }

    /// Wait for the shell prompt; returns the output between the echoed
    /// command and the prompt. Not finding the prompt is fatal.
    pub async fn find_prompt(&mut self, timeout: Duration) -> Result<String> {
        let prompt = self.prompt_re.clone();
        let outcome = self.expect(std::slice::from_ref(&prompt), timeout).await?;
        let text = String::from_utf8_lossy(&outcome.text).into_owned();
        if outcome.index.is_none() {
            tracing::warn!(
                prompt = %self.profile.prompt,
                host = %self.host,
                port = self.port,
                output = %text,
                "Prompt did not appear before the deadline"
            );
            let expected = self.profile.prompt.clone();
            return Err(self.expect_timeout(&expected, text));
        }
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() >= 2 {
            Ok(lines[1..lines.len() - 1].join("\n"))
        } else {
            Ok(String::new())
        }
    }

    /// Run one command and recover its exit status through the marker
    /// sentinel (`echo [$?]` with the profile's markers). The session is
    /// half-duplex: exactly one command may be in flight, and any timeout or
    /// EOF along the way is fatal.
    pub async fn exec_cmd(&mut self, cmd: &str, timeout: Duration) -> Result<(i32, String)> {
        tracing::info!(host = %self.host, cmd, "Executing command");
        self.write_line(cmd).await?;
        let output = self.find_prompt(timeout).await?;
        tracing::debug!(output = %output, "Command output");

        let rc_cmd = format!(
            "echo {}$?{}",
            self.profile.marker_open, self.profile.marker_close
        );
        self.write_line(&rc_cmd).await?;
        let rc_re = self.rc_re.clone();
        let sentinel_timeout = self.profile.expect_timeout;
        let outcome = self
            .expect(std::slice::from_ref(&rc_re), sentinel_timeout)
            .await?;
        let rc = match outcome.span {
            Some((start, end)) if outcome.index.is_some() => {
                let matched = String::from_utf8_lossy(&outcome.text[start..end]).into_owned();
                let digits = matched
                    .replace(self.profile.marker_open, "")
                    .replace(self.profile.marker_close, "");
                digits
                    .parse::<i32>()
                    .map_err(|_| ConsoleError::BadReturnCode { text: matched })?
            }
            _ => {
                let text = String::from_utf8_lossy(&outcome.text).into_owned();
                tracing::error!(host = %self.host, cmd, "Failed to recover return code");
                return Err(self.expect_timeout("return code sentinel", text));
            }
        };
        tracing::debug!(rc, "Return code");
        self.find_prompt(sentinel_timeout).await?;
        Ok((rc, output))
    }

    /// Authenticate on the console.
    ///
    /// `reset` selects the first-boot flow where the console forces a
    /// password change: the factory default password is entered twice, then
    /// the desired password twice. Otherwise an empty line probes for either
    /// a login prompt or an existing shell, with a bounded number of
    /// attempts; a prompt means the user is already logged in.
    pub async fn login(&mut self, username: &str, password: &str, reset: bool) -> Result<()> {
        let pw_prompt = self.profile.password_prompt.clone();
        let timeout = self.profile.expect_timeout;

        if reset {
            let default_password = self.profile.default_password.clone();
            self.write_line(username).await?;
            self.get_read_until(&pw_prompt, timeout).await?;
            self.write_line(&default_password).await?;
            self.get_read_until(&pw_prompt, timeout).await?;
            self.write_line(&default_password).await?;
            self.get_read_until(&pw_prompt, timeout).await?;
            self.write_line(password).await?;
            self.get_read_until(&pw_prompt, timeout).await?;
            self.write_line(password).await?;
            self.find_prompt(timeout).await?;
            return Ok(());
        }

        let patterns = [
            Regex::new(&regex::escape(&self.profile.login_prompt))?,
            self.prompt_re.clone(),
        ];
        for _ in 0..self.profile.login_attempts {
            tracing::debug!("Searching for login prompt");
            self.write_line("").await?;
            let outcome = self.expect(&patterns, timeout).await?;
            match outcome.index {
                Some(0) => {
                    tracing::info!(username, "Found login prompt");
                    self.write(format!("{username}\r\n").as_bytes()).await?;
                    if !password.is_empty() {
                        self.get_read_until(&pw_prompt, timeout).await?;
                    }
                    self.write(format!("{password}\r\n").as_bytes()).await?;
                    self.find_prompt(timeout).await?;
                    return Ok(());
                }
                Some(_) => {
                    tracing::debug!(username, "Already logged in");
                    return Ok(());
                }
                None => continue,
            }
        }
        tracing::error!(
            host = %self.host,
            port = self.port,
            username,
            "Failed to find login prompt or shell prompt"
        );
        Err(ConsoleError::LoginFailed {
            host: self.host.clone(),
            port: self.port,
            username: username.to_string(),
        })
    }

    /// Dumb-terminal mode: forward stdin lines to the console and decoded
    /// output to stdout until either side closes.
    pub async fn interact(&mut self) -> Result<()> {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => self.write_line(&line).await?,
                        None => return Ok(()),
                    }
                }
                _ = time::sleep(Duration::from_millis(100)) => {
                    match self.read_very_eager().await {
                        Ok(buf) if !buf.is_empty() => {
                            stdout.write_all(&buf).await?;
                            stdout.flush().await?;
                        }
                        Ok(_) => {}
                        Err(ConsoleError::ConnectionClosed { .. }) => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// One bounded refill: wait for readability until `deadline`, then pull
    /// at most [`RAWQ_CHUNK`] bytes. Returns false when the deadline passed
    /// first. A zero-length read marks EOF and resets the decoder.
    async fn fill_rawq(&mut self, deadline: Instant) -> Result<bool> {
        let mut chunk = [0u8; RAWQ_CHUNK];
        loop {
            match time::timeout_at(deadline, self.stream.readable()).await {
                Err(_) => return Ok(false),
                Ok(ready) => ready?,
            }
            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!(host = %self.host, port = self.port, "Remote closed connection");
                    self.eof = true;
                    let held = self.decoder.reset();
                    self.log_bytes(&held);
                    self.cookedq.extend_from_slice(&held);
                    return Ok(true);
                }
                Ok(n) => {
                    self.rawq.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(err) => {
                    self.eof = true;
                    return Err(ConsoleError::Io(err));
                }
            }
        }
    }

    /// Run the decoder over the raw queue and write back any replies it
    /// produced (negotiation answers, VT100 device status).
    async fn pump_rawq(&mut self) -> Result<()> {
        if self.rawq.is_empty() {
            return Ok(());
        }
        let raw = std::mem::take(&mut self.rawq);
        let decoded = self.decoder.process(&raw);
        if !decoded.data.is_empty() {
            self.log_bytes(&decoded.data);
            self.cookedq.extend_from_slice(&decoded.data);
        }
        for frame in decoded.replies {
            self.send_raw(&frame).await?;
        }
        Ok(())
    }

    async fn send_raw(&mut self, frame: &[u8]) -> Result<()> {
        let write = async {
            self.stream.write_all(frame).await?;
            self.stream.flush().await
        };
        write.await.map_err(|source| ConsoleError::WriteFailed {
            host: self.host.clone(),
            port: self.port,
            source,
        })
    }

    async fn sock_avail(&self) -> bool {
        time::timeout(Duration::ZERO, self.stream.readable())
            .await
            .map(|ready| ready.is_ok())
            .unwrap_or(false)
    }

    fn consume_cooked(&mut self, end: usize) -> Vec<u8> {
        let rest = self.cookedq.split_off(end);
        std::mem::replace(&mut self.cookedq, rest)
    }

    /// Append decoded bytes to the session log, decoded leniently; logging
    /// must never take the session down.
    fn log_bytes(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(sink) = self.log_sink.as_mut() {
            let text = String::from_utf8_lossy(data);
            let _ = sink.write_all(text.as_bytes());
            let _ = sink.flush();
        }
    }

    fn closed(&self) -> ConsoleError {
        ConsoleError::ConnectionClosed {
            host: self.host.clone(),
            port: self.port,
        }
    }

    fn expect_timeout(&self, expected: &str, output: String) -> ConsoleError {
        ConsoleError::ExpectTimeout {
            expected: expected.to_string(),
            host: self.host.clone(),
            port: self.port,
            output,
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    let start = from.min(haystack.len());
    haystack[start..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| start + pos)
}

/// Drop the echoed command (first line) and the prompt fragment (last line)
/// from captured console output.
fn strip_echo_and_prompt(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() > 2 {
        lines[1..lines.len() - 1].join("\n")
    } else if lines.len() == 2 {
        lines[1].to_string()
    } else {
        String::new()
    }
}
