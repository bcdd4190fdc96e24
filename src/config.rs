use crate::error::{ConsoleError, Result};
use crate::telnet::SessionProfile;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub console: ConsoleConfig,
    pub credentials: CredentialConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub negotiate: bool,
    pub vt100query: bool,
    pub prompt: String,
    pub login_prompt: String,
    pub password_prompt: String,
    pub marker_open: char,
    pub marker_close: char,
    pub connect_timeout_secs: u64,
    pub expect_timeout_secs: u64,
    pub login_attempts: usize,
    /// Directory for per-host byte-level session logs; unset disables them.
    pub log_dir: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        let profile = SessionProfile::default();
        Self {
            negotiate: profile.negotiate,
            vt100query: profile.vt100query,
            prompt: profile.prompt,
            login_prompt: profile.login_prompt,
            password_prompt: profile.password_prompt,
            marker_open: profile.marker_open,
            marker_close: profile.marker_close,
            connect_timeout_secs: profile.connect_timeout.as_secs(),
            expect_timeout_secs: profile.expect_timeout.as_secs(),
            login_attempts: profile.login_attempts,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub username: String,
    pub password: String,
    /// Factory password for the forced first-boot password change.
    pub default_password: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
            default_password: "admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run a command on the remote console and print its output.
    Exec(ExecArgs),
    /// Open an interactive session on the remote console.
    Attach(AttachArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct CommonArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    pub host: String,
    #[arg(long, default_value_t = 23)]
    pub port: u16,
    #[arg(long)]
    pub negotiate: bool,
    #[arg(long)]
    pub vt100query: bool,
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Parser, Clone)]
pub struct ExecArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    pub cmd: String,
    /// Log in before running the command.
    #[arg(long)]
    pub login: bool,
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Parser, Clone)]
pub struct AttachArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

impl Config {
    pub fn load(args: &CommonArgs) -> Result<Self> {
        let mut config = if let Some(path) = &args.config {
            Self::from_file(path)?
        } else if Path::new("conctl.toml").exists() {
            Self::from_file(Path::new("conctl.toml"))?
        } else {
            Self::default()
        };

        config.apply_env();
        config.apply_cli(args);
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| ConsoleError::Config {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let parsed: Self = toml::from_str(&content).map_err(|err| ConsoleError::Config {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Ok(parsed)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("CONCTL_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Ok(value) = env::var("CONCTL_LOG_DIR") {
            self.console.log_dir = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var("CONCTL_USERNAME") {
            self.credentials.username = value;
        }
        if let Ok(value) = env::var("CONCTL_PASSWORD") {
            self.credentials.password = value;
        }
    }

    fn apply_cli(&mut self, args: &CommonArgs) {
        if args.negotiate {
            self.console.negotiate = true;
        }
        if args.vt100query {
            self.console.vt100query = true;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Build the session profile for one host. The per-host log file lands
    /// under `log_dir` named after the host.
    pub fn profile_for(&self, host: &str) -> SessionProfile {
        SessionProfile {
            negotiate: self.console.negotiate,
            vt100query: self.console.vt100query,
            prompt: self.console.prompt.clone(),
            login_prompt: self.console.login_prompt.clone(),
            password_prompt: self.console.password_prompt.clone(),
            default_password: self.credentials.default_password.clone(),
            marker_open: self.console.marker_open,
            marker_close: self.console.marker_close,
            connect_timeout: Duration::from_secs(self.console.connect_timeout_secs),
            expect_timeout: Duration::from_secs(self.console.expect_timeout_secs),
            login_attempts: self.console.login_attempts,
            log_path: self
                .console
                .log_dir
                .as_ref()
                .map(|dir| dir.join(format!("{host}.log"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_console_profile() {
        let config = Config::default();
        assert_eq!(config.console.prompt, r".*\$ ?");
        assert_eq!(config.console.login_prompt, "ogin:");
        assert_eq!(config.console.password_prompt, "assword:");
        assert_eq!(config.console.connect_timeout_secs, 15);
        assert_eq!(config.console.expect_timeout_secs, 3600);
        assert_eq!(config.console.login_attempts, 35);
        assert!(!config.console.negotiate);
        assert_eq!(config.credentials.username, "admin");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [console]
            negotiate = true
            prompt = "router> ?"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert!(parsed.console.negotiate);
        assert_eq!(parsed.console.prompt, "router> ?");
        assert_eq!(parsed.logging.level, "debug");
        // Untouched sections keep their defaults.
        assert_eq!(parsed.console.login_attempts, 35);
        assert_eq!(parsed.credentials.password, "admin");
    }

    #[test]
    fn profile_for_maps_host_log_path() {
        let mut config = Config::default();
        config.console.log_dir = Some(PathBuf::from("/var/log/conctl"));
        config.console.vt100query = true;
        let profile = config.profile_for("node-3");
        assert!(profile.vt100query);
        assert_eq!(
            profile.log_path.as_deref(),
            Some(Path::new("/var/log/conctl/node-3.log"))
        );
        assert_eq!(profile.expect_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn profile_without_log_dir_has_no_log_path() {
        let profile = Config::default().profile_for("node-3");
        assert!(profile.log_path.is_none());
    }
}
