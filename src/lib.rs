//! Remote serial-console control over TELNET.
//!
//! `conctl` drives the telnet consoles of lab machines during automated
//! provisioning: it answers option negotiation and VT100 device-status
//! probes, reads with hard deadlines, and layers login / prompt discovery /
//! command execution on top of the byte stream.

pub mod config;
pub mod console;
pub mod error;
pub mod telnet;

pub use config::Config;
pub use console::RemoteConsole;
pub use error::{ConsoleError, Result};
pub use telnet::{ExpectOutcome, SessionProfile, TelnetClient};
