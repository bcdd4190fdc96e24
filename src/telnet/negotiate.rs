//! TELNET wire constants (RFC 854) and the default negotiation policy.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

/// Option byte handed to the callback for commands that carry no option.
pub const NOOPT: u8 = 0;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;
pub const OPT_TTYPE: u8 = 24;
pub const OPT_NAWS: u8 = 31;

pub const ESC: u8 = 0x1b;
/// VT100 Device Status Report query, sent by some BIOS consoles during boot.
pub const VT100_DEVICE_STATUS: &[u8] = &[ESC, b'[', b'5', b'n'];
/// The "device OK" answer that lets such consoles proceed.
pub const VT100_DEVICE_OK: &[u8] = &[ESC, b'[', b'0', b'n'];

/// Caller-supplied negotiation handler. When set it fully replaces the
/// default policy: it receives every `(command, option)` pair (bare commands
/// arrive with [`NOOPT`]) and returns the reply frames to put on the wire.
pub type NegotiationCallback = Box<dyn FnMut(u8, u8) -> Vec<Vec<u8>> + Send>;

/// Default reply table for a DO/DONT/WILL/WONT request.
///
/// A passive client (`negotiate == false`) declines everything: agreeing to
/// a capability we do not implement would desynchronize the remote console's
/// echo and edit behavior. With `negotiate` on, the client cooperates just
/// enough to be treated as a raw, non-line-buffered terminal: it grants
/// Suppress-Go-Ahead in both directions and accepts remote Echo.
///
/// Echo is only granted on the WILL branch, never in answer to DO/DONT; the
/// asymmetry matches the deployed behavior and is kept as observed.
pub(crate) fn default_reply(negotiate: bool, command: u8, option: u8) -> Option<[u8; 3]> {
    match command {
        DO | DONT => {
            if negotiate && option == OPT_SGA {
                Some([IAC, WILL, option])
            } else {
                Some([IAC, WONT, option])
            }
        }
        WILL | WONT => {
            if negotiate && option == OPT_SGA {
                Some([IAC, DO, option])
            } else if negotiate && command == WILL && option == OPT_ECHO {
                Some([IAC, DO, option])
            } else {
                Some([IAC, DONT, option])
            }
        }
        _ => None,
    }
}

/// Double every IAC so payload bytes of 255 survive the trip.
pub(crate) fn escape_iac(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &byte in bytes {
        if byte == IAC {
            out.push(IAC);
        }
        out.push(byte);
    }
    out
}
