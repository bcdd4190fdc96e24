use super::negotiate::{
    self, DO, DONT, ESC, IAC, NOOPT, NegotiationCallback, SB, SE, VT100_DEVICE_OK,
    VT100_DEVICE_STATUS, WILL, WONT,
};

/// Longest run of bytes withheld while checking for a device-status query.
const VT100_QUERY_MAX: usize = 10;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    #[default]
    Data,
    Iac,
    Command(u8),
}

/// Per-byte IAC framing state machine.
///
/// One `process` call consumes a raw chunk and yields the application bytes
/// plus any reply frames the caller must write back to the peer. The decoder
/// itself never touches the socket and never blocks; partial command and
/// sub-negotiation state is retained across calls until `reset` (EOF/close).
pub(crate) struct FrameDecoder {
    state: DecodeState,
    sb: bool,
    sbdataq: Vec<u8>,
    vt100_pending: Vec<u8>,
    negotiate: bool,
    vt100query: bool,
    callback: Option<NegotiationCallback>,
}

#[derive(Debug, Default)]
pub(crate) struct Decoded {
    /// Application bytes for the cooked queue.
    pub data: Vec<u8>,
    /// Frames to write back to the peer (negotiation and VT100 answers).
    pub replies: Vec<Vec<u8>>,
}

impl FrameDecoder {
    pub(crate) fn new(negotiate: bool, vt100query: bool) -> Self {
        Self {
            state: DecodeState::Data,
            sb: false,
            sbdataq: Vec::new(),
            vt100_pending: Vec::new(),
            negotiate,
            vt100query,
            callback: None,
        }
    }

    pub(crate) fn set_callback(&mut self, callback: NegotiationCallback) {
        self.callback = Some(callback);
    }

    pub(crate) fn process(&mut self, input: &[u8]) -> Decoded {
        let mut out = Decoded {
            data: Vec::with_capacity(input.len()),
            replies: Vec::new(),
        };

        for &byte in input {
            match self.state {
                DecodeState::Data => {
                    // NUL and 0x11 are line-printer padding; drop them.
                    if byte == 0x00 || byte == 0x11 {
                        continue;
                    }
                    if byte == IAC {
                        self.flush_vt100(&mut out.data);
                        self.state = DecodeState::Iac;
                    } else if self.vt100query && !self.sb {
                        self.feed_vt100(byte, &mut out);
                    } else {
                        self.push_data(byte, &mut out.data);
                    }
                }
                DecodeState::Iac => match byte {
                    DO | DONT | WILL | WONT => {
                        self.state = DecodeState::Command(byte);
                    }
                    IAC => {
                        self.push_data(IAC, &mut out.data);
                        self.state = DecodeState::Data;
                    }
                    SB => {
                        self.sb = true;
                        self.sbdataq.clear();
                        self.state = DecodeState::Data;
                    }
                    SE => {
                        self.sb = false;
                        self.state = DecodeState::Data;
                    }
                    other => {
                        // RFC 854 requires tolerating commands we do not
                        // implement; keep scanning.
                        self.state = DecodeState::Data;
                        if let Some(callback) = self.callback.as_mut() {
                            out.replies.extend(callback(other, NOOPT));
                        } else {
                            tracing::debug!(command = other, "Unrecognized IAC command ignored");
                        }
                    }
                },
                DecodeState::Command(command) => {
                    self.state = DecodeState::Data;
                    if let Some(callback) = self.callback.as_mut() {
                        out.replies.extend(callback(command, byte));
                    } else if let Some(reply) =
                        negotiate::default_reply(self.negotiate, command, byte)
                    {
                        out.replies.push(reply.to_vec());
                    }
                }
            }
        }

        out
    }

    /// Drain the bytes accumulated between the last SB and SE.
    pub(crate) fn take_sb_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.sbdataq)
    }

    /// Reset command and sub-negotiation accumulators after a hard EOF.
    /// Returns bytes that were withheld for VT100 query detection so the
    /// caller can deliver them; application bytes are never dropped.
    pub(crate) fn reset(&mut self) -> Vec<u8> {
        self.state = DecodeState::Data;
        self.sb = false;
        std::mem::take(&mut self.vt100_pending)
    }

    fn push_data(&mut self, byte: u8, data: &mut Vec<u8>) {
        if self.sb {
            self.sbdataq.push(byte);
        } else {
            data.push(byte);
        }
    }

    /// Accumulate a potential VT100 Device Status query. On an exact match
    /// the query bytes are consumed and one Device-OK answer is queued; any
    /// byte that rules the query out releases the held bytes unchanged.
    fn feed_vt100(&mut self, byte: u8, out: &mut Decoded) {
        if self.vt100_pending.is_empty() {
            if byte == ESC {
                self.vt100_pending.push(byte);
            } else {
                out.data.push(byte);
            }
            return;
        }

        self.vt100_pending.push(byte);
        if self.vt100_pending == VT100_DEVICE_STATUS {
            out.replies.push(VT100_DEVICE_OK.to_vec());
            self.vt100_pending.clear();
        } else if !VT100_DEVICE_STATUS.starts_with(&self.vt100_pending)
            || self.vt100_pending.len() > VT100_QUERY_MAX
        {
            self.flush_vt100(&mut out.data);
        }
    }

    /// Release withheld query-candidate bytes into the data stream. A
    /// trailing ESC starts a fresh accumulation.
    fn flush_vt100(&mut self, data: &mut Vec<u8>) {
        if self.vt100_pending.is_empty() {
            return;
        }
        let mut held = std::mem::take(&mut self.vt100_pending);
        if held.len() > 1 && held.last() == Some(&ESC) {
            held.pop();
            self.vt100_pending.push(ESC);
        }
        data.extend_from_slice(&held);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::negotiate::{OPT_ECHO, OPT_SGA, OPT_TTYPE};

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(false, false)
    }

    #[test]
    fn passes_plain_data() {
        let mut dec = decoder();
        let out = dec.process(b"hello world");
        assert_eq!(out.data, b"hello world");
        assert!(out.replies.is_empty());
    }

    #[test]
    fn unescapes_doubled_iac() {
        let mut dec = decoder();
        let out = dec.process(&[b'a', IAC, IAC, b'b']);
        assert_eq!(out.data, vec![b'a', IAC, b'b']);
        assert!(out.replies.is_empty());
    }

    #[test]
    fn drops_nul_and_pad_bytes() {
        let mut dec = decoder();
        let out = dec.process(&[0x00, b'a', 0x11, b'b', 0x00]);
        assert_eq!(out.data, b"ab");
    }

    #[test]
    fn declines_unknown_do_statelessly() {
        let mut dec = decoder();
        let first = dec.process(&[IAC, DO, OPT_TTYPE]);
        let second = dec.process(&[IAC, DO, OPT_TTYPE]);
        assert_eq!(first.replies, vec![vec![IAC, WONT, OPT_TTYPE]]);
        assert_eq!(second.replies, vec![vec![IAC, WONT, OPT_TTYPE]]);
    }

    #[test]
    fn negotiate_mode_grants_sga_and_remote_echo() {
        let mut dec = FrameDecoder::new(true, false);
        let out = dec.process(&[IAC, DO, OPT_SGA, IAC, WILL, OPT_ECHO, IAC, WONT, OPT_ECHO]);
        assert_eq!(
            out.replies,
            vec![
                vec![IAC, WILL, OPT_SGA],
                vec![IAC, DO, OPT_ECHO],
                vec![IAC, DONT, OPT_ECHO],
            ]
        );
    }

    #[test]
    fn retains_partial_command_across_chunks() {
        let mut dec = decoder();
        assert!(dec.process(&[IAC]).replies.is_empty());
        assert!(dec.process(&[DO]).replies.is_empty());
        let out = dec.process(&[OPT_TTYPE]);
        assert_eq!(out.replies, vec![vec![IAC, WONT, OPT_TTYPE]]);
    }

    #[test]
    fn isolates_subnegotiation_bytes() {
        let mut dec = decoder();
        let out = dec.process(&[b'x', IAC, SB, OPT_TTYPE, 1, IAC, SE, b'y']);
        assert_eq!(out.data, b"xy");
        assert_eq!(dec.take_sb_data(), vec![OPT_TTYPE, 1]);
        assert!(dec.take_sb_data().is_empty());
    }

    #[test]
    fn new_sb_discards_previous_span() {
        let mut dec = decoder();
        dec.process(&[IAC, SB, 1, 2, IAC, SE]);
        dec.process(&[IAC, SB, 3, 4, IAC, SE]);
        assert_eq!(dec.take_sb_data(), vec![3, 4]);
    }

    #[test]
    fn doubled_iac_inside_subnegotiation_stays_in_span() {
        let mut dec = decoder();
        let out = dec.process(&[IAC, SB, 1, IAC, IAC, 2, IAC, SE]);
        assert!(out.data.is_empty());
        assert_eq!(dec.take_sb_data(), vec![1, IAC, 2]);
    }

    #[test]
    fn answers_vt100_device_status_query() {
        let mut dec = FrameDecoder::new(false, true);
        let out = dec.process(b"\x1b[5nready");
        assert_eq!(out.replies, vec![VT100_DEVICE_OK.to_vec()]);
        assert_eq!(out.data, b"ready");
    }

    #[test]
    fn answers_query_split_across_chunks() {
        let mut dec = FrameDecoder::new(false, true);
        let first = dec.process(b"\x1b[");
        assert!(first.data.is_empty());
        let second = dec.process(b"5n");
        assert_eq!(second.replies, vec![VT100_DEVICE_OK.to_vec()]);
        assert!(second.data.is_empty());
    }

    #[test]
    fn non_query_escape_sequences_pass_through() {
        let mut dec = FrameDecoder::new(false, true);
        let out = dec.process(b"\x1b[13;22Hmenu");
        assert!(out.replies.is_empty());
        assert_eq!(out.data, b"\x1b[13;22Hmenu");
    }

    #[test]
    fn back_to_back_escapes_restart_accumulation() {
        let mut dec = FrameDecoder::new(false, true);
        let first = dec.process(b"\x1b\x1b[5n");
        assert_eq!(first.data, b"\x1b");
        assert_eq!(first.replies, vec![VT100_DEVICE_OK.to_vec()]);
    }

    #[test]
    fn query_passes_through_when_disabled() {
        let mut dec = FrameDecoder::new(false, false);
        let out = dec.process(b"\x1b[5nready");
        assert!(out.replies.is_empty());
        assert_eq!(out.data, b"\x1b[5nready");
    }

    #[test]
    fn reset_releases_withheld_query_bytes() {
        let mut dec = FrameDecoder::new(false, true);
        let out = dec.process(b"\x1b[");
        assert!(out.data.is_empty());
        assert_eq!(dec.reset(), b"\x1b[");
    }

    #[test]
    fn callback_overrides_default_policy() {
        let mut dec = decoder();
        dec.set_callback(Box::new(|command, option| {
            assert_eq!(command, DO);
            assert_eq!(option, OPT_TTYPE);
            vec![vec![IAC, WILL, option]]
        }));
        let out = dec.process(&[IAC, DO, OPT_TTYPE]);
        assert_eq!(out.replies, vec![vec![IAC, WILL, OPT_TTYPE]]);
    }

    #[test]
    fn callback_sees_bare_commands_with_noopt() {
        let mut dec = decoder();
        dec.set_callback(Box::new(|command, option| {
            assert_eq!(command, 241); // NOP
            assert_eq!(option, NOOPT);
            Vec::new()
        }));
        let out = dec.process(&[IAC, 241, b'a']);
        assert_eq!(out.data, b"a");
    }

    #[test]
    fn unknown_bare_command_is_ignored() {
        let mut dec = decoder();
        let out = dec.process(&[b'a', IAC, 246, b'b']); // AYT
        assert_eq!(out.data, b"ab");
        assert!(out.replies.is_empty());
    }
}
