//! Raw REPL framing and response handling
//!
//! The device's raw REPL answers a command (terminated by Ctrl-D) with
//! `OK<stdout>\x04<stderr>\x04>`. Replies arrive as arbitrary notification
//! chunks; [`ResponseCollector`] glues them together until the trailing prompt
//! shows up.

use crate::protocol::{
    ECHO_PROMPT_MARKER, END_OF_TRANSMISSION, FRIENDLY_PROMPT_MARKER, OK_MARKER,
    RAW_PROMPT_MARKER,
};

// ----------------------------------------------------------------------------
// Mode State Machine
// ----------------------------------------------------------------------------

/// REPL mode as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplMode {
    /// Device echoes to a human terminal
    #[default]
    Normal,
    /// Enter sequence sent, banner not yet seen
    EnteringRaw,
    /// Commands and responses are framed
    RawActive,
    /// Exit sequence sent, friendly banner not yet seen
    ExitingRaw,
}

impl ReplMode {
    /// Whether inbound bytes belong to the response collector
    pub fn is_raw(&self) -> bool {
        !matches!(self, ReplMode::Normal)
    }
}

// ----------------------------------------------------------------------------
// Command Framing
// ----------------------------------------------------------------------------

/// Whether the text contains anything between space and DEL
pub fn has_printable(text: &str) -> bool {
    text.bytes().any(|b| (0x20..=0x7F).contains(&b))
}

/// Prepare a command for the wire. In raw mode a printable command gets the
/// Ctrl-D terminator; bare control sequences are already complete frames.
pub fn frame_command(text: &str, raw: bool) -> String {
    let mut framed = String::with_capacity(text.len() + 1);
    framed.push_str(text);
    if raw && has_printable(text) {
        framed.push(END_OF_TRANSMISSION);
    }
    framed
}

/// Make control characters visible for logs
pub fn escape_control(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\x01' => escaped.push_str("\\x01"),
            '\x02' => escaped.push_str("\\x02"),
            '\x03' => escaped.push_str("\\x03"),
            '\x04' => escaped.push_str("\\x04"),
            other => escaped.push(other),
        }
    }
    escaped
}

// ----------------------------------------------------------------------------
// Response Collection
// ----------------------------------------------------------------------------

/// What ends the reply to the command that was just sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyTerminator {
    /// Entering raw mode and soft resets: a bare raw (`>`) or friendly
    /// (`>>> `) prompt
    #[default]
    Prompt,
    /// Leaving raw mode: the friendly prompt only
    FriendlyPrompt,
    /// Framed commands: `\x04>` somewhere after the `OK` acknowledgement
    Framed,
}

impl ReplyTerminator {
    /// Terminator for `text` sent while the session is in `mode`
    pub fn for_command(text: &str, mode: ReplMode) -> Self {
        match mode {
            ReplMode::RawActive if has_printable(text) => ReplyTerminator::Framed,
            ReplMode::ExitingRaw => ReplyTerminator::FriendlyPrompt,
            _ => ReplyTerminator::Prompt,
        }
    }

    pub fn is_complete(&self, accumulated: &str) -> bool {
        match self {
            ReplyTerminator::Prompt => {
                accumulated.ends_with(RAW_PROMPT_MARKER)
                    || accumulated.ends_with(FRIENDLY_PROMPT_MARKER)
            }
            ReplyTerminator::FriendlyPrompt => accumulated.ends_with(FRIENDLY_PROMPT_MARKER),
            ReplyTerminator::Framed => accumulated
                .find(OK_MARKER)
                .map(|start| &accumulated[start + OK_MARKER.len()..])
                .is_some_and(|rest| rest.ends_with(FRAMED_REPLY_END)),
        }
    }
}

const FRAMED_REPLY_END: &str = "\x04>";

/// Accumulates notification chunks into complete replies
#[derive(Debug, Default)]
pub struct ResponseCollector {
    buffer: String,
    terminator: ReplyTerminator,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose how the next reply ends
    pub fn expect(&mut self, terminator: ReplyTerminator) {
        self.terminator = terminator;
    }

    /// Append a chunk; returns the whole reply once the terminator arrives
    /// and resets for the next one.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        self.buffer.push_str(chunk);
        if self.terminator.is_complete(&self.buffer) {
            Some(core::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.terminator = ReplyTerminator::Prompt;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// UTF-8 decoder that carries a multi-byte sequence split across
/// notifications over to the next chunk
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.carry.extend_from_slice(chunk);
        let bytes = core::mem::take(&mut self.carry);
        match core::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(e) if e.error_len().is_none() => {
                let (valid, tail) = bytes.split_at(e.valid_up_to());
                self.carry = tail.to_vec();
                String::from_utf8_lossy(valid).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

// ----------------------------------------------------------------------------
// Reply Parsing
// ----------------------------------------------------------------------------

/// Standard output of a raw REPL reply: the text between `OK` and the first
/// Ctrl-D after it. `None` when either marker is missing.
pub fn extract_payload(response: &str) -> Option<&str> {
    let start = response.find(OK_MARKER)? + OK_MARKER.len();
    let rest = &response[start..];
    let end = rest.find(END_OF_TRANSMISSION)?;
    Some(&rest[..end])
}

/// Error output of a raw REPL reply: the text between the two Ctrl-Ds
pub fn extract_error(response: &str) -> Option<&str> {
    let start = response.find(OK_MARKER)? + OK_MARKER.len();
    let rest = &response[start..];
    let first = rest.find(END_OF_TRANSMISSION)? + 1;
    let rest = &rest[first..];
    let second = rest.find(END_OF_TRANSMISSION)?;
    Some(&rest[..second])
}

/// Everything the command printed (output and errors) without framing
pub fn extract_output(response: &str) -> Option<String> {
    let start = response.find(OK_MARKER)? + OK_MARKER.len();
    let end = response.rfind(RAW_PROMPT_MARKER).filter(|end| *end >= start)?;
    Some(
        response[start..end]
            .chars()
            .filter(|c| *c != END_OF_TRANSMISSION)
            .collect(),
    )
}

/// Whether a reply carries a Python exception. Only the error section
/// counts; stdout may contain anything.
pub fn is_device_error(response: &str) -> bool {
    extract_error(response).is_some_and(|detail| !detail.trim().is_empty())
}

/// Terminal echo during an internal operation: only the part starting at the
/// friendly prompt is shown
pub fn echo_after_prompt(chunk: &str) -> Option<&str> {
    chunk.find(ECHO_PROMPT_MARKER).map(|index| &chunk[index..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_command_gets_terminator_in_raw_mode() {
        assert_eq!(frame_command("1+1", true), "1+1\x04");
        assert_eq!(frame_command("1+1", false), "1+1");
    }

    #[test]
    fn test_control_sequence_sent_unterminated() {
        assert_eq!(frame_command("\x03\x01", true), "\x03\x01");
        assert_eq!(frame_command("\x03\x04", true), "\x03\x04");
    }

    #[test]
    fn test_collector_waits_for_prompt() {
        let mut collector = ResponseCollector::new();
        assert_eq!(collector.push("OK2\r"), None);
        assert_eq!(collector.push("\n\x04"), None);
        assert_eq!(collector.push("\x04>").as_deref(), Some("OK2\r\n\x04\x04>"));
        assert!(collector.is_empty());
    }

    #[test]
    fn test_collector_accepts_friendly_prompt() {
        let mut collector = ResponseCollector::new();
        let reply = collector.push("MicroPython v1.19\r\n>>> ");
        assert_eq!(reply.as_deref(), Some("MicroPython v1.19\r\n>>> "));
    }

    #[test]
    fn test_framed_reply_ignores_prompt_in_output() {
        let mut collector = ResponseCollector::new();
        collector.expect(ReplyTerminator::for_command("print('a>b')", ReplMode::RawActive));
        assert_eq!(collector.push("OKaaaaaaaaaaaaaaaaa>"), None);
        assert_eq!(collector.push("tail\r\n\x04"), None);
        assert_eq!(
            collector.push("\x04>").as_deref(),
            Some("OKaaaaaaaaaaaaaaaaa>tail\r\n\x04\x04>")
        );
    }

    #[test]
    fn test_framed_reply_needs_acknowledgement() {
        let framed = ReplyTerminator::Framed;
        assert!(!framed.is_complete("\x04>"));
        assert!(framed.is_complete("OK2\r\n\x04>"));
        assert!(framed.is_complete("OK\x04Traceback\r\n\x04>"));
    }

    #[test]
    fn test_control_sequences_end_at_prompt() {
        assert_eq!(
            ReplyTerminator::for_command("\x03\x04", ReplMode::RawActive),
            ReplyTerminator::Prompt
        );
        assert_eq!(
            ReplyTerminator::for_command("\x03\x01", ReplMode::EnteringRaw),
            ReplyTerminator::Prompt
        );
        assert_eq!(
            ReplyTerminator::for_command("\x03\x02", ReplMode::ExitingRaw),
            ReplyTerminator::FriendlyPrompt
        );
        assert!(!ReplyTerminator::FriendlyPrompt.is_complete("\r\nMicroPython v1.19\r\n>"));
        assert_eq!(
            ReplyTerminator::for_command("1+1", ReplMode::Normal),
            ReplyTerminator::Prompt
        );
    }

    #[test]
    fn test_clear_restores_prompt_terminator() {
        let mut collector = ResponseCollector::new();
        collector.expect(ReplyTerminator::Framed);
        collector.push("OK");
        collector.clear();
        assert!(collector.is_empty());
        let banner = "raw REPL; CTRL-B to exit\r\n>";
        assert_eq!(collector.push(banner).as_deref(), Some(banner));
    }

    #[test]
    fn test_error_text_in_output_is_not_a_device_error() {
        assert!(!is_device_error("OKErrorAAA\r\n\x04\x04>"));
        assert!(!is_device_error("OKNoError\r\n\x04\x04>"));
        assert!(is_device_error("OK\x04OSError: 2\r\n\x04>"));
    }

    #[test]
    fn test_extract_payload_between_ok_and_terminator() {
        assert_eq!(extract_payload("OK2\r\n\x04>"), Some("2\r\n"));
        assert_eq!(extract_payload("OK\x04\x04>"), Some(""));
        assert_eq!(extract_payload("garbage>"), None);
        assert_eq!(extract_payload("OK but unterminated"), None);
    }

    #[test]
    fn test_extract_error_section() {
        let reply = "OK\x04Traceback\r\nOSError: 2\r\n\x04>";
        assert_eq!(extract_error(reply), Some("Traceback\r\nOSError: 2\r\n"));
        assert!(is_device_error(reply));
        assert_eq!(extract_error("OK2\r\n\x04>"), None);
    }

    #[test]
    fn test_extract_output_strips_framing() {
        let reply = "OKhello\r\n\x04oops\x04>";
        assert_eq!(extract_output(reply).as_deref(), Some("hello\r\noops"));
        assert_eq!(extract_output(">OK"), None);
    }

    #[test]
    fn test_echo_after_prompt() {
        assert_eq!(echo_after_prompt("soft reboot\r\n>>> "), Some(">>> "));
        assert_eq!(echo_after_prompt("no prompt here"), None);
    }

    #[test]
    fn test_escape_control() {
        assert_eq!(escape_control("a\x03\x01\nb\x04"), "a\\x03\\x01\\nb\\x04");
    }

    #[test]
    fn test_decoder_joins_split_code_point() {
        let mut decoder = Utf8Decoder::new();
        let bytes = "é>".as_bytes();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..]), "é>");
    }

    #[test]
    fn test_mode_raw_flag() {
        assert!(!ReplMode::Normal.is_raw());
        assert!(ReplMode::EnteringRaw.is_raw());
        assert!(ReplMode::RawActive.is_raw());
        assert!(ReplMode::ExitingRaw.is_raw());
    }
}
