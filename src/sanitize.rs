//! Terminal control sequence stripping.
//!
//! [`sanitize`] turns raw console bytes into plain text suitable for logs and
//! pattern matching. It removes ANSI escape sequences (CSI, OSC, DCS and the
//! other string controls, two-byte escapes, charset designations) and every
//! C0 control byte except `\n`, `\r` and `\t`.
//!
//! The output never contains `ESC` or a stripped control byte, so running it
//! through [`sanitize`] a second time returns it unchanged.

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const DEL: u8 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    /// `ESC` followed by intermediate bytes (`ESC ( B`, `ESC # 8`, ...).
    EscapeIntermediate,
    Csi,
    /// OSC, DCS, SOS, PM and APC bodies, terminated by BEL or `ESC \`.
    String,
    /// Saw `ESC` inside a string body; `\` completes the terminator.
    StringEscape,
}

/// Strip control and escape sequences from `raw`, keeping line structure.
///
/// Invalid UTF-8 is replaced with U+FFFD.
pub fn sanitize(raw: &[u8]) -> String {
    let mut sanitizer = Sanitizer::new();
    sanitizer.feed(raw);
    sanitizer.finish()
}

/// Incremental form of [`sanitize`] for output that arrives in chunks.
///
/// Escape state and incomplete UTF-8 sequences carry over between
/// [`feed`](Self::feed) calls, so feeding a stream in any split yields the
/// same text as sanitizing it in one piece.
#[derive(Debug)]
pub struct Sanitizer {
    state: State,
    /// Kept bytes not yet decoded (an incomplete trailing UTF-8 sequence).
    pending: Vec<u8>,
    text: String,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Sanitizer {
            state: State::Ground,
            pending: Vec::new(),
            text: String::new(),
        }
    }

    /// Sanitize the next chunk and append it to [`text`](Self::text).
    pub fn feed(&mut self, raw: &[u8]) {
        for &byte in raw {
            // Line breaks always survive and abort any half-parsed sequence.
            if byte == b'\n' || byte == b'\r' {
                self.pending.push(byte);
                self.state = State::Ground;
                continue;
            }
            self.state = step(self.state, byte, &mut self.pending);
        }
        self.decode();
    }

    /// Text decoded so far. An incomplete trailing character is held back
    /// until the next chunk completes it.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Flush what is held back and return the full text.
    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            self.text.push_str(&String::from_utf8_lossy(&self.pending));
        }
        self.text
    }

    fn decode(&mut self) {
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = consumed + err.valid_up_to();
                    // Checked by from_utf8 above.
                    if let Ok(valid) = std::str::from_utf8(&self.pending[consumed..valid_up_to]) {
                        self.text.push_str(valid);
                    }
                    match err.error_len() {
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_up_to + len;
                        }
                        None => {
                            consumed = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }
}

fn step(state: State, byte: u8, out: &mut Vec<u8>) -> State {
    match state {
        State::Ground => ground(byte, out),
        State::Escape => match byte {
            b'[' => State::Csi,
            b']' | b'P' | b'X' | b'^' | b'_' => State::String,
            ESC => State::Escape,
            0x20..=0x2f => State::EscapeIntermediate,
            0x30..=0x7e => State::Ground,
            _ => ground(byte, out),
        },
        State::EscapeIntermediate => match byte {
            0x20..=0x2f => State::EscapeIntermediate,
            0x30..=0x7e => State::Ground,
            ESC => State::Escape,
            _ => ground(byte, out),
        },
        State::Csi => match byte {
            0x20..=0x3f => State::Csi,
            0x40..=0x7e => State::Ground,
            ESC => State::Escape,
            _ => ground(byte, out),
        },
        State::String => match byte {
            BEL => State::Ground,
            ESC => State::StringEscape,
            _ => State::String,
        },
        State::StringEscape => match byte {
            b'\\' => State::Ground,
            ESC => State::StringEscape,
            _ => State::String,
        },
    }
}

fn ground(byte: u8, out: &mut Vec<u8>) -> State {
    match byte {
        ESC => State::Escape,
        b'\t' => {
            out.push(byte);
            State::Ground
        }
        0x00..=0x1f | DEL => State::Ground,
        _ => {
            out.push(byte);
            State::Ground
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&[u8]] = &[
        b"",
        b"plain text\r\n",
        b"\x1b[32mtrustos\x1b[0m:/$ ",
        b"\x1b[1;31;40mred\x1b[m\n",
        b"\x1b]0;window title\x07after",
        b"\x1b]7;file:///tmp\x1b\\after",
        b"\x1bPq#0;2;0;0;0\x1b\\dcs",
        b"\x1b(Bcharset\x1b#8",
        b"bell\x07 backspace\x08 nul\x00 del\x7f",
        b"\x1b[",
        b"\x1b",
        b"\x1b\x1b[31mdouble",
        b"\x1b]unterminated osc\nnext line",
        b"\x1b[12\r\nbroken csi",
        b"caf\xc3\xa9 \xff\xfe invalid",
        b"tab\there\r\n\x1b[?25l\x1b[2J\x1b[H",
    ];

    #[test]
    fn test_strips_sgr_sequences() {
        assert_eq!(sanitize(b"\x1b[32mtrustos\x1b[0m:/$ "), "trustos:/$ ");
        assert_eq!(sanitize(b"\x1b[1;31;40mred\x1b[m\n"), "red\n");
    }

    #[test]
    fn test_strips_osc_with_either_terminator() {
        assert_eq!(sanitize(b"\x1b]0;window title\x07after"), "after");
        assert_eq!(sanitize(b"\x1b]7;file:///tmp\x1b\\after"), "after");
    }

    #[test]
    fn test_strips_charset_and_two_byte_escapes() {
        assert_eq!(sanitize(b"\x1b(Bcharset\x1b#8"), "charset");
        assert_eq!(sanitize(b"a\x1b7b\x1b8c"), "abc");
    }

    #[test]
    fn test_drops_control_bytes_but_keeps_tab() {
        assert_eq!(
            sanitize(b"bell\x07 backspace\x08 nul\x00 del\x7f"),
            "bell backspace nul del"
        );
        assert_eq!(sanitize(b"a\tb"), "a\tb");
    }

    #[test]
    fn test_line_breaks_survive_broken_sequences() {
        assert_eq!(
            sanitize(b"\x1b]unterminated osc\nnext line"),
            "\nnext line"
        );
        assert_eq!(sanitize(b"\x1b[12\r\nbroken csi"), "\r\nbroken csi");
    }

    #[test]
    fn test_truncated_escape_at_end() {
        assert_eq!(sanitize(b"prompt$ \x1b["), "prompt$ ");
        assert_eq!(sanitize(b"prompt$ \x1b"), "prompt$ ");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let text = sanitize(b"caf\xc3\xa9 \xff");
        assert!(text.starts_with("café "));
        assert!(text.ends_with('\u{fffd}'));
    }

    #[test]
    fn test_chunked_feed_matches_whole() {
        let stream: Vec<u8> = SAMPLES.concat();
        let whole = sanitize(&stream);
        for chunk_size in [1, 2, 3, 7, 64] {
            let mut sanitizer = Sanitizer::new();
            for chunk in stream.chunks(chunk_size) {
                sanitizer.feed(chunk);
                assert!(whole.starts_with(sanitizer.text()), "chunk size {chunk_size}");
            }
            assert_eq!(sanitizer.finish(), whole, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_split_character_is_held_back() {
        let mut sanitizer = Sanitizer::new();
        sanitizer.feed(b"caf\xc3");
        assert_eq!(sanitizer.text(), "caf");
        sanitizer.feed(b"\xa9\x1b[3");
        assert_eq!(sanitizer.text(), "caf\u{e9}");
        sanitizer.feed(b"1mred");
        assert_eq!(sanitizer.text(), "caf\u{e9}red");
    }

    #[test]
    fn test_idempotent() {
        for sample in SAMPLES {
            let once = sanitize(sample);
            assert_eq!(sanitize(once.as_bytes()), once, "input: {sample:?}");
        }
    }

    #[test]
    fn test_preserves_every_line_break() {
        for sample in SAMPLES {
            let count = |bytes: &[u8], b: u8| bytes.iter().filter(|&&x| x == b).count();
            let text = sanitize(sample);
            assert_eq!(count(sample, b'\n'), count(text.as_bytes(), b'\n'));
            assert_eq!(count(sample, b'\r'), count(text.as_bytes(), b'\r'));
        }
    }
}
