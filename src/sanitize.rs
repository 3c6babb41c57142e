//! Removal of terminal control sequences from captured lines.
//!
//! The terminal emulator decorates what it relays from the serial port with
//! escape sequences (colors, cursor moves, status line updates). They are
//! stripped before a line is written to the transcript or parsed.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

static ESCAPE_SEQUENCE: OnceLock<Regex> = OnceLock::new();

/// Strips every escape sequence from `line`: `ESC` followed either by a
/// single byte in `@`..`_`, or by a bracketed (CSI) parameter sequence ending
/// with a byte in `@`..`~`.
///
/// Lines without escape sequences are returned borrowed and unchanged.
pub fn sanitize_line(line: &str) -> Cow<'_, str> {
    if !line.contains('\x1b') {
        return Cow::Borrowed(line);
    }
    ESCAPE_SEQUENCE
        .get_or_init(|| {
            Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("Invalid escape Regex")
        })
        .replace_all(line, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_unchanged() {
        for line in [
            "",
            "e3",
            "POST code: 0x5A",
            "  [  12.345] PCI: bus 00 \\ [ok]",
            "ünïcödé ~ @ _ [ ]",
        ] {
            assert_eq!(sanitize_line(line), line);
        }
    }

    #[test]
    fn strips_csi_sequences() {
        assert_eq!(sanitize_line("\x1b[0;32mA1\x1b[0m"), "A1");
        assert_eq!(sanitize_line("\x1b[2J\x1b[1;1Hready"), "ready");
        assert_eq!(sanitize_line("\x1b[?25lhidden\x1b[?25h"), "hidden");
    }

    #[test]
    fn strips_two_byte_sequences() {
        assert_eq!(sanitize_line("\x1bMup"), "up");
        assert_eq!(sanitize_line("a\x1bDb"), "ab");
        assert_eq!(sanitize_line("\x1b\\done\x1b_"), "done");
    }

    #[test]
    fn unknown_sequences_are_kept() {
        assert_eq!(sanitize_line("end\x1b"), "end\x1b");
        assert_eq!(sanitize_line("\x1b7saved"), "\x1b7saved");
    }
}
