//! Assembling received chunks into lines for observers.
//!
//! A transport chunk may contain many lines, half a line, or the middle of
//! one. The assembler keeps the incomplete tail between chunks and hands
//! out sanitized lines, flagging whether the line was newline-terminated.

use super::terminal::sanitize_line;

/// A line produced by the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledLine {
    /// Sanitized line content without newline characters.
    pub text: String,
    /// True when the line was terminated by `\n`, `\r` or `\r\n`; false
    /// for the trailing fragment of a chunk — prompts arrive that way.
    pub is_full: bool,
}

/// Buffers partial data and splits chunks into lines.
///
/// Every complete line is delivered with its terminator stripped. The
/// trailing fragment without a terminator is delivered as a partial line
/// and kept as the tail for the next chunk.
#[derive(Debug, Default)]
pub struct LineAssembler {
    tail: Option<String>,
    paused: bool,
    /// A chunk ended in '\r'; swallow a leading '\n' of the next chunk.
    pending_cr: bool,
}

impl LineAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a decoded chunk and returns the lines it completes, each
    /// sanitized. While paused the chunk is discarded entirely.
    pub fn assemble(&mut self, chunk: &str) -> Vec<AssembledLine> {
        if self.paused {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut line = self.tail.take().unwrap_or_default();
        let mut chars = chunk.chars().peekable();

        if self.pending_cr {
            self.pending_cr = false;
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
        }

        while let Some(c) = chars.next() {
            match c {
                '\n' => {
                    out.push(AssembledLine {
                        text: sanitize_line(&line),
                        is_full: true,
                    });
                    line.clear();
                }
                '\r' => {
                    // Swallow the '\n' of a CRLF pair, even across chunks.
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    } else if chars.peek().is_none() {
                        self.pending_cr = true;
                    }
                    out.push(AssembledLine {
                        text: sanitize_line(&line),
                        is_full: true,
                    });
                    line.clear();
                }
                other => line.push(other),
            }
        }

        if !line.is_empty() {
            out.push(AssembledLine {
                text: sanitize_line(&line),
                is_full: false,
            });
            self.tail = Some(line);
        }

        out
    }

    /// Stops processing; buffered and future data is discarded.
    pub fn pause(&mut self) {
        self.paused = true;
        self.tail = None;
        self.pending_cr = false;
    }

    /// Resumes processing from the next chunk.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Returns true while the assembler is paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Drops the buffered fragment.
    ///
    /// Called after a match consumed the fragment so the same text is not
    /// parsed again once the rest of the line arrives.
    pub fn consume_tail(&mut self) {
        self.tail = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(assembler: &mut LineAssembler, chunk: &str) -> Vec<(String, bool)> {
        assembler
            .assemble(chunk)
            .into_iter()
            .map(|l| (l.text, l.is_full))
            .collect()
    }

    #[test]
    fn test_single_full_line() {
        let mut asm = LineAssembler::new();
        assert_eq!(
            collect(&mut asm, "hello\n"),
            vec![("hello".to_string(), true)]
        );
    }

    #[test]
    fn test_partial_line_then_completion() {
        let mut asm = LineAssembler::new();
        assert_eq!(collect(&mut asm, "par"), vec![("par".to_string(), false)]);
        assert_eq!(
            collect(&mut asm, "tial\nrest"),
            vec![("partial".to_string(), true), ("rest".to_string(), false)]
        );
    }

    #[test]
    fn test_crlf_is_one_terminator() {
        let mut asm = LineAssembler::new();
        assert_eq!(
            collect(&mut asm, "one\r\ntwo\r\n"),
            vec![("one".to_string(), true), ("two".to_string(), true)]
        );
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut asm = LineAssembler::new();
        assert_eq!(collect(&mut asm, "one\r"), vec![("one".to_string(), true)]);
        assert_eq!(
            collect(&mut asm, "\ntwo\n"),
            vec![("two".to_string(), true)]
        );
    }

    #[test]
    fn test_pause_discards_data_and_tail() {
        let mut asm = LineAssembler::new();
        let _ = collect(&mut asm, "stale-fragment");
        asm.pause();
        assert!(collect(&mut asm, "ignored\n").is_empty());
        asm.resume();
        assert_eq!(
            collect(&mut asm, "fresh\n"),
            vec![("fresh".to_string(), true)]
        );
    }

    #[test]
    fn test_consumed_tail_not_reparsed() {
        let mut asm = LineAssembler::new();
        let _ = collect(&mut asm, "prompt# ");
        asm.consume_tail();
        assert_eq!(
            collect(&mut asm, "\nnext\n"),
            vec![(String::new(), true), ("next".to_string(), true)]
        );
    }

    #[test]
    fn test_sanitizes_before_delivery() {
        let mut asm = LineAssembler::new();
        assert_eq!(
            collect(&mut asm, "\u{1b}[31mred\u{1b}[0m\n"),
            vec![("red".to_string(), true)]
        );
    }

    #[test]
    fn test_many_lines_in_one_chunk() {
        let mut asm = LineAssembler::new();
        let lines = collect(&mut asm, "a\nb\nc\nprompt# ");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], ("prompt# ".to_string(), false));
    }
}
