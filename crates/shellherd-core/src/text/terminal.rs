//! Terminal escape-sequence sanitizer.
//!
//! Observers must see the printable content of a line the way a user would
//! see it after the terminal finished redrawing, not the raw VT byte salad.
//! A single `vte`-driven pass recognizes CSI / OSC / SGR / ESC sequences
//! and replays the cursor-affecting ones against a one-line cell buffer:
//!
//! - SGR colors/attributes and cursor-visibility modes are dropped,
//! - OSC window-title sequences are dropped,
//! - cursor-home followed by erase discards the overwritten prefix,
//! - cursor-forward and erase-character produce the spaces a terminal
//!   would show,
//! - backspace moves the cursor left so later output overwrites.

use vte::{Params, Parser, Perform};

/// Removes terminal control sequences from a single line of output.
///
/// The input is expected to be one line (no `\n`/`\r`); the line assembler
/// strips newline characters before sanitizing.
#[must_use]
pub fn sanitize_line(line: &str) -> String {
    if !line.contains('\u{1b}') && !line.contains('\u{8}') {
        return line.to_string();
    }
    let mut redraw = Redraw::default();
    let mut parser = Parser::new();
    parser.advance(&mut redraw, line.as_bytes());
    redraw.into_line()
}

/// One-line cell buffer replaying cursor movement.
#[derive(Default)]
struct Redraw {
    cells: Vec<char>,
    cursor: usize,
}

impl Redraw {
    fn put(&mut self, c: char) {
        if self.cursor < self.cells.len() {
            self.cells[self.cursor] = c;
        } else {
            while self.cells.len() < self.cursor {
                self.cells.push(' ');
            }
            self.cells.push(c);
        }
        self.cursor += 1;
    }

    fn into_line(self) -> String {
        self.cells.into_iter().collect()
    }
}

fn first_param(params: &Params, default: usize) -> usize {
    params
        .iter()
        .next()
        .and_then(|p| p.first())
        .map_or(default, |&v| v as usize)
}

impl Perform for Redraw {
    fn print(&mut self, c: char) {
        self.put(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            // Backspace: later output overwrites.
            0x08 => self.cursor = self.cursor.saturating_sub(1),
            // Tab is printable content as far as parsers are concerned.
            0x09 => self.put('\t'),
            // BEL and other C0 controls carry no visible content.
            _ => {}
        }
    }

    fn csi_dispatch(
        &mut self,
        params: &Params,
        _intermediates: &[u8],
        _ignore: bool,
        action: char,
    ) {
        match action {
            // Cursor home / position: redraw starts from the left margin.
            'H' | 'f' => self.cursor = 0,
            // Erase in display / erase in line: drop from the cursor on.
            'J' | 'K' => self.cells.truncate(self.cursor),
            // Cursor forward: the skipped cells show as spaces.
            'C' => {
                let n = first_param(params, 1).max(1);
                for _ in 0..n {
                    if self.cursor < self.cells.len() {
                        self.cursor += 1;
                    } else {
                        self.put(' ');
                    }
                }
            }
            // Erase characters: overwritten with spaces, cursor stays.
            'X' => {
                let n = first_param(params, 1).max(1);
                let from = self.cursor;
                for i in 0..n {
                    if from + i < self.cells.len() {
                        self.cells[from + i] = ' ';
                    }
                }
            }
            // SGR, cursor visibility and every other mode switch: no
            // visible content.
            _ => {}
        }
    }

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}
