//! VT sequence parser
//!
//! Interprets text from the remote shell and applies it to the terminal
//! state. Malformed input never fails: every input unit resolves to an
//! [`Outcome`], and anything not understood is reported as [`Ignored`].

use tracing::{debug, trace};

use super::state::{ColorId, TerminalState};

/// Longest CSI parameter text kept before the sequence is dropped
pub const MAX_CSI_LEN: usize = 64;

/// Transient parse state carried between input units
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PendingToken {
    #[default]
    Ground,
    EscapeSeen,
    /// Parameter text accumulated after `ESC [`
    CollectingCsi(String),
}

/// CSI commands the interpreter acts on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsiCommand {
    CursorUp,
    CursorDown,
    CursorForward,
    CursorBackward,
    CursorPosition,
    EraseInDisplay,
    EraseInLine,
    DeleteChars,
    EraseChars,
    InsertChars,
    SelectGraphicRendition,
}

impl CsiCommand {
    pub fn from_final(ch: char) -> Option<Self> {
        let command = match ch {
            'A' => Self::CursorUp,
            'B' => Self::CursorDown,
            'C' => Self::CursorForward,
            'D' => Self::CursorBackward,
            'H' | 'f' => Self::CursorPosition,
            'J' => Self::EraseInDisplay,
            'K' => Self::EraseInLine,
            'P' => Self::DeleteChars,
            'X' => Self::EraseChars,
            '@' => Self::InsertChars,
            'm' => Self::SelectGraphicRendition,
            _ => return None,
        };
        Some(command)
    }

    /// Value used when the first parameter is absent or not numeric
    pub fn default_param(self) -> usize {
        match self {
            Self::EraseInDisplay | Self::EraseInLine => 0,
            _ => 1,
        }
    }
}

/// Why an input unit or sequence was discarded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ignored {
    /// `ESC` followed by something other than `[`
    UnknownEscape(char),
    /// CSI terminated by a letter outside the dispatch table
    UnknownFinal(char),
    /// CSI carrying the `?` private-mode marker
    PrivateMode(char),
    /// CSI parameter text exceeded [`MAX_CSI_LEN`]
    Overlong,
    /// Sequence still pending when the write ended
    Truncated,
}

/// What happened to one input unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A glyph was written
    Printed,
    /// A C0 control was executed (or deliberately ignored)
    Control,
    /// Part of an escape sequence; nothing applied yet
    Pending,
    /// A CSI command was applied; `defaulted` is set when a parameter
    /// was absent or not numeric
    Dispatched { command: CsiCommand, defaulted: bool },
    Ignored(Ignored),
}

/// Per-write tally, used for logging
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub printed: usize,
    pub dispatched: usize,
    pub defaulted: usize,
    pub ignored: usize,
}

impl WriteSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Printed => self.printed += 1,
            Outcome::Dispatched { defaulted, .. } => {
                self.dispatched += 1;
                if defaulted {
                    self.defaulted += 1;
                }
            }
            Outcome::Ignored(_) => self.ignored += 1,
            Outcome::Control | Outcome::Pending => {}
        }
    }
}

/// Semicolon-separated CSI parameters. `None` marks an absent or
/// non-numeric field.
#[derive(Debug)]
struct CsiParams {
    fields: Vec<Option<usize>>,
}

impl CsiParams {
    fn parse(text: &str) -> Self {
        Self {
            fields: text.split(';').map(Self::parse_field).collect(),
        }
    }

    fn parse_field(field: &str) -> Option<usize> {
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(field.bytes().fold(0usize, |acc, b| {
            acc.saturating_mul(10).saturating_add(usize::from(b - b'0'))
        }))
    }

    /// Field value and whether it had to be defaulted
    fn get(&self, idx: usize, default: usize) -> (usize, bool) {
        match self.fields.get(idx).copied().flatten() {
            Some(value) => (value, false),
            None => (default, true),
        }
    }

    /// Repeat count from the first field; zero counts as one
    fn count(&self) -> (usize, bool) {
        let (n, defaulted) = self.get(0, 1);
        (n.max(1), defaulted)
    }
}

/// Parser state machine
#[derive(Debug, Default)]
pub struct VtParser {
    pending: PendingToken,
    overlong: bool,
}

impl VtParser {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn pending(&self) -> &PendingToken {
        &self.pending
    }

    /// Process one top-level write. A sequence still pending at the end
    /// is discarded so no parse state outlives the write.
    pub fn write(&mut self, text: &str, state: &mut TerminalState) -> WriteSummary {
        let mut summary = WriteSummary::default();
        for ch in text.chars() {
            summary.record(self.advance(ch, state));
        }
        if let Some(outcome) = self.finish() {
            summary.record(outcome);
        }
        trace!(?summary, "write applied");
        summary
    }

    /// Drop any pending sequence and return to ground
    fn finish(&mut self) -> Option<Outcome> {
        if self.pending == PendingToken::Ground {
            return None;
        }
        debug!(pending = ?self.pending, "discarding unterminated sequence");
        self.pending = PendingToken::Ground;
        self.overlong = false;
        Some(Outcome::Ignored(Ignored::Truncated))
    }

    /// Feed a single character to the parser
    pub fn advance(&mut self, ch: char, state: &mut TerminalState) -> Outcome {
        // ESC restarts any pending sequence
        if ch == '\x1b' {
            self.pending = PendingToken::EscapeSeen;
            self.overlong = false;
            return Outcome::Pending;
        }
        // Other C0 controls act in place; after a bare ESC they also end it
        if ch < ' ' {
            if self.pending == PendingToken::EscapeSeen {
                debug!("Escape interrupted by control {:?}", ch);
                self.pending = PendingToken::Ground;
            }
            Self::execute_control(ch, state);
            return Outcome::Control;
        }

        match std::mem::take(&mut self.pending) {
            PendingToken::Ground => Self::ground(ch, state),
            PendingToken::EscapeSeen => self.escape(ch),
            PendingToken::CollectingCsi(text) => self.csi(ch, text, state),
        }
    }

    fn execute_control(ch: char, state: &mut TerminalState) {
        match ch {
            '\x08' => state.backspace(),
            '\t' => state.horizontal_tab(),
            '\n' | '\x0b' | '\x0c' => state.linefeed(),
            '\r' => state.carriage_return(),
            // BEL and the rest are no-ops
            _ => {}
        }
    }

    fn ground(ch: char, state: &mut TerminalState) -> Outcome {
        // DEL and C1 controls have no glyph
        if ch == '\x7f' || ('\u{80}'..='\u{9f}').contains(&ch) {
            return Outcome::Control;
        }
        state.put_char(ch);
        Outcome::Printed
    }

    fn escape(&mut self, ch: char) -> Outcome {
        if ch == '[' {
            self.pending = PendingToken::CollectingCsi(String::new());
            return Outcome::Pending;
        }
        debug!("Unknown escape: ESC {:?}", ch);
        Outcome::Ignored(Ignored::UnknownEscape(ch))
    }

    fn csi(&mut self, ch: char, mut text: String, state: &mut TerminalState) -> Outcome {
        if ('\x40'..='\x7e').contains(&ch) {
            let overlong = std::mem::take(&mut self.overlong);
            if overlong {
                debug!("Dropping overlong CSI terminated by {:?}", ch);
                return Outcome::Ignored(Ignored::Overlong);
            }
            return Self::dispatch(ch, &text, state);
        }

        if text.len() >= MAX_CSI_LEN {
            self.overlong = true;
        } else {
            text.push(ch);
        }
        self.pending = PendingToken::CollectingCsi(text);
        Outcome::Pending
    }

    fn dispatch(final_char: char, text: &str, state: &mut TerminalState) -> Outcome {
        if text.starts_with('?') {
            trace!("Private mode CSI ?{}{}", &text[1..], final_char);
            return Outcome::Ignored(Ignored::PrivateMode(final_char));
        }

        let Some(command) = CsiCommand::from_final(final_char) else {
            debug!("Unknown CSI: params={:?}, final={:?}", text, final_char);
            return Outcome::Ignored(Ignored::UnknownFinal(final_char));
        };

        let params = CsiParams::parse(text);
        let defaulted = Self::execute_csi(command, &params, state);
        Outcome::Dispatched { command, defaulted }
    }

    /// Apply a recognized command, returning whether a parameter defaulted
    fn execute_csi(command: CsiCommand, params: &CsiParams, state: &mut TerminalState) -> bool {
        match command {
            CsiCommand::CursorUp => {
                let (n, defaulted) = params.count();
                state.cursor_up(n);
                defaulted
            }
            CsiCommand::CursorDown => {
                let (n, defaulted) = params.count();
                state.cursor_down(n);
                defaulted
            }
            CsiCommand::CursorForward => {
                let (n, defaulted) = params.count();
                state.cursor_forward(n);
                defaulted
            }
            CsiCommand::CursorBackward => {
                let (n, defaulted) = params.count();
                state.cursor_backward(n);
                defaulted
            }
            CsiCommand::CursorPosition => {
                let (row, row_defaulted) = params.get(0, 1);
                let (col, col_defaulted) = params.get(1, 1);
                state.cursor_position(row, col);
                row_defaulted || col_defaulted
            }
            CsiCommand::EraseInDisplay => {
                let (mode, defaulted) = params.get(0, command.default_param());
                state.erase_in_display(mode);
                defaulted
            }
            CsiCommand::EraseInLine => {
                let (mode, defaulted) = params.get(0, command.default_param());
                state.erase_in_line(mode);
                defaulted
            }
            CsiCommand::DeleteChars => {
                let (n, defaulted) = params.count();
                state.delete_chars(n);
                defaulted
            }
            CsiCommand::EraseChars => {
                let (n, defaulted) = params.count();
                state.erase_chars(n);
                defaulted
            }
            CsiCommand::InsertChars => {
                let (n, defaulted) = params.count();
                state.insert_chars(n);
                defaulted
            }
            CsiCommand::SelectGraphicRendition => Self::execute_sgr(params, state),
        }
    }

    fn execute_sgr(params: &CsiParams, state: &mut TerminalState) -> bool {
        let default = CsiCommand::SelectGraphicRendition.default_param();
        let defaulted = params.fields.iter().any(Option::is_none);
        let mut iter = params.fields.iter().map(|f| f.unwrap_or(default));

        while let Some(code) = iter.next() {
            match code {
                0 => state.pen.reset(),
                1 => state.pen.bold = true,
                22 => state.pen.bold = false,

                30..=37 => state.pen.fg = Some(Self::color(code - 30)),
                90..=97 => state.pen.fg = Some(Self::color(code - 90 + 8)),
                39 => state.pen.fg = None,

                40..=47 => state.pen.bg = Some(Self::color(code - 40)),
                100..=107 => state.pen.bg = Some(Self::color(code - 100 + 8)),
                49 => state.pen.bg = None,

                // Extended colors: only the 256-color form fits a color id
                38 | 48 => match iter.next() {
                    Some(5) => {
                        let id = iter.next().and_then(|n| u8::try_from(n).ok());
                        if let Some(id) = id {
                            if code == 38 {
                                state.pen.fg = Some(ColorId(id));
                            } else {
                                state.pen.bg = Some(ColorId(id));
                            }
                        }
                    }
                    Some(2) => {
                        // Truecolor components are consumed and dropped
                        iter.by_ref().take(3).for_each(drop);
                    }
                    _ => {}
                },

                _ => {}
            }
        }
        defaulted
    }

    fn color(index: usize) -> ColorId {
        // Callers pass 0..=15
        ColorId(index as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::state::{CursorPosition, Line, Pen};

    fn run(input: &str) -> TerminalState {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        parser.write(input, &mut state);
        state
    }

    fn snapshot(state: &TerminalState) -> (Vec<Line>, CursorPosition, Pen) {
        (state.screen.lines().to_vec(), state.cursor(), state.pen)
    }

    /// Three rows with the cursor in the middle of the second
    const FIXTURE: &str = "abcdef\r\nghijkl\r\nmnopqr\x1b[2;4H";

    #[test]
    fn test_cursor_movement() {
        let state = run(FIXTURE);
        assert_eq!(state.cursor(), CursorPosition::new(2, 3));
    }

    #[test]
    fn test_absent_parameter_matches_one() {
        for letter in ['A', 'B', 'C', 'D', 'H', 'f', 'P', 'X', '@', 'm'] {
            let absent = run(&format!("{FIXTURE}\x1b[{letter}Z"));
            let one = run(&format!("{FIXTURE}\x1b[1{letter}Z"));
            assert_eq!(snapshot(&absent), snapshot(&one), "CSI {letter}");
        }
    }

    #[test]
    fn test_absent_parameter_matches_zero_for_erase() {
        for letter in ['J', 'K'] {
            let absent = run(&format!("{FIXTURE}\x1b[{letter}"));
            let zero = run(&format!("{FIXTURE}\x1b[0{letter}"));
            assert_eq!(snapshot(&absent), snapshot(&zero), "CSI {letter}");
        }
    }

    #[test]
    fn test_erase_to_end_after_cursor_left() {
        let state = run("ABC\x1b[2D\x1b[K");
        assert_eq!(state.line_text(1).as_deref(), Some("A"));
        assert_eq!(state.cursor().col, 1);
    }

    #[test]
    fn test_overwrite_in_place() {
        let state = run("ABC\x1b[2DX");
        assert_eq!(state.line_text(1).as_deref(), Some("AXC"));
        assert_eq!(state.cursor().col, 2);
    }

    #[test]
    fn test_clear_all_is_idempotent() {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        parser.write("one\r\ntwo\r\nthree", &mut state);

        for _ in 0..2 {
            parser.write("\x1b[2J", &mut state);
            assert_eq!(state.line_count(), 1);
            assert_eq!(state.line_text(1).as_deref(), Some(""));
            assert_eq!(state.cursor(), CursorPosition::new(1, 0));
        }
    }

    #[test]
    fn test_other_clear_forms_are_noops() {
        let before = run("one\r\ntwo");
        for form in ["\x1b[J", "\x1b[0J", "\x1b[1J", "\x1b[3J"] {
            let after = run(&format!("one\r\ntwo{form}"));
            assert_eq!(snapshot(&before), snapshot(&after), "{form:?}");
        }
    }

    #[test]
    fn test_sgr_colors_replace() {
        let state = run("\x1b[31m\x1b[32mX");
        let pen = state.glyph(1, 0).unwrap().pen;
        assert_eq!(pen.fg, Some(ColorId(2)));
        assert_eq!(pen.bg, None);
    }

    #[test]
    fn test_sgr_parameter_list() {
        let state = run("\x1b[1;93;44mX\x1b[0mY\x1b[101;35mZ");
        assert_eq!(
            state.glyph(1, 0).unwrap().pen,
            Pen {
                bold: true,
                fg: Some(ColorId(11)),
                bg: Some(ColorId(4)),
            }
        );
        assert_eq!(state.glyph(1, 1).unwrap().pen, Pen::default());
        assert_eq!(
            state.glyph(1, 2).unwrap().pen,
            Pen {
                bold: false,
                fg: Some(ColorId(5)),
                bg: Some(ColorId(9)),
            }
        );
    }

    #[test]
    fn test_sgr_extended_and_defaults() {
        let state = run("\x1b[38;5;200;48;2;1;2;3mA\x1b[39;1mB\x1b[22mC");
        assert_eq!(state.glyph(1, 0).unwrap().pen.fg, Some(ColorId(200)));
        assert_eq!(state.glyph(1, 0).unwrap().pen.bg, None);
        assert_eq!(state.glyph(1, 1).unwrap().pen.fg, None);
        assert!(state.glyph(1, 1).unwrap().pen.bold);
        assert!(!state.glyph(1, 2).unwrap().pen.bold);
    }

    #[test]
    fn test_linefeed_row_counts() {
        let mut state = run("a\r\nb\r\nc");
        let mut parser = VtParser::new();
        assert_eq!(state.line_count(), 3);

        parser.write("\x1b[2A\n", &mut state);
        assert_eq!(state.line_count(), 3);
        assert_eq!(state.cursor().row, 2);

        parser.write("\n\n", &mut state);
        assert_eq!(state.line_count(), 4);
        assert_eq!(state.cursor().row, 4);
    }

    #[test]
    fn test_character_editing() {
        assert_eq!(run("abcdef\x1b[4D\x1b[2P").line_text(1).as_deref(), Some("abef"));
        assert_eq!(run("abcdef\x1b[4D\x1b[2X").line_text(1).as_deref(), Some("ab  ef"));
        let state = run("abcdef\x1b[4D\x1b[2@");
        assert_eq!(state.line_text(1).as_deref(), Some("ab  cdef"));
        assert_eq!(state.cursor().col, 2);
    }

    #[test]
    fn test_controls() {
        let state = run("abc\x08\x08\x07Z\rY");
        assert_eq!(state.line_text(1).as_deref(), Some("YZc"));
        assert_eq!(state.cursor().col, 1);
    }

    #[test]
    fn test_unknown_escape_returns_to_ground() {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        assert_eq!(parser.advance('\x1b', &mut state), Outcome::Pending);
        assert_eq!(
            parser.advance(']', &mut state),
            Outcome::Ignored(Ignored::UnknownEscape(']'))
        );
        assert_eq!(parser.pending(), &PendingToken::Ground);
        assert_eq!(parser.advance('x', &mut state), Outcome::Printed);
    }

    #[test]
    fn test_unknown_final_is_discarded() {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        parser.write("ab", &mut state);
        let before = snapshot(&state);

        for ch in "\x1b[12;3".chars() {
            assert_eq!(parser.advance(ch, &mut state), Outcome::Pending);
        }
        assert_eq!(
            parser.advance('r', &mut state),
            Outcome::Ignored(Ignored::UnknownFinal('r'))
        );
        assert_eq!(parser.pending(), &PendingToken::Ground);
        assert_eq!(snapshot(&state), before);
    }

    #[test]
    fn test_private_mode_is_noop() {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        parser.write("abc", &mut state);
        let before = snapshot(&state);

        let mut last = Outcome::Pending;
        for ch in "\x1b[?25l".chars() {
            last = parser.advance(ch, &mut state);
        }
        assert_eq!(last, Outcome::Ignored(Ignored::PrivateMode('l')));
        parser.write("\x1b[?2J\x1b[?1049h", &mut state);
        assert_eq!(snapshot(&state), before);
    }

    #[test]
    fn test_non_numeric_parameter_defaults() {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        parser.write("abcdef", &mut state);

        let mut last = Outcome::Pending;
        for ch in "\x1b[:2D".chars() {
            last = parser.advance(ch, &mut state);
        }
        assert_eq!(
            last,
            Outcome::Dispatched {
                command: CsiCommand::CursorBackward,
                defaulted: true,
            }
        );
        assert_eq!(state.cursor().col, 5);
    }

    #[test]
    fn test_huge_parameter_saturates() {
        let state = run("abc\x1b[99999999999999999999999999D");
        assert_eq!(state.cursor().col, 0);
        let state = run("abc\r\x1b[99999999999999999999999999C");
        assert_eq!(state.cursor().col, 3);
    }

    #[test]
    fn test_overlong_sequence_is_dropped() {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        let long = format!("\x1b[{}C", "1".repeat(MAX_CSI_LEN * 2));
        let summary = parser.write(&format!("ab\r{long}z"), &mut state);
        assert_eq!(summary.ignored, 1);
        assert_eq!(state.line_text(1).as_deref(), Some("zb"));
    }

    #[test]
    fn test_pending_token_never_outlives_write() {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        let summary = parser.write("ab\x1b[3", &mut state);
        assert_eq!(summary.ignored, 1);
        assert_eq!(parser.pending(), &PendingToken::Ground);

        parser.write("D", &mut state);
        assert_eq!(state.line_text(1).as_deref(), Some("abD"));
    }

    #[test]
    fn test_control_after_escape_returns_to_ground() {
        let state = run("\x1b\rA");
        assert_eq!(state.line_text(1).as_deref(), Some("A"));

        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        parser.write("xyz", &mut state);
        assert_eq!(parser.advance('\x1b', &mut state), Outcome::Pending);
        assert_eq!(parser.advance('\x08', &mut state), Outcome::Control);
        assert_eq!(parser.pending(), &PendingToken::Ground);
        assert_eq!(parser.advance('Q', &mut state), Outcome::Printed);
        assert_eq!(state.line_text(1).as_deref(), Some("xyQ"));
    }

    #[test]
    fn test_control_inside_csi_executes() {
        let state = run("abc\x1b[1\x08D");
        assert_eq!(state.cursor().col, 1);
    }

    #[test]
    fn test_write_summary_counts() {
        let mut state = TerminalState::new();
        let mut parser = VtParser::new();
        let summary = parser.write("hi\x1b[D\x1b[5D\x1b[1q", &mut state);
        assert_eq!(
            summary,
            WriteSummary {
                printed: 2,
                dispatched: 2,
                defaulted: 1,
                ignored: 1,
            }
        );
    }
}
