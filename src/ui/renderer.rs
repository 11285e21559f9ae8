//! Terminal renderer using crossterm
//!
//! Draws the bottom of the line buffer into the local terminal with a
//! status line underneath. Screen edits only mark rows dirty; the rows are
//! redrawn from the terminal state on the next frame.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::ops::Range;

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture},
    execute, queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use tracing::debug;
use unicode_width::UnicodeWidthChar;

use crate::config::Theme;
use crate::core::cursor::Highlight;
use crate::core::display::DisplayAdapter;
use crate::core::term::{CursorPosition, Glyph, Pen, TerminalState};

/// Style of a run of cells
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct CellStyle {
    pen: Pen,
    reverse: bool,
}

/// Terminal renderer
pub struct Renderer {
    theme: Theme,
    /// Whether the terminal has been initialized
    initialized: bool,
    /// Current terminal size (cols, rows)
    size: (u16, u16),
    /// Buffer rows touched since the last frame
    dirty_rows: BTreeSet<usize>,
    full_redraw: bool,
    /// Rows scrolled back from the bottom
    scroll_offset: usize,
    last_top: usize,
    last_cursor_row: Option<usize>,
}

impl DisplayAdapter for Renderer {
    fn insert(&mut self, at: CursorPosition, _glyphs: &[Glyph]) {
        self.dirty_rows.insert(at.row);
    }

    fn delete(&mut self, row: usize, _cols: Range<usize>) {
        self.dirty_rows.insert(row);
    }

    fn append_row(&mut self) {
        // The viewport follows the bottom, so every row may have moved
        self.full_redraw = true;
    }

    fn clear(&mut self) {
        self.full_redraw = true;
        self.scroll_offset = 0;
    }
}

impl Renderer {
    pub fn new(theme: Theme) -> Self {
        Self {
            theme,
            initialized: false,
            size: (80, 24),
            dirty_rows: BTreeSet::new(),
            full_redraw: true,
            scroll_offset: 0,
            last_top: 1,
            last_cursor_row: None,
        }
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableMouseCapture,
            EnableBracketedPaste,
            DisableLineWrap,
            Hide,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        self.initialized = true;

        let (cols, rows) = terminal::size()?;
        self.resize(cols, rows);
        debug!("Renderer initialized at {}x{}", cols, rows);
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            DisableBracketedPaste,
            DisableMouseCapture,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();

        // Disable raw mode - this is the most important part
        terminal::disable_raw_mode()
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.size = (cols.max(1), rows.max(2));
        self.full_redraw = true;
    }

    /// Terminal rows available for the buffer
    fn viewport_height(&self) -> usize {
        usize::from(self.size.1 - 1)
    }

    /// First visible buffer row (1-based)
    fn top_row(&self, line_count: usize) -> usize {
        let bottom_top = line_count.saturating_sub(self.viewport_height()) + 1;
        bottom_top.saturating_sub(self.scroll_offset).max(1)
    }

    pub fn scroll_up(&mut self, lines: usize, line_count: usize) {
        let max = line_count.saturating_sub(self.viewport_height());
        self.scroll_offset = (self.scroll_offset + lines).min(max);
        self.full_redraw = true;
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
        self.full_redraw = true;
    }

    pub fn scroll_to_bottom(&mut self) {
        if self.scroll_offset > 0 {
            self.scroll_offset = 0;
            self.full_redraw = true;
        }
    }

    /// Buffer cell under a screen position, as (1-based row, column).
    /// Positions past the end of a line map to the end of the line, and
    /// the right half of a wide glyph maps to its left half.
    pub fn buffer_position(&self, state: &TerminalState, x: u16, y: u16) -> Option<(usize, usize)> {
        if usize::from(y) >= self.viewport_height() {
            return None;
        }
        let row = self.top_row(state.line_count()) + usize::from(y);
        let line = state.screen.line(row)?;

        let mut col = usize::from(x).min(line.len());
        if col > 0 && line.glyphs.get(col).map_or(false, Glyph::is_continuation) {
            col -= 1;
        }
        Some((row, col))
    }

    /// Draw a frame
    pub fn render(
        &mut self,
        state: &TerminalState,
        highlight: Option<&Highlight>,
        status: &str,
        alert: bool,
    ) -> io::Result<()> {
        let line_count = state.line_count();
        let top = self.top_row(line_count);
        let height = self.viewport_height();

        let mut rows: BTreeSet<usize> = if self.full_redraw || top != self.last_top {
            (top..top + height).collect()
        } else {
            let mut rows = std::mem::take(&mut self.dirty_rows);
            rows.extend(self.last_cursor_row);
            rows.extend(highlight.map(|h| h.row));
            rows
        };
        rows.retain(|row| (top..top + height).contains(row));

        let stdout = io::stdout();
        let mut out = io::BufWriter::with_capacity(65536, stdout.lock());

        // Begin synchronized update (reduces flicker)
        write!(out, "\x1b[?2026h")?;
        for row in rows {
            let y = (row - top) as u16;
            let cursor_cols = highlight.filter(|h| h.row == row).map(|h| h.cols.clone());
            self.draw_row(&mut out, state, row, y, cursor_cols)?;
        }
        self.draw_status(&mut out, status, alert)?;
        write!(out, "\x1b[?2026l")?;
        out.flush()?;

        self.dirty_rows.clear();
        self.full_redraw = false;
        self.last_top = top;
        self.last_cursor_row = highlight.map(|h| h.row);
        Ok(())
    }

    fn draw_row<W: Write>(
        &self,
        out: &mut W,
        state: &TerminalState,
        row: usize,
        y: u16,
        cursor_cols: Option<Range<usize>>,
    ) -> io::Result<()> {
        queue!(out, MoveTo(0, y))?;
        let cols = usize::from(self.size.0);
        let glyphs: &[Glyph] = state.screen.line(row).map_or(&[], |line| &line.glyphs);

        let mut width = 0;
        let mut run = String::new();
        let mut run_style = CellStyle::default();
        let is_cursor = |col: usize| cursor_cols.as_ref().map_or(false, |c| c.contains(&col));

        let blank = Glyph::blank(Pen::default());
        let cells = glyphs.iter().chain(std::iter::once(&blank)).enumerate();
        for (col, glyph) in cells {
            let trailing = col == glyphs.len();
            if trailing && !is_cursor(col) {
                break;
            }
            // Drawn along with the wide glyph before it
            if glyph.is_continuation() {
                continue;
            }
            let w = usize::from(glyph.width);
            if width + w > cols {
                break;
            }

            let style = CellStyle {
                pen: glyph.pen,
                reverse: is_cursor(col) || (glyph.is_wide() && is_cursor(col + 1)),
            };
            if style != run_style && !run.is_empty() {
                self.apply_style(out, run_style)?;
                queue!(out, Print(&run))?;
                run.clear();
            }
            run_style = style;
            run.push_str(&glyph.grapheme);
            width += w;
        }

        if !run.is_empty() {
            self.apply_style(out, run_style)?;
            queue!(out, Print(&run))?;
        }
        self.apply_style(out, CellStyle::default())?;
        queue!(out, Clear(ClearType::UntilNewLine))
    }

    fn draw_status<W: Write>(&self, out: &mut W, status: &str, alert: bool) -> io::Result<()> {
        let cols = usize::from(self.size.0);
        let mut text = status.to_string();
        if self.scroll_offset > 0 {
            text.push_str(&format!(" [+{}]", self.scroll_offset));
        }
        let text = clip(&text, cols);

        let bg = if alert {
            self.theme.status_alert_bg
        } else {
            self.theme.status_bg
        };
        queue!(
            out,
            MoveTo(0, self.size.1 - 1),
            SetAttribute(Attribute::Reset),
            SetBackgroundColor(bg.to_crossterm()),
            SetForegroundColor(self.theme.status_fg.to_crossterm()),
            Print(&text),
            Clear(ClearType::UntilNewLine),
            ResetColor
        )
    }

    /// Apply pen attributes over the theme defaults
    fn apply_style<W: Write>(&self, out: &mut W, style: CellStyle) -> io::Result<()> {
        let fg = style
            .pen
            .fg
            .map_or(self.theme.foreground.to_crossterm(), |id| Color::AnsiValue(id.0));
        let bg = style
            .pen
            .bg
            .map_or(self.theme.background.to_crossterm(), |id| Color::AnsiValue(id.0));

        queue!(
            out,
            SetAttribute(Attribute::Reset),
            SetForegroundColor(fg),
            SetBackgroundColor(bg)
        )?;
        if style.pen.bold {
            queue!(out, SetAttribute(Attribute::Bold))?;
        }
        if style.reverse {
            queue!(out, SetAttribute(Attribute::Reverse))?;
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Truncate to at most `cols` display columns
fn clip(text: &str, cols: usize) -> String {
    let mut width = 0;
    text.chars()
        .take_while(|ch| {
            width += ch.width().unwrap_or(0);
            width <= cols
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::display;
    use crate::core::term::VtParser;

    fn state_with(text: &str) -> TerminalState {
        let mut state = TerminalState::new();
        VtParser::new().write(text, &mut state);
        state
    }

    fn renderer(cols: u16, rows: u16) -> Renderer {
        let mut renderer = Renderer::new(Theme::dark());
        renderer.resize(cols, rows);
        renderer
    }

    #[test]
    fn test_viewport_follows_bottom() {
        let mut renderer = renderer(20, 4);
        assert_eq!(renderer.top_row(1), 1);
        assert_eq!(renderer.top_row(3), 1);
        assert_eq!(renderer.top_row(10), 8);

        renderer.scroll_up(5, 10);
        assert_eq!(renderer.top_row(10), 3);
        renderer.scroll_up(100, 10);
        assert_eq!(renderer.top_row(10), 1);
        renderer.scroll_down(2);
        assert_eq!(renderer.top_row(10), 3);
        renderer.scroll_to_bottom();
        assert_eq!(renderer.top_row(10), 8);
    }

    #[test]
    fn test_buffer_position() {
        let state = state_with("first\r\n中文ab");
        let renderer = renderer(20, 5);

        assert_eq!(renderer.buffer_position(&state, 2, 0), Some((1, 2)));
        assert_eq!(renderer.buffer_position(&state, 9, 0), Some((1, 5)));
        // Both halves of a wide glyph map to its first column
        assert_eq!(renderer.buffer_position(&state, 2, 1), Some((2, 2)));
        assert_eq!(renderer.buffer_position(&state, 3, 1), Some((2, 2)));
        assert_eq!(renderer.buffer_position(&state, 4, 1), Some((2, 4)));
        assert_eq!(renderer.buffer_position(&state, 0, 2), None);
        // Status line
        assert_eq!(renderer.buffer_position(&state, 0, 4), None);
    }

    #[test]
    fn test_edits_mark_rows_dirty() {
        let mut state = state_with("one\r\ntwo");
        let mut renderer = renderer(20, 5);
        renderer.full_redraw = false;
        state.take_edits();

        VtParser::new().write("\x1b[1;1Hx", &mut state);
        display::replay(state.take_edits(), &mut renderer);
        assert_eq!(renderer.dirty_rows.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert!(!renderer.full_redraw);

        VtParser::new().write("\x1b[2;1H\r\n", &mut state);
        display::replay(state.take_edits(), &mut renderer);
        assert!(renderer.full_redraw);
    }

    #[test]
    fn test_draw_row_clips_and_highlights() {
        let state = state_with("abcdef");
        let renderer = renderer(4, 3);

        let mut out = Vec::new();
        renderer.draw_row(&mut out, &state, 1, 0, Some(1..2)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains('a'));
        assert!(text.contains("cd"));
        assert!(!text.contains('e'));
    }

    #[test]
    fn test_draw_row_wide_glyphs() {
        let state = state_with("中文x");
        let renderer = renderer(3, 3);

        let mut out = Vec::new();
        renderer.draw_row(&mut out, &state, 1, 0, Some(1..2)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains('中'));
        assert!(!text.contains('文'));
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("hello", 3), "hel");
        assert_eq!(clip("中文", 3), "中");
        assert_eq!(clip("ok", 10), "ok");
    }
}
