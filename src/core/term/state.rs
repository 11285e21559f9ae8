//! Terminal state management
//!
//! This module defines the line buffer, cursor address and pen attributes
//! that the interpreter mutates. Every mutation is also recorded as a
//! [`ScreenEdit`] so a display adapter can follow along incrementally.

use std::ops::Range;

use unicode_width::UnicodeWidthChar;

/// Columns between horizontal tab stops
const TAB_WIDTH: usize = 8;

/// Cursor address. `row` is 1-based, `col` is 0-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CursorPosition {
    pub row: usize,
    pub col: usize,
}

impl CursorPosition {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl Default for CursorPosition {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

/// Palette index of a foreground or background color
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorId(pub u8);

/// Pen attributes applied to the next glyph written.
///
/// Each channel holds at most one color; setting a color replaces the
/// previous one of the same channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Pen {
    pub bold: bool,
    pub fg: Option<ColorId>,
    pub bg: Option<ColorId>,
}

impl Pen {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One buffer column: a character with the pen it was written with.
///
/// A wide character takes two columns: a leading glyph of width 2 followed
/// by a continuation glyph of width 0. Combining marks are kept on the
/// glyph they follow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Glyph {
    /// Base character plus combining marks; empty for a continuation
    pub grapheme: String,
    pub width: u8,
    pub pen: Pen,
}

impl Glyph {
    pub fn new(ch: char, width: u8, pen: Pen) -> Self {
        Self {
            grapheme: ch.to_string(),
            width,
            pen,
        }
    }

    pub fn blank(pen: Pen) -> Self {
        Self::new(' ', 1, pen)
    }

    /// Right half of a wide character
    pub fn continuation(pen: Pen) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            pen,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    pub fn is_wide(&self) -> bool {
        self.width == 2
    }
}

/// A single buffer line, one glyph per display column
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Line {
    pub glyphs: Vec<Glyph>,
}

impl Line {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    #[cfg(test)]
    pub fn text(&self) -> String {
        self.glyphs.iter().map(|g| g.grapheme.as_str()).collect()
    }
}

/// Incremental change to the buffer, in the order it was applied.
///
/// Rows are 1-based like [`CursorPosition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScreenEdit {
    /// Glyphs inserted at a position, shifting the rest of the row right
    Insert { at: CursorPosition, glyphs: Vec<Glyph> },
    /// Columns removed from a row, shifting the rest of the row left
    Delete { row: usize, cols: Range<usize> },
    /// An empty row appended after the last one
    AppendRow,
    /// Buffer reset to a single empty row
    Clear,
}

/// Ordered lines plus the edit log describing how they got there
pub struct ScreenBuffer {
    lines: Vec<Line>,
    edits: Vec<ScreenEdit>,
    /// End of the last logged insert, for coalescing runs of appends
    insert_tail: Option<CursorPosition>,
}

impl Default for ScreenBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenBuffer {
    pub fn new() -> Self {
        Self {
            lines: vec![Line::new()],
            edits: Vec::new(),
            insert_tail: None,
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Line by 1-based row
    pub fn line(&self, row: usize) -> Option<&Line> {
        row.checked_sub(1).and_then(|idx| self.lines.get(idx))
    }

    #[cfg(test)]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    fn line_len(&self, row: usize) -> usize {
        self.line(row).map_or(0, Line::len)
    }

    fn glyph_at(&self, row: usize, col: usize) -> Option<&Glyph> {
        self.line(row).and_then(|line| line.glyphs.get(col))
    }

    fn line_mut(&mut self, row: usize) -> &mut Line {
        let idx = row.saturating_sub(1).min(self.lines.len() - 1);
        &mut self.lines[idx]
    }

    /// Drain the edits recorded since the last call
    pub fn take_edits(&mut self) -> Vec<ScreenEdit> {
        self.insert_tail = None;
        std::mem::take(&mut self.edits)
    }

    fn log_insert(&mut self, at: CursorPosition, glyphs: Vec<Glyph>) {
        let tail = CursorPosition::new(at.row, at.col + glyphs.len());
        if let (Some(prev_tail), Some(ScreenEdit::Insert { glyphs: prev, .. })) =
            (self.insert_tail, self.edits.last_mut())
        {
            if prev_tail == at {
                prev.extend(glyphs);
                self.insert_tail = Some(tail);
                return;
            }
        }
        self.edits.push(ScreenEdit::Insert { at, glyphs });
        self.insert_tail = Some(tail);
    }

    fn log(&mut self, edit: ScreenEdit) {
        self.insert_tail = None;
        self.edits.push(edit);
    }

    /// Put glyphs at `col`, overwriting existing columns and appending past
    /// the end of the row. `col` must not be past the end.
    fn write(&mut self, row: usize, col: usize, glyphs: Vec<Glyph>) {
        let end = (col + glyphs.len()).min(self.line_len(row));
        if col < end {
            self.log(ScreenEdit::Delete {
                row,
                cols: col..end,
            });
        }
        self.line_mut(row)
            .glyphs
            .splice(col..end, glyphs.iter().cloned());
        self.log_insert(CursorPosition::new(row, col), glyphs);
    }

    /// Remove a column range, shifting the remainder left
    fn remove(&mut self, row: usize, cols: Range<usize>, pen: Pen) {
        if cols.is_empty() {
            return;
        }
        let start = cols.start;
        self.line_mut(row).glyphs.drain(cols.clone());
        self.log(ScreenEdit::Delete { row, cols });
        self.mend(row, start, pen);
    }

    /// Insert blanks at a column, shifting the remainder right
    fn insert_blanks(&mut self, row: usize, col: usize, count: usize, pen: Pen) {
        if count == 0 {
            return;
        }
        let blanks = vec![Glyph::blank(pen); count];
        self.line_mut(row).glyphs.splice(col..col, blanks.iter().cloned());
        self.log_insert(CursorPosition::new(row, col), blanks);
        self.mend(row, col, pen);
        self.mend(row, col + count, pen);
    }

    /// Overwrite an existing column range with blanks
    fn blank(&mut self, row: usize, cols: Range<usize>, pen: Pen) {
        if cols.is_empty() {
            return;
        }
        let (start, end) = (cols.start, cols.end);
        self.write(row, start, vec![Glyph::blank(pen); cols.len()]);
        self.mend(row, start, pen);
        self.mend(row, end, pen);
    }

    /// Blank whichever half of a wide character an edit boundary at `col`
    /// split off from the other
    fn mend(&mut self, row: usize, col: usize, pen: Pen) {
        let lead_before = col > 0 && self.glyph_at(row, col - 1).map_or(false, Glyph::is_wide);
        let continuation_here = self.glyph_at(row, col).map_or(false, Glyph::is_continuation);

        if continuation_here && !lead_before {
            self.write(row, col, vec![Glyph::blank(pen)]);
        } else if lead_before && !continuation_here {
            self.write(row, col - 1, vec![Glyph::blank(pen)]);
        }
    }

    fn append_row(&mut self) {
        self.lines.push(Line::new());
        self.log(ScreenEdit::AppendRow);
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.lines.push(Line::new());
        self.log(ScreenEdit::Clear);
    }
}

/// Terminal state: buffer, cursor and pen owned by one session
#[derive(Default)]
pub struct TerminalState {
    pub screen: ScreenBuffer,
    cursor: CursorPosition,
    pub pen: Pen,
}

impl TerminalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> CursorPosition {
        self.cursor
    }

    pub fn line_count(&self) -> usize {
        self.screen.line_count()
    }

    /// Text of a 1-based row
    #[cfg(test)]
    pub fn line_text(&self, row: usize) -> Option<String> {
        self.screen.line(row).map(Line::text)
    }

    /// Glyph at a 1-based row and 0-based column
    #[cfg(test)]
    pub fn glyph(&self, row: usize, col: usize) -> Option<&Glyph> {
        self.screen.glyph_at(row, col)
    }

    pub fn take_edits(&mut self) -> Vec<ScreenEdit> {
        self.screen.take_edits()
    }

    /// Characters in a column range of a row. Wide characters count once,
    /// and columns past the end of the row count one each.
    pub fn char_span(&self, row: usize, cols: Range<usize>) -> usize {
        cols.filter(|&col| {
            !self
                .screen
                .glyph_at(row, col)
                .map_or(false, Glyph::is_continuation)
        })
        .count()
    }

    fn current_line_len(&self) -> usize {
        self.screen.line_len(self.cursor.row)
    }

    /// Keep the column within the current row's append position
    fn clamp_col(&mut self) {
        self.cursor.col = self.cursor.col.min(self.current_line_len());
    }

    fn clamp_row(&self, row: usize) -> usize {
        row.clamp(1, self.screen.line_count())
    }

    /// Write a glyph: append at end of row, otherwise overwrite in place.
    /// Wide characters take two columns; zero-width ones join the glyph
    /// before the cursor.
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0);
        if width == 0 {
            self.append_to_previous_glyph(ch);
            return;
        }

        let CursorPosition { row, col } = self.cursor;
        let mut glyphs = vec![Glyph::new(ch, width as u8, self.pen)];
        if width == 2 {
            glyphs.push(Glyph::continuation(self.pen));
        }
        self.screen.write(row, col, glyphs);
        self.screen.mend(row, col, self.pen);
        self.screen.mend(row, col + width, self.pen);
        self.cursor.col = col + width;
    }

    fn append_to_previous_glyph(&mut self, ch: char) {
        let CursorPosition { row, col } = self.cursor;
        let Some(mut target) = col.checked_sub(1) else {
            return;
        };
        if target > 0 && self.screen.glyph_at(row, target).map_or(false, Glyph::is_continuation) {
            target -= 1;
        }
        if let Some(glyph) = self.screen.glyph_at(row, target) {
            let mut glyph = glyph.clone();
            glyph.grapheme.push(ch);
            self.screen.write(row, target, vec![glyph]);
        }
    }

    /// Horizontal tab - move to the next tab stop, padding with blanks
    /// only past the end of the row
    pub fn horizontal_tab(&mut self) {
        let CursorPosition { row, col } = self.cursor;
        let stop = (col / TAB_WIDTH + 1) * TAB_WIDTH;
        let len = self.current_line_len();
        if stop > len {
            self.screen.write(row, len, vec![Glyph::blank(self.pen); stop - len]);
            self.screen.mend(row, len, self.pen);
        }
        self.cursor.col = stop;
    }

    /// Backspace - move cursor left without deleting
    pub fn backspace(&mut self) {
        self.cursor.col = self.cursor.col.saturating_sub(1);
    }

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
    }

    /// Line feed - move down, growing the buffer only from the last row
    pub fn linefeed(&mut self) {
        if self.cursor.row < self.screen.line_count() {
            self.cursor.row += 1;
            self.clamp_col();
        } else {
            self.screen.append_row();
            self.cursor.row = self.screen.line_count();
            self.cursor.col = 0;
        }
    }

    /// Cursor up
    pub fn cursor_up(&mut self, n: usize) {
        self.cursor.row = self.clamp_row(self.cursor.row.saturating_sub(n));
        self.clamp_col();
    }

    /// Cursor down
    pub fn cursor_down(&mut self, n: usize) {
        self.cursor.row = self.clamp_row(self.cursor.row.saturating_add(n));
        self.clamp_col();
    }

    /// Cursor forward (right)
    pub fn cursor_forward(&mut self, n: usize) {
        self.cursor.col = self.cursor.col.saturating_add(n);
        self.clamp_col();
    }

    /// Cursor backward (left)
    pub fn cursor_backward(&mut self, n: usize) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: usize, col: usize) {
        self.cursor.row = self.clamp_row(row);
        self.cursor.col = col.saturating_sub(1);
        self.clamp_col();
    }

    /// Erase in display. Only the full clear has an effect.
    pub fn erase_in_display(&mut self, mode: usize) {
        if mode == 2 {
            self.screen.clear();
            self.cursor = CursorPosition::default();
        }
    }

    /// Erase in line
    pub fn erase_in_line(&mut self, mode: usize) {
        let CursorPosition { row, col } = self.cursor;
        let len = self.current_line_len();
        let pen = self.pen;

        match mode {
            0 => self.screen.remove(row, col..len, pen),
            1 => self.screen.blank(row, 0..(col + 1).min(len), pen),
            2 => {
                self.screen.remove(row, 0..len, pen);
                self.screen.insert_blanks(row, 0, col, pen);
            }
            _ => {}
        }
    }

    /// Delete characters at the cursor, shifting the rest of the row left
    pub fn delete_chars(&mut self, n: usize) {
        let CursorPosition { row, col } = self.cursor;
        let end = col.saturating_add(n).min(self.current_line_len());
        self.screen.remove(row, col..end, self.pen);
    }

    /// Blank characters at the cursor without moving it
    pub fn erase_chars(&mut self, n: usize) {
        let CursorPosition { row, col } = self.cursor;
        let end = col.saturating_add(n).min(self.current_line_len());
        self.screen.blank(row, col..end, self.pen);
    }

    /// Insert blanks at the cursor without moving it
    pub fn insert_chars(&mut self, n: usize) {
        let CursorPosition { row, col } = self.cursor;
        self.screen.insert_blanks(row, col, n, self.pen);
    }
}
