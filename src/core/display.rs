//! Display adapter contract
//!
//! The screen model logs every mutation as a [`ScreenEdit`]; a display
//! replays that log to stay in sync without diffing whole buffers.

use std::ops::Range;

use super::term::{CursorPosition, Glyph, ScreenEdit};

/// Receiver of incremental screen edits
pub trait DisplayAdapter {
    /// Styled glyphs inserted at `at`, one per column, shifting the rest
    /// of the row right
    fn insert(&mut self, at: CursorPosition, glyphs: &[Glyph]);

    /// Columns removed from `row`, shifting the rest of the row left
    fn delete(&mut self, row: usize, cols: Range<usize>);

    /// A new empty row after the last one
    fn append_row(&mut self);

    /// Everything removed, leaving one empty row
    fn clear(&mut self);
}

/// Apply a batch of edits in order
pub fn replay<I>(edits: I, adapter: &mut dyn DisplayAdapter)
where
    I: IntoIterator<Item = ScreenEdit>,
{
    for edit in edits {
        match edit {
            ScreenEdit::Insert { at, glyphs } => adapter.insert(at, &glyphs),
            ScreenEdit::Delete { row, cols } => adapter.delete(row, cols),
            ScreenEdit::AppendRow => adapter.append_row(),
            ScreenEdit::Clear => adapter.clear(),
        }
    }
}

/// Plain in-memory display for tests
#[cfg(test)]
pub mod testing {
    use super::*;

    pub struct TextMirror {
        pub rows: Vec<Vec<Glyph>>,
    }

    impl Default for TextMirror {
        fn default() -> Self {
            Self {
                rows: vec![Vec::new()],
            }
        }
    }

    impl TextMirror {
        pub fn text(&self, row: usize) -> String {
            self.rows[row - 1].iter().map(|g| g.grapheme.as_str()).collect()
        }
    }

    impl DisplayAdapter for TextMirror {
        fn insert(&mut self, at: CursorPosition, glyphs: &[Glyph]) {
            let row = &mut self.rows[at.row - 1];
            row.splice(at.col..at.col, glyphs.iter().cloned());
        }

        fn delete(&mut self, row: usize, cols: Range<usize>) {
            self.rows[row - 1].drain(cols);
        }

        fn append_row(&mut self) {
            self.rows.push(Vec::new());
        }

        fn clear(&mut self) {
            self.rows = vec![Vec::new()];
        }
    }
}
