//! VT100/ANSI terminal emulation: screen model and escape-sequence interpreter.

pub mod parser;
pub mod state;

pub use parser::VtParser;
pub use state::{CursorPosition, Glyph, Pen, ScreenEdit, TerminalState};
