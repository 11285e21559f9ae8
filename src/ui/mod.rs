//! User interface rendering and input handling.
//!
//! - **renderer**: draws the line buffer, cursor highlight and status line
//! - **keymapper**: keyboard events to local actions or bridge input
//! - **prompt**: status-line prompts for the destructive-command guard

pub mod keymapper;
pub mod prompt;
pub mod renderer;

pub use keymapper::{KeyAction, KeyMapper};
pub use prompt::TerminalPrompter;
pub use renderer::Renderer;
