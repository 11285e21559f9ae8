//! Core terminal client components.
//!
//! - **term**: line buffer, cursor and pen state plus the escape-sequence parser
//! - **channel**: duplex byte stream to the remote shell
//! - **receiver**: background thread turning channel bytes into text events
//! - **cursor**: blink timer and cursor highlight
//! - **guard**: destructive-command denylist and confirmation
//! - **bridge**: keystrokes to bytes, with the typed-line buffer
//! - **display**: incremental edit contract for renderers
//! - **session**: ties all of the above to one connection
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── RemoteChannel ──► receiver thread ──┐
//! ├── BlinkTimer ─────────────────────────┤ SessionEvent queue
//! │                                       ▼
//! ├── VtParser ──► TerminalState ──► ScreenEdit log ──► DisplayAdapter
//! ├── CursorController (highlight)
//! └── InputBridge ──► CommandGuard ──► RemoteChannel
//! ```

pub mod bridge;
pub mod channel;
pub mod cursor;
pub mod display;
pub mod guard;
pub mod receiver;
pub mod session;
pub mod term;
