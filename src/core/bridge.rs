//! Input/output bridge
//!
//! Turns local keystrokes into bytes for the remote channel. Characters go
//! out as they are typed; a copy of the current line is kept so a submitted
//! command can be checked by the guard before its terminator is sent.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::channel::{RemoteChannel, Result};
use super::guard::{CommandGuard, Credential, Prompter, Verdict};
use super::term::TerminalState;

pub const INTERRUPT: u8 = 0x03;
pub const LINE_KILL: u8 = 0x15;
pub const ERASE: u8 = 0x7f;

/// A keystroke already classified for the bridge
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyInput {
    /// Printable character
    Char(char),
    Enter,
    Backspace,
    /// Ctrl+C
    Interrupt,
    /// Ctrl+U
    Abort,
    /// Pre-encoded bytes (arrows, function keys, other control codes)
    Raw(Vec<u8>),
}

/// Line terminator sent on Enter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewlineMode {
    Cr,
    #[default]
    Lf,
    Crlf,
}

impl NewlineMode {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            NewlineMode::Cr => b"\r",
            NewlineMode::Lf => b"\n",
            NewlineMode::Crlf => b"\r\n",
        }
    }
}

/// What happened to a submitted line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Sent,
    /// Destructive, released after confirmation
    Confirmed,
    /// Destructive, withheld and interrupted remotely
    Refused,
}

/// Local copy of the line being typed
#[derive(Debug, Default)]
pub struct InputLineBuffer {
    text: String,
}

impl InputLineBuffer {
    pub fn push(&mut self, ch: char) {
        self.text.push(ch);
    }

    pub fn push_str(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn pop(&mut self) -> Option<char> {
        self.text.pop()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

pub struct InputBridge {
    line: InputLineBuffer,
    guard: CommandGuard,
    credential: Option<Credential>,
    newline: NewlineMode,
}

impl InputBridge {
    pub fn new(guard: CommandGuard, credential: Option<Credential>, newline: NewlineMode) -> Self {
        Self {
            line: InputLineBuffer::default(),
            guard,
            credential,
            newline,
        }
    }

    #[cfg(test)]
    pub fn line(&self) -> &str {
        self.line.as_str()
    }

    pub fn handle_key(
        &mut self,
        key: KeyInput,
        channel: &dyn RemoteChannel,
        prompter: &mut dyn Prompter,
    ) -> Result<Option<Submission>> {
        match key {
            KeyInput::Char(ch) => {
                if !ch.is_control() {
                    self.line.push(ch);
                }
                let mut utf8 = [0u8; 4];
                channel.send(ch.encode_utf8(&mut utf8).as_bytes())?;
            }
            KeyInput::Enter => return self.submit(channel, prompter).map(Some),
            KeyInput::Backspace => {
                self.line.pop();
                channel.send(&[ERASE])?;
            }
            KeyInput::Interrupt => {
                self.line.clear();
                channel.send(&[INTERRUPT])?;
            }
            KeyInput::Abort => {
                self.line.clear();
                channel.send(&[LINE_KILL])?;
            }
            KeyInput::Raw(bytes) => channel.send(&bytes)?,
        }
        Ok(None)
    }

    /// Type a whole command and submit it, guarded like keyboard input
    pub fn send_line(
        &mut self,
        command: &str,
        channel: &dyn RemoteChannel,
        prompter: &mut dyn Prompter,
    ) -> Result<Submission> {
        self.line.clear();
        self.line.push_str(command);
        channel.send(command.as_bytes())?;
        self.submit(channel, prompter)
    }

    /// Send the terminator for the buffered line, unless the guard refuses it.
    /// The buffer is empty afterwards either way.
    pub fn submit(
        &mut self,
        channel: &dyn RemoteChannel,
        prompter: &mut dyn Prompter,
    ) -> Result<Submission> {
        let line = self.line.take();

        if self.guard.is_destructive(&line) {
            warn!("Destructive command held for confirmation: {:?}", line.trim());
            match self
                .guard
                .authorize(&line, self.credential.as_ref(), prompter)
            {
                Verdict::Allowed => {
                    info!("Destructive command confirmed");
                    channel.send(self.newline.bytes())?;
                    return Ok(Submission::Confirmed);
                }
                verdict => {
                    warn!("Destructive command refused ({:?})", verdict);
                    channel.send(&[INTERRUPT])?;
                    return Ok(Submission::Refused);
                }
            }
        }

        channel.send(self.newline.bytes())?;
        Ok(Submission::Sent)
    }

    /// Arrow keys that walk the remote cursor to a clicked column, one per
    /// character crossed. Only clicks on the cursor's own row move anything.
    pub fn click_motion(state: &TerminalState, row: usize, col: usize) -> Option<Vec<u8>> {
        let cursor = state.cursor();
        if row != cursor.row {
            return None;
        }
        let (span, arrow) = if col > cursor.col {
            (cursor.col..col, b"\x1b[C")
        } else {
            (col..cursor.col, b"\x1b[D")
        };
        let count = state.char_span(row, span);
        (count > 0).then(|| arrow.repeat(count))
    }
}
