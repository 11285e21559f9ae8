//! Status-line prompts
//!
//! Confirmation questions for the destructive-command guard, asked on the
//! bottom row of the terminal while the session waits.

use std::io::{self, Write};

use crossterm::{
    cursor::MoveTo,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{self, Clear, ClearType},
};
use tracing::warn;

use crate::config::Theme;
use crate::core::guard::Prompter;

/// Result of feeding one key to a prompt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptStep<T> {
    Pending,
    Done(T),
}

/// Yes/no answer. Anything other than y cancels.
pub fn confirm_key(key: &KeyEvent) -> PromptStep<bool> {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') => PromptStep::Done(true),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            PromptStep::Done(false)
        }
        KeyCode::Char(_) | KeyCode::Enter | KeyCode::Esc => PromptStep::Done(false),
        _ => PromptStep::Pending,
    }
}

/// Masked line entry
#[derive(Debug, Default)]
pub struct SecretEntry {
    text: String,
}

impl SecretEntry {
    /// Feed a key; `Done(None)` means the user backed out
    pub fn key(&mut self, key: &KeyEvent) -> PromptStep<Option<String>> {
        match key.code {
            KeyCode::Enter => PromptStep::Done(Some(std::mem::take(&mut self.text))),
            KeyCode::Esc => PromptStep::Done(None),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                PromptStep::Done(None)
            }
            KeyCode::Backspace => {
                self.text.pop();
                PromptStep::Pending
            }
            KeyCode::Char(ch) => {
                self.text.push(ch);
                PromptStep::Pending
            }
            _ => PromptStep::Pending,
        }
    }

    pub fn masked(&self) -> String {
        "*".repeat(self.text.chars().count())
    }
}

/// Prompter drawing on the terminal's bottom row
pub struct TerminalPrompter {
    theme: Theme,
}

impl TerminalPrompter {
    pub fn new(theme: Theme) -> Self {
        Self { theme }
    }

    fn draw(&self, text: &str) -> io::Result<()> {
        let (_, rows) = terminal::size()?;
        let mut stdout = io::stdout();
        queue!(
            stdout,
            MoveTo(0, rows.saturating_sub(1)),
            SetAttribute(Attribute::Reset),
            SetBackgroundColor(self.theme.prompt_bg.to_crossterm()),
            SetForegroundColor(self.theme.prompt_fg.to_crossterm()),
            Print(text),
            Clear(ClearType::UntilNewLine),
            ResetColor
        )?;
        stdout.flush()
    }

    /// Next key press, skipping everything else
    fn next_key() -> io::Result<KeyEvent> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Release {
                    return Ok(key);
                }
            }
        }
    }

    fn ask_confirm(&mut self, question: &str) -> io::Result<bool> {
        self.draw(question)?;
        loop {
            if let PromptStep::Done(answer) = confirm_key(&Self::next_key()?) {
                return Ok(answer);
            }
        }
    }

    fn ask_secret(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut entry = SecretEntry::default();
        loop {
            self.draw(&format!("{}{}", prompt, entry.masked()))?;
            if let PromptStep::Done(result) = entry.key(&Self::next_key()?) {
                return Ok(result);
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&mut self, question: &str) -> bool {
        self.ask_confirm(question).unwrap_or_else(|e| {
            warn!("Confirmation prompt failed: {}", e);
            false
        })
    }

    fn secret(&mut self, prompt: &str) -> Option<String> {
        self.ask_secret(prompt).unwrap_or_else(|e| {
            warn!("Secret prompt failed: {}", e);
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_confirm_key() {
        assert_eq!(confirm_key(&key(KeyCode::Char('y'))), PromptStep::Done(true));
        assert_eq!(confirm_key(&key(KeyCode::Char('Y'))), PromptStep::Done(true));
        assert_eq!(confirm_key(&key(KeyCode::Char('n'))), PromptStep::Done(false));
        assert_eq!(confirm_key(&key(KeyCode::Enter)), PromptStep::Done(false));
        assert_eq!(confirm_key(&key(KeyCode::Left)), PromptStep::Pending);
        assert_eq!(
            confirm_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            PromptStep::Done(false)
        );
    }

    #[test]
    fn test_secret_entry() {
        let mut entry = SecretEntry::default();
        for ch in "hunter3".chars() {
            assert_eq!(entry.key(&key(KeyCode::Char(ch))), PromptStep::Pending);
        }
        entry.key(&key(KeyCode::Backspace));
        entry.key(&key(KeyCode::Char('2')));
        assert_eq!(entry.masked(), "*******");
        assert_eq!(
            entry.key(&key(KeyCode::Enter)),
            PromptStep::Done(Some("hunter2".to_string()))
        );
    }

    #[test]
    fn test_secret_entry_cancel() {
        let mut entry = SecretEntry::default();
        entry.key(&key(KeyCode::Char('x')));
        assert_eq!(entry.key(&key(KeyCode::Esc)), PromptStep::Done(None));
    }
}
