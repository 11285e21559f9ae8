//! Key mapping for terminal input
//!
//! Classifies crossterm key events into local actions or [`KeyInput`] for
//! the input bridge. Keys without a meaning of their own on the line
//! (arrows, function keys, control codes) are pre-encoded as raw bytes.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::core::bridge::KeyInput;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// What a key press means to the client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// Ctrl+Q
    Quit,
    /// Shift+PageUp
    ScrollUp,
    /// Shift+PageDown
    ScrollDown,
    /// Forward to the session
    Send(KeyInput),
}

/// Key mapper for converting key events to bridge input
pub struct KeyMapper;

impl KeyMapper {
    /// Classify a key event. Releases and unmapped keys yield `None`.
    pub fn classify(event: &KeyEvent) -> Option<KeyAction> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char('q') | KeyCode::Char('Q') if mods == Modifiers::CTRL => {
                Some(KeyAction::Quit)
            }
            KeyCode::PageUp if mods == Modifiers::SHIFT => Some(KeyAction::ScrollUp),
            KeyCode::PageDown if mods == Modifiers::SHIFT => Some(KeyAction::ScrollDown),
            _ => Self::map(event).map(KeyAction::Send),
        }
    }

    /// Map a crossterm KeyEvent to bridge input
    pub fn map(event: &KeyEvent) -> Option<KeyInput> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            // Character keys
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            KeyCode::Enter => Some(KeyInput::Enter),

            // Backspace
            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(KeyInput::Raw(vec![0x1B, 0x7F]))
                } else {
                    Some(KeyInput::Backspace)
                }
            }

            // Tab
            KeyCode::Tab => Some(KeyInput::Raw(vec![0x09])),
            KeyCode::BackTab => Some(KeyInput::Raw(b"\x1b[Z".to_vec())),

            // Escape
            KeyCode::Esc => Some(KeyInput::Raw(vec![0x1B])),

            // Arrow keys
            KeyCode::Up => Some(KeyInput::Raw(Self::cursor_key(b'A', mods))),
            KeyCode::Down => Some(KeyInput::Raw(Self::cursor_key(b'B', mods))),
            KeyCode::Right => Some(KeyInput::Raw(Self::cursor_key(b'C', mods))),
            KeyCode::Left => Some(KeyInput::Raw(Self::cursor_key(b'D', mods))),

            // Navigation keys
            KeyCode::Home => Some(KeyInput::Raw(Self::cursor_key(b'H', mods))),
            KeyCode::End => Some(KeyInput::Raw(Self::cursor_key(b'F', mods))),
            KeyCode::PageUp => Some(KeyInput::Raw(Self::tilde_key(5, mods))),
            KeyCode::PageDown => Some(KeyInput::Raw(Self::tilde_key(6, mods))),
            KeyCode::Insert => Some(KeyInput::Raw(Self::tilde_key(2, mods))),
            KeyCode::Delete => Some(KeyInput::Raw(Self::tilde_key(3, mods))),

            // Function keys
            KeyCode::F(n) => Self::function_key(n, mods).map(KeyInput::Raw),

            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> KeyInput {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl && !alt {
            match ch.to_ascii_lowercase() {
                'c' => return KeyInput::Interrupt,
                'u' => return KeyInput::Abort,
                'h' => return KeyInput::Backspace,
                'm' | 'j' => return KeyInput::Enter,
                _ => {}
            }
            if let Some(code) = Self::control_code(ch) {
                return KeyInput::Raw(vec![code]);
            }
        }

        // Ctrl + Alt + letter
        if ctrl && alt && ch.is_ascii_alphabetic() {
            let code = (ch.to_ascii_lowercase() as u8) - b'a' + 1;
            return KeyInput::Raw(vec![0x1B, code]);
        }

        // Alt + key = ESC + key
        if alt && !ctrl {
            let mut bytes = vec![0x1B];
            let mut utf8 = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            return KeyInput::Raw(bytes);
        }

        KeyInput::Char(ch)
    }

    /// C0 code for Ctrl + key
    fn control_code(ch: char) -> Option<u8> {
        if ch.is_ascii_alphabetic() {
            return Some((ch.to_ascii_lowercase() as u8) - b'a' + 1);
        }
        match ch {
            '@' | '`' | ' ' => Some(0x00),
            '[' => Some(0x1B),
            '\\' => Some(0x1C),
            ']' => Some(0x1D),
            '^' | '~' => Some(0x1E),
            '_' | '?' => Some(0x1F),
            _ => None,
        }
    }

    /// Arrow, Home and End: ESC [ key, or ESC [ 1 ; mod key
    fn cursor_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    /// Tilde key sequence (PageUp, PageDown, Insert, Delete)
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    /// Function key sequence
    fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        // F1-F4 use SS3 letters, the rest tilde codes
        let tilde = match n {
            1..=4 => {
                let key = b"PQRS"[usize::from(n - 1)];
                return Some(if mods.is_empty() {
                    vec![0x1B, b'O', key]
                } else {
                    format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
                });
            }
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return None,
        };
        Some(Self::tilde_key(tilde, mods))
    }

    /// Calculate xterm modifier code
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}
