//! Destructive-command guard
//!
//! Lines submitted from the keyboard are checked against a denylist before
//! the terminator goes out. A match needs an explicit confirmation plus the
//! session credential. The check is advisory; the remote shell still
//! decides what actually runs.

use std::fmt;

use regex::Regex;
use thiserror::Error;

/// Recursive forced delete of the filesystem root
pub const DEFAULT_DENYLIST: &[&str] = &[
    r"^(?:sudo\s+)?rm\s+(?:--?[\w-]+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(?:--?[\w-]+\s+)*/\*?$",
    r"^(?:sudo\s+)?rm\s+(?:--?[\w-]+\s+)*--recursive\s+(?:--?[\w-]+\s+)*/\*?$",
];

#[derive(Error, Debug)]
#[error("Invalid denylist pattern {pattern:?}: {source}")]
pub struct GuardError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Session secret checked before a destructive command is released
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn matches(&self, attempt: &str) -> bool {
        self.0 == attempt
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Interactive questions asked during confirmation
pub trait Prompter {
    /// Yes/no question
    fn confirm(&mut self, question: &str) -> bool;

    /// Masked entry; `None` when the user backs out
    fn secret(&mut self, prompt: &str) -> Option<String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Declined,
    BadSecret,
}

pub struct CommandGuard {
    patterns: Vec<Regex>,
    enabled: bool,
}

impl Default for CommandGuard {
    fn default() -> Self {
        Self::with_patterns(&[]).expect("default denylist compiles")
    }
}

impl CommandGuard {
    /// Default denylist plus `extra` patterns
    pub fn with_patterns(extra: &[String]) -> Result<Self, GuardError> {
        let patterns = DEFAULT_DENYLIST
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| GuardError {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            patterns,
            enabled: true,
        })
    }

    pub fn disabled() -> Self {
        Self {
            patterns: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_destructive(&self, line: &str) -> bool {
        let line = line.trim();
        self.enabled && self.patterns.iter().any(|re| re.is_match(line))
    }

    /// Two-step confirmation: a yes/no question, then the secret.
    /// Without a stored credential nothing can be confirmed.
    pub fn authorize(
        &self,
        line: &str,
        credential: Option<&Credential>,
        prompter: &mut dyn Prompter,
    ) -> Verdict {
        let question = format!("Run destructive command `{}`? [y/N]", line.trim());
        if !prompter.confirm(&question) {
            return Verdict::Declined;
        }
        let Some(attempt) = prompter.secret("Password: ") else {
            return Verdict::Declined;
        };
        match credential {
            Some(credential) if credential.matches(&attempt) => Verdict::Allowed,
            _ => Verdict::BadSecret,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedPrompter;
    use super::*;

    #[test]
    fn test_default_denylist() {
        let guard = CommandGuard::default();
        for line in [
            "rm -rf /*",
            "rm -rf /",
            "rm -fr /*",
            "  rm -rf /*  ",
            "rm -r -f /",
            "rm -rf --no-preserve-root /",
            "sudo rm -Rf /*",
            "rm --recursive --force /",
            "rm --force --recursive /*",
            "sudo rm -f --recursive /",
        ] {
            assert!(guard.is_destructive(line), "{:?}", line);
        }
        for line in [
            "rm -rf /tmp/build",
            "rm -rf ./*",
            "ls /",
            "rm file",
            "echo rm -rf /*",
            "rm --recursive --force /home",
            "rm --force /",
        ] {
            assert!(!guard.is_destructive(line), "{:?}", line);
        }
    }

    #[test]
    fn test_extra_patterns() {
        let guard = CommandGuard::with_patterns(&["^mkfs".to_string()]).unwrap();
        assert!(guard.is_destructive("mkfs.ext4 /dev/sda1"));
        assert!(guard.is_destructive("rm -rf /*"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = CommandGuard::with_patterns(&["(".to_string()]).err().unwrap();
        assert_eq!(err.pattern, "(");
    }

    #[test]
    fn test_disabled_guard_allows_everything() {
        assert!(!CommandGuard::disabled().is_destructive("rm -rf /*"));
    }

    #[test]
    fn test_authorize() {
        let guard = CommandGuard::default();
        let credential = Credential::new("hunter2");

        let mut prompter = ScriptedPrompter::accepting("hunter2");
        assert_eq!(
            guard.authorize("rm -rf /*", Some(&credential), &mut prompter),
            Verdict::Allowed
        );
        assert_eq!(prompter.questions.len(), 2);

        let mut prompter = ScriptedPrompter::accepting("wrong");
        assert_eq!(
            guard.authorize("rm -rf /*", Some(&credential), &mut prompter),
            Verdict::BadSecret
        );

        let mut prompter = ScriptedPrompter::declining();
        assert_eq!(
            guard.authorize("rm -rf /*", Some(&credential), &mut prompter),
            Verdict::Declined
        );
        assert_eq!(prompter.questions.len(), 1);
    }

    #[test]
    fn test_authorize_without_credential() {
        let mut prompter = ScriptedPrompter::accepting("");
        assert_eq!(
            CommandGuard::default().authorize("rm -rf /", None, &mut prompter),
            Verdict::BadSecret
        );
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        assert_eq!(format!("{:?}", Credential::new("hunter2")), "Credential(***)");
    }
}
