//! Configuration and theme management for termlink.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.termlink/config.toml`
//! - Connection target validation
//! - The dark and light display themes
//!
//! # Configuration File
//!
//! ```toml
//! # dark or light
//! theme = "dark"
//!
//! # Secret asked for before a destructive command is released.
//! # TERMLINK_SECRET overrides it.
//! credential = "change-me"
//!
//! [connection]
//! host = "127.0.0.1"
//! port = 2323
//! user = "root"
//! # Sent once the session is up
//! command = "uname -a"
//! # Run a local command instead of connecting
//! # exec = "sh -i"
//!
//! [terminal]
//! blink_interval_ms = 500
//! poll_interval_ms = 10
//! read_chunk = 1024
//! newline = "lf"   # lf, cr or crlf
//!
//! [guard]
//! enabled = true
//! patterns = ["^mkfs"]
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::bridge::NewlineMode;
use crate::core::guard::{CommandGuard, Credential, GuardError};
use crate::core::receiver::ReceiverConfig;
use crate::core::session::SessionOptions;

/// Environment variable that overrides the configured credential
pub const SECRET_ENV: &str = "TERMLINK_SECRET";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not determine home directory")]
    NoHome,

    #[error("Invalid IPv4 address: {0:?}")]
    InvalidHost(String),

    #[error("Invalid port {0:?}: expected a number from 1 to 65535")]
    InvalidPort(String),

    #[error(transparent)]
    Guard(#[from] GuardError),
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Theme name
    pub theme: String,
    /// Stored secret for destructive-command confirmation
    pub credential: Option<String>,
    pub connection: ConnectionConfig,
    pub terminal: TerminalConfig,
    pub guard: GuardConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            credential: None,
            connection: ConnectionConfig::default(),
            terminal: TerminalConfig::default(),
            guard: GuardConfig::default(),
        }
    }
}

/// Connection target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Shown in the status line
    pub user: String,
    /// Initial command
    pub command: Option<String>,
    /// Local command run instead of a TCP connection
    pub exec: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2323,
            user: "root".to_string(),
            command: None,
            exec: None,
        }
    }
}

/// Terminal timing and I/O settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub blink_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub read_chunk: usize,
    pub newline: NewlineMode,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            blink_interval_ms: 500,
            poll_interval_ms: 10,
            read_chunk: 1024,
            newline: NewlineMode::Lf,
        }
    }
}

/// Destructive-command guard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub enabled: bool,
    /// Regexes added to the built-in denylist
    pub patterns: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Load `~/.termlink/config.toml`, or defaults if it does not exist
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write to `~/.termlink/config.toml`, returning the path written
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoHome)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn config_path() -> Option<PathBuf> {
        data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Check the connection target. A local `exec` needs no address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.exec.is_some() {
            return Ok(());
        }
        validate_host(&self.connection.host)?;
        if self.connection.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        Ok(())
    }

    pub fn theme(&self) -> Theme {
        Theme::by_name(&self.theme)
    }

    /// Credential from the environment, falling back to the file
    pub fn credential(&self) -> Option<Credential> {
        std::env::var(SECRET_ENV)
            .ok()
            .or_else(|| self.credential.clone())
            .filter(|secret| !secret.is_empty())
            .map(Credential::new)
    }

    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        let guard = if self.guard.enabled {
            CommandGuard::with_patterns(&self.guard.patterns)?
        } else {
            CommandGuard::disabled()
        };

        Ok(SessionOptions {
            blink_interval: Duration::from_millis(self.terminal.blink_interval_ms.max(1)),
            receiver: ReceiverConfig {
                poll_interval: Duration::from_millis(self.terminal.poll_interval_ms),
                read_chunk: self.terminal.read_chunk.max(1),
            },
            newline: self.terminal.newline,
            guard,
            credential: self.credential(),
        })
    }
}

/// Dotted-quad IPv4 without leading zeros, or `localhost`
pub fn validate_host(host: &str) -> Result<(), ConfigError> {
    if host == "localhost" {
        return Ok(());
    }
    let invalid = || ConfigError::InvalidHost(host.to_string());

    let octets: Vec<&str> = host.split('.').collect();
    if octets.len() != 4 {
        return Err(invalid());
    }
    for octet in octets {
        let digits_only = !octet.is_empty() && octet.bytes().all(|b| b.is_ascii_digit());
        if !digits_only || octet.len() > 3 || (octet.len() > 1 && octet.starts_with('0')) {
            return Err(invalid());
        }
        if octet.parse::<u16>().map_or(true, |n| n > 255) {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Port number given as digits only, 1 to 65535
pub fn parse_port(text: &str) -> Result<u16, ConfigError> {
    let invalid = || ConfigError::InvalidPort(text.to_string());
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match text.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid()),
    }
}

/// `~/.termlink`, holding the config file and the log
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".termlink"))
}

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

/// Display theme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,

    pub background: Color,
    pub foreground: Color,

    // Status line
    pub status_bg: Color,
    pub status_fg: Color,
    pub status_alert_bg: Color,

    // Confirmation prompts
    pub prompt_bg: Color,
    pub prompt_fg: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            name: "dark",
            background: Color::new(32, 32, 32),
            foreground: Color::new(255, 255, 255),
            status_bg: Color::new(60, 60, 60),
            status_fg: Color::new(230, 230, 230),
            status_alert_bg: Color::new(150, 40, 40),
            prompt_bg: Color::new(180, 140, 0),
            prompt_fg: Color::new(0, 0, 0),
        }
    }

    pub fn light() -> Self {
        Self {
            name: "light",
            background: Color::new(243, 243, 243),
            foreground: Color::new(26, 26, 26),
            status_bg: Color::new(210, 210, 210),
            status_fg: Color::new(26, 26, 26),
            status_alert_bg: Color::new(230, 120, 120),
            prompt_bg: Color::new(250, 210, 90),
            prompt_fg: Color::new(0, 0, 0),
        }
    }

    /// Unknown names fall back to dark
    pub fn by_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "light" => Self::light(),
            _ => Self::dark(),
        }
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
