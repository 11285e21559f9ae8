//! termlink - a VT100/ANSI terminal client for remote shells
//!
//! termlink connects to a shell service over raw TCP (or runs a local
//! command), interprets the VT100/ANSI output into a line buffer, and
//! forwards keystrokes back. Lines matching a destructive-command denylist
//! are held until confirmed with the session secret.
//!
//! # Quick Start
//!
//! ```text
//! termlink --host 10.0.0.7 -p 2323      # Connect to a shell service
//! termlink -e "sh -i"                   # Drive a local command instead
//! termlink -c "uname -a"                # Send a command once connected
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+Q | Quit |
//! | Shift+PageUp/PageDown | Scroll the buffer |
//! | Click on the cursor row | Move the remote cursor there |

mod config;
mod core;
mod ui;

use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crossterm::event::{self, Event, MouseButton, MouseEventKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::bridge::KeyInput;
use crate::core::channel::{ProcessChannel, RemoteChannel, TcpChannel};
use crate::core::session::{Session, SessionStatus};
use crate::ui::{KeyAction, KeyMapper, Renderer, TerminalPrompter};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter
const LOG_ENV: &str = "TERMLINK_LOG";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Rows moved per Shift+PageUp/PageDown
const SCROLL_STEP: usize = 10;

/// Rows moved per mouse wheel notch
const WHEEL_STEP: usize = 3;

/// Command line overrides for the config file
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    command: Option<String>,
    exec: Option<String>,
    theme: Option<String>,
    init_config: bool,
}

impl CliArgs {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.connection.host = host;
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(user) = self.user {
            config.connection.user = user;
        }
        if let Some(command) = self.command {
            config.connection.command = Some(command);
        }
        if let Some(exec) = self.exec {
            config.connection.exec = Some(exec);
        }
        if let Some(theme) = self.theme {
            config.theme = theme;
        }
    }
}

fn print_version() {
    eprintln!("termlink {}", VERSION);
}

fn print_help() {
    eprintln!("termlink {} - VT100/ANSI terminal client for remote shells", VERSION);
    eprintln!();
    eprintln!("Usage: termlink [OPTIONS]");
    eprintln!();
    eprintln!("Connection options:");
    eprintln!("  --host <ADDR>         IPv4 address or localhost (default 127.0.0.1)");
    eprintln!("  -p, --port <PORT>     Port, 1-65535 (default 2323)");
    eprintln!("  -u, --user <NAME>     User shown in the status line (default root)");
    eprintln!("  -c, --command <CMD>   Command sent once connected");
    eprintln!("  -e, --exec <CMD>      Run a local command instead of connecting");
    eprintln!();
    eprintln!("Display options:");
    eprintln!("  -t, --theme <NAME>    dark or light");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  --init-config         Write the current settings to the config file");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Ctrl+Q                Quit");
    eprintln!("  Shift+PageUp/Down     Scroll the buffer");
    eprintln!();
    eprintln!("Configuration: ~/.termlink/config.toml");
    eprintln!("Log:           ~/.termlink/termlink.log ({} sets the filter)", LOG_ENV);
    eprintln!("Secret:        {} overrides the configured credential", config::SECRET_ENV);
}

/// Parse arguments (without the program name). `Ok(None)` means help or
/// version was printed.
fn parse_args<I>(args: I) -> Result<Option<CliArgs>, String>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("Missing value for {}", name))
        };
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                print_version();
                return Ok(None);
            }
            "--host" => cli.host = Some(value("--host")?),
            "-p" | "--port" => {
                let port = value("--port")?;
                cli.port = Some(config::parse_port(&port).map_err(|e| e.to_string())?);
            }
            "-u" | "--user" => cli.user = Some(value("--user")?),
            "-c" | "--command" => cli.command = Some(value("--command")?),
            "-e" | "--exec" => cli.exec = Some(value("--exec")?),
            "-t" | "--theme" => cli.theme = Some(value("--theme")?),
            "--init-config" => cli.init_config = true,
            other => return Err(format!("Unknown argument: {}. Use -h for help.", other)),
        }
    }

    Ok(Some(cli))
}

/// Log to ~/.termlink/termlink.log, filtered by TERMLINK_LOG
fn init_logging() {
    let log_path = config::data_dir()
        .map(|dir| dir.join("termlink.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("termlink.log"));

    // Create log directory if needed
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = match parse_args(env::args().skip(1)) {
        Ok(Some(cli)) => cli,
        Ok(None) => return Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("termlink {} starting...", VERSION);

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using defaults", e);
            eprintln!("Warning: {}; using defaults", e);
            Config::default()
        }
    };
    let init_config = cli.init_config;
    cli.apply(&mut config);

    if init_config {
        let path = config.save()?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    run_terminal(config)
}

fn open_channel(config: &Config) -> anyhow::Result<Arc<dyn RemoteChannel>> {
    let connection = &config.connection;
    let channel: Arc<dyn RemoteChannel> = match &connection.exec {
        Some(command) => Arc::new(ProcessChannel::spawn(command)?),
        None => Arc::new(TcpChannel::connect(
            &connection.host,
            connection.port,
            CONNECT_TIMEOUT,
        )?),
    };
    Ok(channel)
}

fn run_terminal(config: Config) -> anyhow::Result<()> {
    let options = config.session_options()?;
    if options.credential.is_none() && options.guard.is_enabled() {
        warn!("No credential configured; destructive commands will always be refused");
    }

    let channel = open_channel(&config).context("Failed to open connection")?;
    let mut session = Session::start(channel, options).context("Failed to start session")?;

    let title = match &config.connection.exec {
        Some(command) => format!("{}@local ({})", config.connection.user, command),
        None => format!(
            "{}@{}:{}",
            config.connection.user, config.connection.host, config.connection.port
        ),
    };
    info!("Session target: {}", title);

    let theme = config.theme();
    let mut renderer = Renderer::new(theme.clone());
    renderer.init()?;
    let mut prompter = TerminalPrompter::new(theme);

    // Set window title
    print!("\x1b]0;termlink - {}\x07", title);
    let _ = std::io::stdout().flush();

    if let Some(command) = &config.connection.command {
        session.send_command(command, &mut prompter);
    }

    let result = run_main_loop(&mut session, &mut renderer, &mut prompter, &title);
    if let Err(e) = &result {
        error!("Main loop failed: {}", e);
    }

    session.shutdown();
    let _ = renderer.cleanup();
    result
}

fn status_line(session: &Session, title: &str) -> (String, bool) {
    match session.status() {
        SessionStatus::Connected => (format!(" {} | connected | Ctrl+Q quit", title), false),
        SessionStatus::Disconnected(None) => {
            (format!(" {} | disconnected | Ctrl+Q quit", title), true)
        }
        SessionStatus::Disconnected(Some(reason)) => (
            format!(" {} | disconnected: {} | Ctrl+Q quit", title, reason),
            true,
        ),
    }
}

fn run_main_loop(
    session: &mut Session,
    renderer: &mut Renderer,
    prompter: &mut TerminalPrompter,
    title: &str,
) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);
    let mut needs_render = true;

    loop {
        needs_render |= session.process_events();
        needs_render |= session.flush_edits(renderer);

        if needs_render {
            let (status, alert) = status_line(session, title);
            let highlight = session.cursor_highlight();
            renderer.render(&session.state, highlight.as_ref(), &status, alert)?;
            needs_render = false;
        }

        if !event::poll(poll_timeout)? {
            continue;
        }

        match event::read()? {
            Event::Key(key) => match KeyMapper::classify(&key) {
                Some(KeyAction::Quit) => {
                    info!("Quit requested");
                    break;
                }
                Some(KeyAction::ScrollUp) => {
                    renderer.scroll_up(SCROLL_STEP, session.state.line_count())
                }
                Some(KeyAction::ScrollDown) => renderer.scroll_down(SCROLL_STEP),
                Some(KeyAction::Send(input)) => {
                    renderer.scroll_to_bottom();
                    session.handle_key(input, prompter);
                }
                None => continue,
            },
            Event::Paste(text) => {
                renderer.scroll_to_bottom();
                for ch in text.replace("\r\n", "\n").chars() {
                    let input = match ch {
                        '\r' | '\n' => KeyInput::Enter,
                        ch => KeyInput::Char(ch),
                    };
                    session.handle_key(input, prompter);
                }
            }
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::Down(MouseButton::Left) => {
                    if let Some((row, col)) =
                        renderer.buffer_position(&session.state, mouse.column, mouse.row)
                    {
                        session.click(row, col);
                    }
                }
                MouseEventKind::ScrollUp => {
                    renderer.scroll_up(WHEEL_STEP, session.state.line_count())
                }
                MouseEventKind::ScrollDown => renderer.scroll_down(WHEEL_STEP),
                _ => continue,
            },
            Event::Resize(cols, rows) => renderer.resize(cols, rows),
            _ => continue,
        }
        needs_render = true;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<CliArgs>, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let cli = parse(&["--host", "10.0.0.7", "-p", "2222", "-u", "admin", "-c", "uptime"])
            .unwrap()
            .unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(cli.port, Some(2222));
        assert_eq!(cli.user.as_deref(), Some("admin"));
        assert_eq!(cli.command.as_deref(), Some("uptime"));

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.connection.host, "10.0.0.7");
        assert_eq!(config.connection.port, 2222);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse(&["-p", "0"]).is_err());
        assert!(parse(&["-p", "http"]).is_err());
        assert!(parse(&["--host"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn test_empty_args() {
        assert_eq!(parse(&[]).unwrap(), Some(CliArgs::default()));
    }
}
