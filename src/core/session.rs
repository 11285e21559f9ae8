//! Session management
//!
//! A session ties one remote channel to one terminal state. The receiver
//! and the blink timer run on their own threads and only post events; the
//! thread draining those events is the only one that touches the screen.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info};

use super::bridge::{InputBridge, KeyInput, NewlineMode, Submission};
use super::channel::{ChannelError, RemoteChannel};
use super::cursor::{BlinkTimer, CursorController, Highlight, DEFAULT_BLINK_INTERVAL};
use super::display::{self, DisplayAdapter};
use super::guard::{CommandGuard, Credential, Prompter};
use super::receiver::{self, ReceiverConfig};
use super::term::{TerminalState, VtParser};

/// Events posted to the session from background threads
#[derive(Debug)]
pub enum SessionEvent {
    /// Decoded text from the remote side
    Output(String),
    /// Remote closed the stream, or the transport failed with a reason
    Disconnected(Option<String>),
    /// Cursor blink period elapsed
    BlinkTick,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    Disconnected(Option<String>),
}

/// Session tuning
pub struct SessionOptions {
    pub blink_interval: Duration,
    pub receiver: ReceiverConfig,
    pub newline: NewlineMode,
    pub guard: CommandGuard,
    pub credential: Option<Credential>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            blink_interval: DEFAULT_BLINK_INTERVAL,
            receiver: ReceiverConfig::default(),
            newline: NewlineMode::default(),
            guard: CommandGuard::default(),
            credential: None,
        }
    }
}

/// A live connection to a remote shell
pub struct Session {
    /// Terminal state
    pub state: TerminalState,
    /// VT parser
    parser: VtParser,
    cursor: CursorController,
    bridge: InputBridge,
    channel: Arc<dyn RemoteChannel>,
    /// Running flag shared with the receiver
    running: Arc<AtomicBool>,
    events_rx: Receiver<SessionEvent>,
    reader_thread: Option<JoinHandle<()>>,
    status: SessionStatus,
    closed: bool,
}

impl Session {
    /// Start the receiver and blink timer on an open channel
    pub fn start(channel: Arc<dyn RemoteChannel>, options: SessionOptions) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let timer = BlinkTimer::start(options.blink_interval, tx.clone())?;

        let running = Arc::new(AtomicBool::new(true));
        let reader_thread =
            receiver::spawn_receiver(channel.clone(), running.clone(), tx, options.receiver)?;

        info!("Session started");
        Ok(Self {
            state: TerminalState::new(),
            parser: VtParser::new(),
            cursor: CursorController::new(Some(timer)),
            bridge: InputBridge::new(options.guard, options.credential, options.newline),
            channel,
            running,
            events_rx: rx,
            reader_thread: Some(reader_thread),
            status: SessionStatus::Connected,
            closed: false,
        })
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    /// The line typed since the last submission
    #[cfg(test)]
    pub fn input_line(&self) -> &str {
        self.bridge.line()
    }

    #[cfg(test)]
    pub fn cursor_visible(&self) -> bool {
        self.cursor.is_visible()
    }

    pub fn cursor_highlight(&self) -> Option<Highlight> {
        self.cursor.highlight(&self.state)
    }

    /// Apply every queued event. Returns true if anything visible changed.
    pub fn process_events(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.events_rx.try_recv() {
                Ok(SessionEvent::Output(text)) => {
                    let summary = self.parser.write(&text, &mut self.state);
                    if summary.ignored > 0 {
                        debug!("Ignored {} sequences", summary.ignored);
                    }
                    self.cursor.poke();
                    changed = true;
                }
                Ok(SessionEvent::BlinkTick) => {
                    self.cursor.on_tick();
                    changed = true;
                }
                Ok(SessionEvent::Disconnected(reason)) => {
                    self.mark_disconnected(reason);
                    changed = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        changed
    }

    /// Hand pending screen edits to a display. Returns true if there were any.
    pub fn flush_edits(&mut self, adapter: &mut dyn DisplayAdapter) -> bool {
        let edits = self.state.take_edits();
        let any = !edits.is_empty();
        display::replay(edits, adapter);
        any
    }

    /// Route a keystroke through the bridge
    pub fn handle_key(&mut self, key: KeyInput, prompter: &mut dyn Prompter) -> Option<Submission> {
        self.cursor.poke();
        if !self.is_connected() {
            return None;
        }
        let result = self.bridge.handle_key(key, self.channel.as_ref(), prompter);
        self.check_send(result).flatten()
    }

    /// Submit a full command line as if typed
    pub fn send_command(&mut self, command: &str, prompter: &mut dyn Prompter) -> Option<Submission> {
        if !self.is_connected() {
            return None;
        }
        info!("Sending command: {:?}", command);
        let result = self.bridge.send_line(command, self.channel.as_ref(), prompter);
        self.check_send(result)
    }

    /// Move the remote cursor toward a clicked cell on the cursor row
    pub fn click(&mut self, row: usize, col: usize) {
        self.cursor.poke();
        if !self.is_connected() {
            return;
        }
        if let Some(keys) = InputBridge::click_motion(&self.state, row, col) {
            let result = self.channel.send(&keys);
            self.check_send(result);
        }
    }

    fn check_send<T>(&mut self, result: Result<T, ChannelError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Failed to write to channel: {}", e);
                self.mark_disconnected(Some(e.to_string()));
                None
            }
        }
    }

    fn mark_disconnected(&mut self, reason: Option<String>) {
        if self.is_connected() {
            match &reason {
                Some(reason) => info!("Session disconnected: {}", reason),
                None => info!("Session disconnected"),
            }
            self.status = SessionStatus::Disconnected(reason);
        }
    }

    /// Stop the timer, then the receiver, then close the channel
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.cursor.cancel();
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        self.channel.close();
        info!("Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
