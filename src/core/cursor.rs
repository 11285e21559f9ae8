//! Cursor visual controller
//!
//! The cursor cell is highlighted and blinks on a repeating timer. Any
//! activity forces it visible and restarts the period.

use std::io;
use std::ops::Range;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use super::session::SessionEvent;
use super::term::TerminalState;

pub const DEFAULT_BLINK_INTERVAL: Duration = Duration::from_millis(500);

enum TimerControl {
    Restart,
    Cancel,
}

/// Repeating timer posting [`SessionEvent::BlinkTick`]
pub struct BlinkTimer {
    control_tx: Sender<TimerControl>,
    thread: Option<JoinHandle<()>>,
}

impl BlinkTimer {
    pub fn start(period: Duration, events: Sender<SessionEvent>) -> io::Result<Self> {
        let (control_tx, control_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("cursor-blink".to_string())
            .spawn(move || loop {
                match control_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if events.send(SessionEvent::BlinkTick).is_err() {
                            break;
                        }
                    }
                    Ok(TimerControl::Restart) => {}
                    Ok(TimerControl::Cancel) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            control_tx,
            thread: Some(thread),
        })
    }

    /// Begin a fresh period from now
    pub fn restart(&self) {
        let _ = self.control_tx.send(TimerControl::Restart);
    }

    /// Stop the timer and wait for its thread
    pub fn cancel(&mut self) {
        let _ = self.control_tx.send(TimerControl::Cancel);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            debug!("Blink timer cancelled");
        }
    }
}

impl Drop for BlinkTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Cell range to draw highlighted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Highlight {
    /// 1-based row
    pub row: usize,
    pub cols: Range<usize>,
}

pub struct CursorController {
    visible: bool,
    timer: Option<BlinkTimer>,
}

impl CursorController {
    pub fn new(timer: Option<BlinkTimer>) -> Self {
        Self {
            visible: true,
            timer,
        }
    }

    #[cfg(test)]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Toggle on a timer tick. Ticks still queued after cancel are ignored.
    pub fn on_tick(&mut self) {
        if self.timer.is_some() {
            self.visible = !self.visible;
        }
    }

    /// Activity: show the cursor and restart the blink period
    pub fn poke(&mut self) {
        self.visible = true;
        if let Some(timer) = &self.timer {
            timer.restart();
        }
    }

    /// The highlighted cell, if the cursor is currently shown
    pub fn highlight(&self, state: &TerminalState) -> Option<Highlight> {
        self.visible.then(|| {
            let cursor = state.cursor();
            Highlight {
                row: cursor.row,
                cols: cursor.col..cursor.col + 1,
            }
        })
    }

    pub fn cancel(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        self.visible = true;
    }
}
