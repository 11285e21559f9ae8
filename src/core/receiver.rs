//! Receiver loop
//!
//! Pulls bytes off a remote channel on a background thread and posts
//! decoded text to the session's event queue in arrival order. The thread
//! never touches terminal state.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use super::channel::RemoteChannel;
use super::session::SessionEvent;
use super::term::parser::MAX_CSI_LEN;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_READ_CHUNK: usize = 1024;

#[derive(Clone, Copy, Debug)]
pub struct ReceiverConfig {
    /// Sleep between readiness checks while the channel is idle
    pub poll_interval: Duration,
    /// Maximum bytes per read
    pub read_chunk: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Incremental UTF-8 decoder.
///
/// An incomplete multi-byte tail is held for the next chunk; invalid
/// sequences are dropped.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    partial: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.partial);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(invalid) => rest = &tail[invalid..],
                        None => {
                            self.partial = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Whether bytes are held waiting for the rest of a character
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

/// Holds back an escape sequence cut off at the end of a chunk so the
/// interpreter always sees it whole.
#[derive(Debug, Default)]
pub struct SequenceAssembler {
    held: String,
}

impl SequenceAssembler {
    pub fn assemble(&mut self, text: &str) -> String {
        let mut joined = std::mem::take(&mut self.held);
        joined.push_str(text);
        if let Some(start) = Self::incomplete_tail(&joined) {
            self.held = joined.split_off(start);
        }
        joined
    }

    /// Release whatever is held, complete or not
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.held)
    }

    /// Byte offset of a trailing unterminated ESC or CSI
    fn incomplete_tail(text: &str) -> Option<usize> {
        let start = text.rfind('\x1b')?;
        let body = &text[start + 1..];
        let mut chars = body.chars();
        match chars.next() {
            None => Some(start),
            Some('[') => {
                if body.len() > MAX_CSI_LEN + 1 {
                    // Too long to be worth holding; the interpreter drops it
                    return None;
                }
                let terminated = chars.any(|c| ('\x40'..='\x7e').contains(&c));
                (!terminated).then_some(start)
            }
            Some(_) => None,
        }
    }
}

/// Start the receiver thread
pub fn spawn_receiver(
    channel: Arc<dyn RemoteChannel>,
    running: Arc<AtomicBool>,
    events: Sender<SessionEvent>,
    config: ReceiverConfig,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("receiver".to_string())
        .spawn(move || receive_loop(channel.as_ref(), &running, &events, config))
}

enum Exit {
    Shutdown,
    Closed,
    Failed(String),
    Abandoned,
}

fn receive_loop(
    channel: &dyn RemoteChannel,
    running: &AtomicBool,
    events: &Sender<SessionEvent>,
    config: ReceiverConfig,
) {
    let mut buffer = vec![0u8; config.read_chunk.max(1)];
    let mut decoder = Utf8Decoder::default();
    let mut assembler = SequenceAssembler::default();

    let exit = loop {
        if !running.load(Ordering::SeqCst) {
            break Exit::Shutdown;
        }

        match channel.is_ready() {
            Ok(false) => {
                thread::sleep(config.poll_interval);
                continue;
            }
            Ok(true) => {}
            Err(e) => break Exit::Failed(e.to_string()),
        }

        match channel.recv(&mut buffer) {
            Ok(0) => break Exit::Closed,
            Ok(n) => {
                debug!("Received {} bytes", n);
                let text = assembler.assemble(&decoder.decode(&buffer[..n]));
                if !text.is_empty() && events.send(SessionEvent::Output(text)).is_err() {
                    break Exit::Abandoned;
                }
            }
            Err(e) => break Exit::Failed(e.to_string()),
        }
    };

    let reason = match exit {
        Exit::Shutdown | Exit::Abandoned => {
            debug!("Receiver stopped");
            return;
        }
        Exit::Closed => {
            info!("Remote closed the connection");
            None
        }
        Exit::Failed(reason) => {
            error!("Channel read failed: {}", reason);
            Some(reason)
        }
    };

    if decoder.has_partial() {
        debug!("Dropping incomplete UTF-8 tail at end of stream");
    }
    let rest = assembler.flush();
    if !rest.is_empty() {
        let _ = events.send(SessionEvent::Output(rest));
    }
    running.store(false, Ordering::SeqCst);
    let _ = events.send(SessionEvent::Disconnected(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::testing::ScriptedChannel;
    use std::sync::mpsc::{self, Receiver};

    fn collect_until_disconnect(rx: &Receiver<SessionEvent>) -> (Vec<String>, Option<String>) {
        let mut outputs = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                SessionEvent::Output(text) => outputs.push(text),
                SessionEvent::Disconnected(reason) => return (outputs, reason),
                SessionEvent::BlinkTick => {}
            }
        }
    }

    fn start(channel: Arc<ScriptedChannel>) -> (Arc<AtomicBool>, Receiver<SessionEvent>, JoinHandle<()>) {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let config = ReceiverConfig {
            poll_interval: Duration::from_millis(1),
            read_chunk: 1024,
        };
        let handle = spawn_receiver(channel, running.clone(), tx, config).unwrap();
        (running, rx, handle)
    }

    #[test]
    fn test_decoder_holds_split_character() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "a中b".as_bytes();
        assert_eq!(decoder.decode(&bytes[..2]), "a");
        assert!(decoder.has_partial());
        assert_eq!(decoder.decode(&bytes[2..]), "中b");
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_decoder_drops_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"ok\xffgo\xc3("), "okgo(");
    }

    #[test]
    fn test_assembler_holds_partial_sequences() {
        let mut assembler = SequenceAssembler::default();
        assert_eq!(assembler.assemble("abc\x1b"), "abc");
        assert_eq!(assembler.assemble("[3"), "");
        assert_eq!(assembler.assemble("1mX"), "\x1b[31mX");
        assert_eq!(assembler.assemble("\x1b[2Jdone"), "\x1b[2Jdone");
        assert_eq!(assembler.assemble("\x1bc"), "\x1bc");
        assert_eq!(assembler.flush(), "");
    }

    #[test]
    fn test_assembler_releases_overlong_csi() {
        let mut assembler = SequenceAssembler::default();
        let overlong = format!("\x1b[{}", "1;".repeat(MAX_CSI_LEN));
        assert_eq!(assembler.assemble(&overlong), overlong);
    }

    #[test]
    fn test_chunks_delivered_in_order() {
        let chunks: [&[u8]; 5] = [b"AB", b"\x1b[", b"31mC", b"\xe4\xb8", b"\xad"];
        let channel = Arc::new(ScriptedChannel::new(chunks));
        let (running, rx, handle) = start(channel);

        let (outputs, reason) = collect_until_disconnect(&rx);
        handle.join().unwrap();

        assert_eq!(outputs, vec!["AB", "\x1b[31mC", "中"]);
        assert_eq!(reason, None);
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_held_sequence_flushed_on_close() {
        let channel = Arc::new(ScriptedChannel::new(["x\x1b[1"]));
        let (_running, rx, handle) = start(channel);

        let (outputs, _) = collect_until_disconnect(&rx);
        handle.join().unwrap();
        assert_eq!(outputs, vec!["x", "\x1b[1"]);
    }

    #[test]
    fn test_read_failure_reports_reason() {
        let channel = Arc::new(ScriptedChannel::open());
        channel.fail_reads();
        let (_running, rx, handle) = start(channel);

        let (outputs, reason) = collect_until_disconnect(&rx);
        handle.join().unwrap();
        assert!(outputs.is_empty());
        assert!(reason.unwrap().contains("connection reset"));
    }

    #[test]
    fn test_stops_when_running_cleared() {
        let channel = Arc::new(ScriptedChannel::open());
        let (running, rx, handle) = start(channel.clone());

        channel.push("late");
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, SessionEvent::Output(ref text) if text == "late"));

        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(rx.try_recv().is_err());
    }
}
