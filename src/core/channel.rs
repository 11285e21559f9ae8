//! Remote channel abstraction
//!
//! A byte-oriented duplex stream to a remote shell. A channel is shared
//! between the receiver thread and the thread applying keystrokes, so every
//! method takes `&self`.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

/// How long a readiness probe may wait on a TCP socket
const READY_PROBE: Duration = Duration::from_millis(1);

/// Read size for local process pipes
const PIPE_CHUNK: usize = 4096;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from channel: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to channel: {0}")]
    Write(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Duplex byte stream to a remote shell.
///
/// `recv` returning `Ok(0)` signals that the remote side closed the stream.
/// Transport failures surface as errors and never touch terminal state.
pub trait RemoteChannel: Send + Sync {
    /// Whether `recv` would return without waiting
    fn is_ready(&self) -> Result<bool>;

    /// Receive up to `buf.len()` bytes
    fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Send all of `data`
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Close the stream; further sends fail
    fn close(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Raw TCP connection to a shell service
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let connect_err = |source| ChannelError::Connect {
            addr: addr.clone(),
            source,
        };

        let resolved = addr
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| connect_err(io::Error::new(ErrorKind::NotFound, "no address resolved")))?;

        let stream = TcpStream::connect_timeout(&resolved, timeout).map_err(connect_err)?;
        stream.set_read_timeout(Some(READY_PROBE)).map_err(connect_err)?;
        let _ = stream.set_nodelay(true);

        info!("Connected to {}", addr);
        Ok(Self { stream })
    }
}

impl RemoteChannel for TcpChannel {
    fn is_ready(&self) -> Result<bool> {
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            // Zero bytes means orderly shutdown, which recv reports
            Ok(_) => Ok(true),
            Err(e) if matches!(
                e.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ) =>
            {
                Ok(false)
            }
            Err(e) => Err(ChannelError::Read(e)),
        }
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match (&self.stream).read(buf) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => return other.map_err(ChannelError::Read),
            }
        }
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        let mut stream = &self.stream;
        stream.write_all(data).map_err(ChannelError::Write)?;
        stream.flush().map_err(ChannelError::Write)
    }

    fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Local command with piped stdio, standing in for a remote shell
pub struct ProcessChannel {
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    output_rx: Mutex<Receiver<Vec<u8>>>,
    pending: Mutex<VecDeque<u8>>,
}

impl ProcessChannel {
    /// Spawn a whitespace-separated command line
    pub fn spawn(command_line: &str) -> Result<Self> {
        let spawn_err = |source| ChannelError::Spawn {
            command: command_line.to_string(),
            source,
        };

        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| spawn_err(io::Error::new(ErrorKind::InvalidInput, "empty command")))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // Both pipes feed one queue; it disconnects once both reach EOF
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        if let Some(stdout) = child.stdout.take() {
            Self::spawn_reader("stdout", stdout, tx.clone()).map_err(spawn_err)?;
        }
        if let Some(stderr) = child.stderr.take() {
            Self::spawn_reader("stderr", stderr, tx).map_err(spawn_err)?;
        }

        info!("Spawned {:?} (pid {})", command_line, child.id());
        Ok(Self {
            stdin: Mutex::new(child.stdin.take()),
            child: Mutex::new(child),
            output_rx: Mutex::new(rx),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    fn spawn_reader<R: Read + Send + 'static>(
        name: &str,
        mut pipe: R,
        tx: Sender<Vec<u8>>,
    ) -> io::Result<()> {
        thread::Builder::new()
            .name(format!("pipe-{}", name))
            .spawn(move || {
                let mut buffer = vec![0u8; PIPE_CHUNK];
                loop {
                    match pipe.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buffer[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!("Pipe read failed: {}", e);
                            break;
                        }
                    }
                }
            })?;
        Ok(())
    }

    /// Move queued output into `pending`. Returns false once the pipes are
    /// drained and closed.
    fn pull(&self, pending: &mut VecDeque<u8>, block: bool) -> bool {
        let rx = lock(&self.output_rx);
        let next = if block {
            rx.recv().map_err(|_| TryRecvError::Disconnected)
        } else {
            rx.try_recv()
        };
        match next {
            Ok(chunk) => {
                pending.extend(chunk);
                true
            }
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => false,
        }
    }
}

impl RemoteChannel for ProcessChannel {
    fn is_ready(&self) -> Result<bool> {
        let mut pending = lock(&self.pending);
        if !pending.is_empty() {
            return Ok(true);
        }
        let open = self.pull(&mut pending, false);
        Ok(!pending.is_empty() || !open)
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut pending = lock(&self.pending);
        if pending.is_empty() && !self.pull(&mut pending, true) {
            return Ok(0);
        }
        let n = buf.len().min(pending.len());
        for (slot, byte) in buf.iter_mut().zip(pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        let mut stdin = lock(&self.stdin);
        let pipe = stdin.as_mut().ok_or(ChannelError::Closed)?;
        pipe.write_all(data).map_err(ChannelError::Write)?;
        pipe.flush().map_err(ChannelError::Write)
    }

    fn close(&self) {
        lock(&self.stdin).take();
        let mut child = lock(&self.child);
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// In-memory channels for tests
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Channel that replays scripted chunks and records what was sent
    #[derive(Default)]
    pub struct ScriptedChannel {
        chunks: Mutex<VecDeque<Vec<u8>>>,
        sent: Mutex<Vec<u8>>,
        open: AtomicBool,
        closed: AtomicBool,
        fail_reads: AtomicBool,
        fail_sends: AtomicBool,
    }

    impl ScriptedChannel {
        /// Replays `chunks`, then reports remote closure
        pub fn new<I, C>(chunks: I) -> Self
        where
            I: IntoIterator<Item = C>,
            C: AsRef<[u8]>,
        {
            let channel = Self::default();
            for chunk in chunks {
                channel.push(chunk);
            }
            channel
        }

        /// Stays open with no data
        pub fn open() -> Self {
            let channel = Self::default();
            channel.open.store(true, Ordering::SeqCst);
            channel
        }

        pub fn push(&self, chunk: impl AsRef<[u8]>) {
            lock(&self.chunks).push_back(chunk.as_ref().to_vec());
        }

        pub fn fail_reads(&self) {
            self.fail_reads.store(true, Ordering::SeqCst);
        }

        pub fn fail_sends(&self) {
            self.fail_sends.store(true, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<u8> {
            lock(&self.sent).clone()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl RemoteChannel for ScriptedChannel {
        fn is_ready(&self) -> Result<bool> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(ChannelError::Read(io::Error::new(
                    ErrorKind::ConnectionReset,
                    "connection reset",
                )));
            }
            Ok(!lock(&self.chunks).is_empty() || !self.open.load(Ordering::SeqCst))
        }

        fn recv(&self, buf: &mut [u8]) -> Result<usize> {
            let mut chunks = lock(&self.chunks);
            let Some(mut chunk) = chunks.pop_front() else {
                return Ok(0);
            };
            if chunk.len() > buf.len() {
                let rest = chunk.split_off(buf.len());
                chunks.push_front(rest);
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }

        fn send(&self, data: &[u8]) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ChannelError::Closed);
            }
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(ChannelError::Write(io::Error::new(
                    ErrorKind::BrokenPipe,
                    "broken pipe",
                )));
            }
            lock(&self.sent).extend_from_slice(data);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}
