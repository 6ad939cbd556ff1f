//! The command channel: framed send/receive over a serial REPL.
//!
//! A [`Channel`] owns one transport for its whole life and turns the
//! free-form interpreter session into a request/response mechanism: write
//! an expression, let the device settle, drain its output until a quiet
//! gap, and hand the framed lines back. Two receive strategies are
//! supported, fixed at connect time:
//!
//! - **Polling**: everything happens on the caller's thread; `send`
//!   triggers an immediate drain and `receive` collects the lines.
//! - **Streaming**: a background worker owns all reads and pushes each
//!   line to the dispatcher as an event; direct polling is disabled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use replink_protocol::{Command, LineFramer, DEFAULT_MAX_BUFFER};

use crate::dispatcher::{ChannelEvent, Dispatcher};
use crate::error::{ChannelError, ChannelResult};
use crate::streaming::{ReaderShared, ReaderWorker};
use crate::transport::{SerialTransport, Transport, TransportConfig};

/// Interrupt sequence sent on connect and disconnect: Ctrl-C twice, which
/// aborts whatever program the interpreter is currently running.
pub const INTERRUPT_SEQUENCE: [u8; 2] = [0x03, 0x03];

/// Read size per drain attempt.
const READ_CHUNK: usize = 1024;

/// Receive strategy, selected at connect time and fixed for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Synchronous caller-thread receive.
    Polling,
    /// Background reader thread with event dispatch.
    Streaming,
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Serial line parameters.
    pub transport: TransportConfig,
    /// Settle delay after each command, letting the device finish side
    /// effects before its output is inspected.
    pub command_wait: Duration,
    /// Default bound on a receive drain.
    pub receive_deadline: Duration,
    /// Cap on buffered unframed bytes.
    pub max_buffer: usize,
    /// Bound on waiting for the streaming worker at disconnect.
    pub join_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            transport: TransportConfig::default(),
            command_wait: Duration::from_millis(50),
            receive_deadline: Duration::from_secs(5),
            max_buffer: DEFAULT_MAX_BUFFER,
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// A command channel bound to one serial transport.
pub struct Channel {
    config: ChannelConfig,
    state: ConnectionState,
    mode: ReceiveMode,
    transport: Option<Arc<Mutex<Box<dyn Transport>>>>,
    framer: Arc<Mutex<LineFramer>>,
    dispatcher: Arc<Dispatcher>,
    worker: Option<ReaderWorker>,
    /// Completed lines awaiting collection (polling mode).
    pending: VecDeque<String>,
    bytes_sent: u64,
    lines_received: Arc<AtomicU64>,
    overflow_warned: bool,
}

impl Channel {
    /// Create a disconnected channel.
    pub fn new(config: ChannelConfig) -> Self {
        let max_buffer = config.max_buffer;
        Channel {
            config,
            state: ConnectionState::Disconnected,
            mode: ReceiveMode::Polling,
            transport: None,
            framer: Arc::new(Mutex::new(LineFramer::with_max_buffer(max_buffer))),
            dispatcher: Arc::new(Dispatcher::new()),
            worker: None,
            pending: VecDeque::new(),
            bytes_sent: 0,
            lines_received: Arc::new(AtomicU64::new(0)),
            overflow_warned: false,
        }
    }

    /// The dispatcher observers register with.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Whether the channel is currently connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The receive mode selected at connect time.
    pub fn mode(&self) -> ReceiveMode {
        self.mode
    }

    /// Total bytes written since creation.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total completed lines framed since creation.
    pub fn lines_received(&self) -> u64 {
        self.lines_received.load(Ordering::Relaxed)
    }

    /// Open the named serial port and connect.
    pub fn connect(&mut self, port: &str, mode: ReceiveMode) -> ChannelResult<()> {
        info!(
            "connecting to {} at {} baud",
            port, self.config.transport.baud
        );
        let transport = SerialTransport::open(port, &self.config.transport)?;
        self.connect_with(Box::new(transport), mode)
    }

    /// Connect over an already-open transport.
    ///
    /// Issues the interrupt sequence to abort any running remote program
    /// and discards whatever the device emits in response.
    pub fn connect_with(
        &mut self,
        transport: Box<dyn Transport>,
        mode: ReceiveMode,
    ) -> ChannelResult<()> {
        self.state = ConnectionState::Connecting;
        self.mode = mode;
        let transport = Arc::new(Mutex::new(transport));

        // Abort anything running, then throw away the device's chatter.
        let interrupt = transport.lock().write_all(&INTERRUPT_SEQUENCE);
        let setup = match interrupt {
            Ok(()) => {
                self.transport = Some(Arc::clone(&transport));
                self.drain_until_quiet(self.config.receive_deadline)
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = setup {
            self.state = ConnectionState::Disconnected;
            self.transport = None;
            return Err(e);
        }
        self.pending.clear();
        self.framer.lock().clear();

        self.state = ConnectionState::Connected;
        self.dispatcher.emit(&ChannelEvent::Connected);
        debug!("connected in {:?} mode", mode);

        if mode == ReceiveMode::Streaming {
            self.worker = Some(ReaderWorker::spawn(ReaderShared {
                transport,
                framer: Arc::clone(&self.framer),
                dispatcher: Arc::clone(&self.dispatcher),
                lines_received: Arc::clone(&self.lines_received),
            }));
        }
        Ok(())
    }

    /// Send a command with the default settle delay.
    pub fn send(&mut self, command: &Command) -> ChannelResult<()> {
        self.send_with_settle(command, self.config.command_wait)
    }

    /// Send a command, then sleep `settle` before draining.
    ///
    /// In polling mode the drain happens here, so the reply is waiting in
    /// the channel afterwards; in streaming mode the worker is already
    /// reading and this call only writes.
    pub fn send_with_settle(&mut self, command: &Command, settle: Duration) -> ChannelResult<()> {
        if self.state != ConnectionState::Connected {
            return Err(ChannelError::NotConnected);
        }
        let transport =
            Arc::clone(self.transport.as_ref().ok_or(ChannelError::NotConnected)?);

        let encoded = command.encode();
        transport.lock().write_all(&encoded)?;
        self.bytes_sent += encoded.len() as u64;
        debug!("sent {:?}", command.to_expr());

        std::thread::sleep(settle);

        if self.mode == ReceiveMode::Polling {
            self.drain_until_quiet(self.config.receive_deadline)?;
        }
        Ok(())
    }

    /// Collect the lines completed since the last collection (polling mode).
    ///
    /// Attempts bounded reads until `deadline` elapses or the transport
    /// goes quiet after having produced data. Partial trailing content
    /// stays buffered.
    pub fn receive(&mut self, deadline: Duration) -> ChannelResult<Vec<String>> {
        if self.state != ConnectionState::Connected {
            return Err(ChannelError::NotConnected);
        }
        if self.mode == ReceiveMode::Streaming {
            return Err(ChannelError::WrongMode);
        }
        self.drain_until_quiet(deadline)?;
        Ok(self.drain_pending())
    }

    /// Send a command and return the reply batch (polling mode).
    pub fn exchange(&mut self, command: &Command, settle: Duration) -> ChannelResult<Vec<String>> {
        if self.state == ConnectionState::Connected && self.mode == ReceiveMode::Streaming {
            return Err(ChannelError::WrongMode);
        }
        self.send_with_settle(command, settle)?;
        Ok(self.drain_pending())
    }

    /// Take every line currently waiting, without touching the transport.
    pub fn drain_pending(&mut self) -> Vec<String> {
        self.pending.drain(..).collect()
    }

    /// Tear the channel down. Never fails: teardown problems are logged.
    ///
    /// Sends the interrupt sequence, flushes the framer (surfacing any
    /// trailing partial line), stops the streaming worker within the join
    /// bound, and releases the transport.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.lock().write_all(&INTERRUPT_SEQUENCE) {
                warn!("interrupt on disconnect failed: {}", e);
            }
        }

        if let Some(worker) = self.worker.take() {
            worker.stop_and_join(self.config.join_timeout);
        }

        // Final flush: complete lines first, then the trailing partial.
        if self.mode == ReceiveMode::Polling {
            if let Err(e) = self.drain_until_quiet(self.config.receive_deadline) {
                warn!("final drain on disconnect failed: {}", e);
            }
        }
        let mut flushed = {
            let mut framer = self.framer.lock();
            let mut lines = framer.drain_lines();
            if let Some(partial) = framer.flush_partial() {
                lines.push(partial);
            }
            lines
        };
        for line in flushed.drain(..) {
            self.lines_received.fetch_add(1, Ordering::Relaxed);
            match self.mode {
                ReceiveMode::Polling => self.pending.push_back(line),
                ReceiveMode::Streaming => self.dispatcher.emit(&ChannelEvent::Line(line)),
            }
        }

        self.transport = None;
        self.state = ConnectionState::Disconnected;
        self.dispatcher.emit(&ChannelEvent::Disconnected);
        info!("disconnected");
    }

    /// Drain available input into the framer until the deadline or a quiet
    /// gap after data, then queue the completed lines.
    fn drain_until_quiet(&mut self, deadline: Duration) -> ChannelResult<()> {
        let transport = self.transport.as_ref().ok_or(ChannelError::NotConnected)?;
        let start = Instant::now();
        let mut saw_data = false;
        let mut buf = [0u8; READ_CHUNK];

        while start.elapsed() < deadline {
            let n = transport.lock().read_up_to(&mut buf)?;
            if n == 0 {
                if saw_data {
                    break;
                }
                continue;
            }
            saw_data = true;
            self.framer.lock().push(&buf[..n]);
        }

        let (lines, truncated) = {
            let mut framer = self.framer.lock();
            (framer.drain_lines(), framer.truncated_bytes())
        };
        if truncated > 0 && !self.overflow_warned {
            self.overflow_warned = true;
            warn!("receive buffer overflowed; oldest {} bytes dropped", truncated);
        }
        for line in lines {
            self.lines_received.fetch_add(1, Ordering::Relaxed);
            self.pending.push_back(line);
        }
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::collections::VecDeque;

    /// In-memory transport double: replies are scripted per write.
    struct ScriptedTransport {
        /// Bytes queued for the channel to read.
        to_read: VecDeque<Vec<u8>>,
        /// Everything the channel wrote.
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        /// Reply queued whenever a write arrives.
        reply_per_write: Option<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            (
                ScriptedTransport {
                    to_read: VecDeque::new(),
                    written: Arc::clone(&written),
                    reply_per_write: None,
                },
                written,
            )
        }

        fn with_reply(reply: &[u8]) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let (mut t, written) = Self::new();
            t.reply_per_write = Some(reply.to_vec());
            (t, written)
        }
    }

    impl Transport for ScriptedTransport {
        fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            match self.to_read.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.to_read.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.written.lock().push(data.to_vec());
            if let Some(reply) = &self.reply_per_write {
                self.to_read.push_back(reply.clone());
            }
            Ok(())
        }
    }

    fn test_config() -> ChannelConfig {
        ChannelConfig {
            command_wait: Duration::from_millis(0),
            receive_deadline: Duration::from_millis(20),
            join_timeout: Duration::from_millis(500),
            ..ChannelConfig::default()
        }
    }

    #[test]
    fn test_send_requires_connection() {
        let mut channel = Channel::new(test_config());
        let result = channel.send(&Command::WifiScan);
        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    #[test]
    fn test_connect_sends_interrupt_and_discards_chatter() {
        let (mut transport, written) = ScriptedTransport::new();
        transport.to_read.push_back(b"boot noise\r\n>>> \r\n".to_vec());

        let mut channel = Channel::new(test_config());
        channel
            .connect_with(Box::new(transport), ReceiveMode::Polling)
            .unwrap();

        assert!(channel.is_connected());
        assert_eq!(written.lock()[0], INTERRUPT_SEQUENCE.to_vec());
        // Startup chatter was discarded, not queued.
        assert!(channel.drain_pending().is_empty());
    }

    #[test]
    fn test_exchange_returns_reply_lines() {
        let (transport, written) =
            ScriptedTransport::with_reply(b"b.scan()\r\n[(entries)]\r\n>>> \r\n");
        let mut channel = Channel::new(test_config());
        channel
            .connect_with(Box::new(transport), ReceiveMode::Polling)
            .unwrap();

        let reply = channel
            .exchange(&Command::WifiScan, Duration::from_millis(0))
            .unwrap();
        assert_eq!(reply, vec!["b.scan()", "[(entries)]", ">>> "]);

        // Interrupt, then the command itself.
        let writes = written.lock();
        assert_eq!(writes.last().unwrap(), b"b.scan()\r");
        assert_eq!(channel.bytes_sent(), b"b.scan()\r".len() as u64);
    }

    #[test]
    fn test_disconnect_flushes_trailing_partial() {
        let (mut transport, _written) = ScriptedTransport::new();
        transport.to_read.push_back(b"".to_vec());

        let mut channel = Channel::new(test_config());
        channel
            .connect_with(Box::new(transport), ReceiveMode::Polling)
            .unwrap();

        // A line fragment without its newline, arriving before teardown.
        channel.framer.lock().push(b"half a lin");
        channel.disconnect();

        assert!(!channel.is_connected());
        assert_eq!(channel.drain_pending(), vec!["half a lin"]);
    }

    #[test]
    fn test_streaming_dispatches_lines_as_events() {
        // Every write is answered with the same line, so the command sent
        // below is what the worker ends up reading.
        let (transport, _written) = ScriptedTransport::with_reply(b"event line\r\n");

        let mut channel = Channel::new(test_config());
        let seen: Arc<Mutex<Vec<ChannelEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.dispatcher().subscribe(move |event| {
            sink.lock().push(event.clone());
        });

        channel
            .connect_with(Box::new(transport), ReceiveMode::Streaming)
            .unwrap();
        channel.send(&Command::WifiScan).unwrap();

        // Give the worker a moment to read and dispatch.
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if seen
                .lock()
                .iter()
                .any(|e| matches!(e, ChannelEvent::Line(l) if l == "event line"))
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        channel.disconnect();
        let events = seen.lock();
        assert!(events.contains(&ChannelEvent::Connected));
        assert!(events.contains(&ChannelEvent::Line("event line".to_string())));
        assert!(events.contains(&ChannelEvent::Disconnected));
    }

    #[test]
    fn test_receive_rejected_in_streaming_mode() {
        let (transport, _written) = ScriptedTransport::new();
        let mut channel = Channel::new(test_config());
        channel
            .connect_with(Box::new(transport), ReceiveMode::Streaming)
            .unwrap();

        let result = channel.receive(Duration::from_millis(1));
        assert!(matches!(result, Err(ChannelError::WrongMode)));
        channel.disconnect();
    }

    #[test]
    fn test_streaming_disconnect_joins_within_bound() {
        let (transport, _written) = ScriptedTransport::new();
        let mut channel = Channel::new(test_config());
        channel
            .connect_with(Box::new(transport), ReceiveMode::Streaming)
            .unwrap();

        let start = Instant::now();
        channel.disconnect();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!channel.is_connected());
    }
}
