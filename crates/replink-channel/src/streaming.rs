//! Background reader for the streaming receive mode.
//!
//! One worker thread per channel performs every read on the transport while
//! the stop flag is clear, feeds the framer, and pushes each completed line
//! to the dispatcher. A transport error is reported as an error event and
//! ends the worker; it is not restarted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use tracing::{debug, warn};

use replink_protocol::LineFramer;

use crate::dispatcher::{ChannelEvent, Dispatcher};
use crate::transport::Transport;

/// Read size per attempt, matching the transfer chunk size.
const READ_CHUNK: usize = 1024;

/// Shared state handed to the reader thread.
pub(crate) struct ReaderShared {
    pub transport: Arc<Mutex<Box<dyn Transport>>>,
    pub framer: Arc<Mutex<LineFramer>>,
    pub dispatcher: Arc<Dispatcher>,
    pub lines_received: Arc<AtomicU64>,
}

/// Handle to the running reader thread.
pub(crate) struct ReaderWorker {
    stop: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderWorker {
    /// Spawn the reader thread.
    pub(crate) fn spawn(shared: ReaderShared) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        // Zero-capacity channel: the send happens on worker exit, and
        // dropping the sender wakes any waiting join either way.
        let (done_tx, done_rx) = bounded::<()>(0);

        let handle = thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            while !stop_flag.load(Ordering::Relaxed) {
                let result = shared.transport.lock().read_up_to(&mut buf);
                match result {
                    Ok(0) => {
                        // The transport's read timeout paces this loop.
                        continue;
                    }
                    Ok(n) => {
                        let lines = {
                            let mut framer = shared.framer.lock();
                            framer.push(&buf[..n]);
                            framer.drain_lines()
                        };
                        for line in lines {
                            shared.lines_received.fetch_add(1, Ordering::Relaxed);
                            shared.dispatcher.emit(&ChannelEvent::Line(line));
                        }
                    }
                    Err(e) => {
                        shared.dispatcher.emit(&ChannelEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            debug!("reader worker exiting");
            drop(done_tx);
        });

        ReaderWorker {
            stop,
            done_rx,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for it within `timeout`.
    ///
    /// Returns whether the worker finished inside the bound. On a missed
    /// bound the thread is abandoned, never blocked on.
    pub(crate) fn stop_and_join(mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Relaxed);

        // The worker signals exit by closing its end of the done channel.
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                true
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                warn!("reader worker did not stop within {:?}, abandoning it", timeout);
                false
            }
        }
    }
}
