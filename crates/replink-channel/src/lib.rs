//! Serial Command Channel
//!
//! This crate owns the link to the device: a byte [`Transport`] over the
//! serial driver, the [`Channel`] state machine that frames REPL output
//! into lines and pairs it with sent commands, and the [`Dispatcher`] used
//! by the streaming receive mode to push lines and lifecycle events to
//! observers.
//!
//! # Receive strategies
//!
//! A channel is connected in one of two modes, fixed for the session:
//!
//! - [`ReceiveMode::Polling`] — sequential request/response on the
//!   caller's thread; the mode the file-transfer protocol uses.
//! - [`ReceiveMode::Streaming`] — a background worker drains the
//!   transport continuously and dispatches each line as an event.
//!
//! # Example
//!
//! ```rust,ignore
//! use replink_channel::{Channel, ChannelConfig, ReceiveMode};
//! use replink_protocol::Command;
//!
//! let mut channel = Channel::new(ChannelConfig::default());
//! channel.connect("/dev/ttyUSB0", ReceiveMode::Polling)?;
//! let reply = channel.exchange(&Command::WifiScan, std::time::Duration::from_secs(8))?;
//! channel.disconnect();
//! ```

mod channel;
mod dispatcher;
mod error;
mod streaming;
mod transport;

pub use channel::*;
pub use dispatcher::*;
pub use error::*;
pub use transport::*;
