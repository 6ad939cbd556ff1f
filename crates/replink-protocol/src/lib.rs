//! MicroPython REPL Line Protocol
//!
//! This crate provides types and utilities for communicating with a
//! MicroPython board over its interactive REPL. The REPL is a plain
//! line-based text interface: the host writes Python expressions terminated
//! with `\r`, and the interpreter answers with free-form text that the host
//! frames back into lines.
//!
//! # Protocol Overview
//!
//! - **Commands** (host → device): Python expressions terminated with `\r`
//! - **Replies** (device → host): echo of the expression, result/output
//!   lines, and the next prompt, all newline-delimited
//!
//! Because the device side is a general-purpose interpreter rather than a
//! fixed firmware command table, replies are matched by explicit markers
//! (the echoed expression, `connect:`, `ip:`, `PING `) instead of by
//! position, and anything that does not carry the expected marker decodes
//! to an explicit unparseable value.
//!
//! # Example
//!
//! ```rust,ignore
//! use replink_protocol::{Command, LineFramer, decode_ping};
//!
//! // Build a command
//! let cmd = Command::WifiScan;
//! let bytes = cmd.encode();
//!
//! // Frame reply bytes into lines
//! let mut framer = LineFramer::new();
//! framer.push(&received);
//! let lines = framer.drain_lines();
//! ```

mod codec;
mod commands;
mod error;
mod responses;

pub use codec::*;
pub use commands::*;
pub use error::*;
pub use responses::*;
