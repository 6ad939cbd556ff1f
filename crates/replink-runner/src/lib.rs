//! # replink-runner
//!
//! Host-side tooling for MicroPython boards: pushes a local directory tree
//! to the device through its serial REPL and runs wifi diagnostics over
//! the same command channel.
//!
//! The heavy lifting lives in the sibling crates — `replink-protocol`
//! (line framing, command vocabulary, reply decoding) and
//! `replink-channel` (the serial command channel with polling and
//! streaming receive modes). This crate adds the two protocol clients on
//! top:
//!
//! - [`upload`]: the file-transfer protocol — walk, filter, smash,
//!   open/write-chunks/close per file (see [`job::TransferJob`])
//! - [`wifi`]: station diagnostics (scan/connect/status/ping) and soft-AP
//!   control
//!
//! plus the `replink` CLI binary.

pub mod job;
pub mod smash;
pub mod upload;
pub mod wifi;

pub use job::{SmashPolicy, TransferJob, TransferStats};
pub use upload::{UploadError, UploadReport};
pub use wifi::{AccessPoint, ConnectOutcome, TestConnectOutcome, WifiClient, WifiTiming};
