//! Commands sent to the MicroPython interpreter.
//!
//! Every command is an ordinary Python expression the interpreter
//! evaluates. The host drives four families of them:
//! - Bootstrap commands (`import os`, `machine.reset()`)
//! - File-transfer commands (open / chunked write / close / mkdir)
//! - Wifi station diagnostics (scan / connect / status / ping)
//! - Access-point control (`bap.*`)

use crate::codec::encode_command;

/// Chunk size used when streaming file contents to the device.
pub const FILE_CHUNK_SIZE: usize = 1024;

/// Remote variable name used for the open file handle.
pub const FILE_HANDLE: &str = "outfile";

/// Commands that can be sent to the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ========== Bootstrap Commands ==========
    /// Import a module on the device.
    Import {
        /// Module name (e.g. "os").
        module: String,
    },

    /// Hard-reset the device.
    MachineReset,

    // ========== File Transfer Commands ==========
    /// Open a remote file for binary write.
    OpenBinaryWrite {
        /// Remote relative path, forward-slash separated.
        path: String,
    },

    /// Write one chunk of bytes to the open file handle.
    ///
    /// The chunk is rendered as a Python bytes literal so the exact byte
    /// sequence round-trips through the text REPL.
    WriteChunk {
        /// Raw chunk contents.
        data: Vec<u8>,
    },

    /// Close the open file handle.
    CloseFile,

    /// Create a remote directory if it does not already exist.
    MakeDirIfAbsent {
        /// Parent directory (None = device root).
        parent: Option<String>,
        /// Directory basename to create.
        name: String,
    },

    // ========== Wifi Station Commands ==========
    /// Start a wifi scan.
    WifiScan,

    /// Set the SSID to associate with.
    SetSsid {
        /// Network SSID.
        ssid: String,
    },

    /// Set the association password.
    SetPassword {
        /// Network password.
        password: String,
    },

    /// Begin association with the configured network.
    WifiConnect,

    /// Drop the current association.
    WifiDisconnect,

    /// Query association status (includes the IP block once connected).
    WifiStatus,

    /// Ping a target host from the device.
    Ping {
        /// Hostname or address to ping.
        target: String,
        /// Number of echo requests.
        count: u32,
        /// Per-request timeout in milliseconds.
        timeout_ms: u32,
        /// Inter-request interval in milliseconds.
        interval_ms: u32,
    },

    // ========== Access Point Commands ==========
    /// Configure the soft-AP parameters.
    ApSetParameters {
        /// AP SSID.
        ssid: String,
        /// AP password.
        password: String,
        /// Radio channel.
        channel: u8,
        /// Authentication mode.
        authmode: u8,
        /// Whether the SSID is hidden.
        hidden: bool,
    },

    /// Start the soft AP.
    ApStart,

    /// Stop the soft AP.
    ApStop,

    /// Query stations connected to the soft AP.
    ApConnected,

    /// Reset the AP connection timer.
    ApTimeReset,

    // ========== Raw Command ==========
    /// Send a raw expression verbatim.
    Raw {
        /// The expression text.
        expr: String,
    },
}

impl Command {
    /// Encode the command as bytes to send, including the `\r` terminator.
    pub fn encode(&self) -> Vec<u8> {
        encode_command(&self.to_expr())
    }

    /// Get the expression text without the terminator.
    pub fn to_expr(&self) -> String {
        match self {
            Command::Import { module } => format!("import {}", module),
            Command::MachineReset => "machine.reset()".to_string(),

            Command::OpenBinaryWrite { path } => {
                format!("{}=open('{}',mode='wb')", FILE_HANDLE, path)
            }
            Command::WriteChunk { data } => {
                format!("{}.write({})", FILE_HANDLE, py_bytes_literal(data))
            }
            Command::CloseFile => format!("{}.close()", FILE_HANDLE),
            Command::MakeDirIfAbsent { parent, name } => match parent {
                Some(parent) => format!(
                    "if '{name}' not in os.listdir('{parent}'): os.mkdir('{parent}/{name}')",
                    name = name,
                    parent = parent
                ),
                None => format!(
                    "if '{name}' not in os.listdir(): os.mkdir('{name}')",
                    name = name
                ),
            },

            Command::WifiScan => "b.scan()".to_string(),
            Command::SetSsid { ssid } => format!("b.set_ssid(\"{}\")", ssid),
            Command::SetPassword { password } => format!("b.set_password(\"{}\")", password),
            Command::WifiConnect => "b.connect()".to_string(),
            Command::WifiDisconnect => "b.disconnect()".to_string(),
            Command::WifiStatus => "b.status()".to_string(),
            Command::Ping { target, count, timeout_ms, interval_ms } => format!(
                "uping.ping('{}', count={}, timeout={}, interval={}, quiet=False, size=64)",
                target, count, timeout_ms, interval_ms
            ),

            Command::ApSetParameters { ssid, password, channel, authmode, hidden } => format!(
                "bap.set_parameters(\"{}\", \"{}\", \"{}\", \"{}\", \"{}\")",
                ssid, password, channel, authmode, u8::from(*hidden)
            ),
            Command::ApStart => "bap.start()".to_string(),
            Command::ApStop => "bap.stop()".to_string(),
            Command::ApConnected => "bap.connected()".to_string(),
            Command::ApTimeReset => "bap.time_reset()".to_string(),

            Command::Raw { expr } => expr.clone(),
        }
    }
}

/// Render raw bytes as a Python bytes literal (`b'...'`).
///
/// Printable ASCII passes through; quotes, backslashes and everything else
/// become `\xNN` escapes so the literal is unambiguous regardless of
/// content.
pub fn py_bytes_literal(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() + 3);
    out.push_str("b'");
    for &byte in data {
        match byte {
            b'\'' | b'\\' => {
                out.push('\\');
                out.push(byte as char);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push('\'');
    out
}
