//! Byte transport abstraction over the serial link.
//!
//! The channel only needs three things from a transport: bounded reads
//! (returning nothing once the driver's read timeout expires), complete
//! writes, and a way to open the real serial device with the line
//! parameters the target expects. Anything satisfying [`Transport`] can
//! stand in for the device — the integration tests drive the channel with
//! in-memory doubles.

use std::io::Read;
use std::time::Duration;

use crate::error::TransportError;

/// Line parameters for opening the serial device.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Baud rate.
    pub baud: u32,
    /// Per-read timeout; a read that sees no data within it returns empty.
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            baud: 115_200,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// A byte stream to the device.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes.
    ///
    /// Returns the number of bytes read; `0` means nothing arrived within
    /// the transport's read timeout (not end-of-stream).
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

/// Transport over a real serial port (8 data bits, no parity, one stop bit).
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open the named port with the given line parameters.
    pub fn open(port_name: &str, config: &TransportConfig) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, config.baud)
            .timeout(config.read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|source| TransportError::Open {
                port: port_name.to_string(),
                source,
            })?;
        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // The driver signals "no data within the timeout" as an error;
            // to the channel that is an ordinary empty read.
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        use std::io::Write;
        self.port.write_all(data)?;
        Ok(())
    }
}
