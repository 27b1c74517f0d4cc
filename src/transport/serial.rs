//! Serial transport implementation
//!
//! Used when the radio module presents itself as a serial device
//! (e.g. `/dev/ttyUSB0`). Reads carry a short timeout so the line reader
//! can observe session shutdown; timeouts are retried there, not here.

use super::LinkStream;
use crate::error::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Read timeout; the line reader retries on timeout while the session lives
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Serial-port link stream
pub struct SerialLinkStream {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialLinkStream {
    /// Open a serial device
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g. "/dev/ttyUSB0")
    /// * `baud_rate` - Baud rate (e.g. 115200)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;

        log::info!("Opened serial link: {} at {} baud", path, baud_rate);

        Ok(SerialLinkStream {
            port,
            path: path.to_string(),
        })
    }
}

impl Read for SerialLinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

impl LinkStream for SerialLinkStream {
    fn try_clone(&self) -> Result<Box<dyn LinkStream>> {
        Ok(Box::new(SerialLinkStream {
            port: self.port.try_clone()?,
            path: self.path.clone(),
        }))
    }

    fn shutdown(&self) {
        // Serial ports have no half-close; the reader exits via the session
        // alive flag on its next read timeout.
    }

    fn peer(&self) -> String {
        self.path.clone()
    }
}
