//! Serial port transport (RS-232 / RS-422).

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::debug;

use super::{no_data_as_zero, Transport};
use crate::config::SerialConfig;
use crate::error::{EComError, EComResult};

/// Read timeout of the underlying port.
///
/// Kept short so that a read behaves like a poll; the protocol layer handles
/// the overall deadline.
const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Serial link to a device, 8N1 without flow control.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`EComError::Io`] if the port cannot be opened.
    pub fn open(path: &str, baud_rate: u32) -> EComResult<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| EComError::Io(e.into()))?;

        debug!("Opened serial port {} at {} bps", path, baud_rate);

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    pub fn from_config(config: &SerialConfig) -> EComResult<Self> {
        Self::open(&config.port, config.baud_rate)
    }

    /// Change the baud rate of an open port.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> EComResult<()> {
        self.port
            .set_baud_rate(baud_rate)
            .map_err(|e| EComError::Io(e.into()))
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        no_data_as_zero(self.port.read(buf))
    }

    fn name(&self) -> String {
        format!("serial:{}", self.path)
    }
}
