//! Byte transports carrying sbgECom frames.
//!
//! The protocol layer only needs to write bytes and to poll for whatever bytes
//! are available right now. Every transport is non-blocking from the caller's
//! point of view: [`Transport::read`] returns `Ok(0)` when nothing is pending.

use std::io;

pub mod file;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "serial")]
pub mod serial;
#[cfg(feature = "udp")]
pub mod udp;

pub use file::FileTransport;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockProbe, MockTransport};
#[cfg(feature = "serial")]
pub use serial::SerialTransport;
#[cfg(feature = "udp")]
pub use udp::UdpTransport;

/// A bidirectional byte link to a device.
pub trait Transport: Send {
    /// Write every byte of `data`, or fail.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read the bytes available now into `buf`.
    ///
    /// Returns `Ok(0)` when no data is pending. Only hard failures are errors.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Short description used in logs.
    fn name(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_all(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Map "no data yet" conditions of a blocking-with-timeout read to `Ok(0)`.
pub(crate) fn no_data_as_zero(result: io::Result<usize>) -> io::Result<usize> {
    match result {
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(0)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_as_zero() {
        assert_eq!(no_data_as_zero(Ok(5)).unwrap(), 5);
        assert_eq!(
            no_data_as_zero(Err(io::Error::from(io::ErrorKind::TimedOut))).unwrap(),
            0
        );
        assert_eq!(
            no_data_as_zero(Err(io::Error::from(io::ErrorKind::WouldBlock))).unwrap(),
            0
        );
        assert!(no_data_as_zero(Err(io::Error::from(io::ErrorKind::BrokenPipe))).is_err());
    }

    #[test]
    fn test_boxed_transport_forwards() {
        let (mock, probe) = MockTransport::new();
        let mut boxed: Box<dyn Transport> = Box::new(mock);

        probe.queue_rx(&[1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(boxed.read(&mut buf).unwrap(), 3);

        boxed.write_all(&[9]).unwrap();
        assert_eq!(probe.writes(), vec![vec![9]]);
        assert_eq!(boxed.name(), "mock");
    }
}
