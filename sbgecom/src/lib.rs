//! Driver for the sbgECom binary protocol spoken by SBG Systems inertial
//! navigation devices.
//!
//! The crate is layered:
//!
//! - [`protocol`]: frame encoding, a resynchronizing parser and a receive pump
//!   that also pages and reassembles large transfers
//! - [`ecom`]: [`EComHandle`], which correlates commands with their replies or
//!   ACKs while forwarding interleaved output logs to a callback
//! - [`transport`]: serial, UDP and file links behind the [`Transport`] trait
//! - [`commands`]: a few device commands built on the handle
//!
//! Everything is synchronous and single-threaded: operations block the caller
//! until success, error or timeout.
//!
//! # Features
//!
//! - `serial` (default) - serial port transport
//! - `udp` (default) - UDP transport
//! - `mock` - in-memory [`MockTransport`](transport::MockTransport) for tests
//!   of downstream crates

pub mod cli;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod ecom;
pub mod error;
pub mod ids;
pub mod logs;
pub mod protocol;
pub mod retry;
pub mod transport;

pub use config::{DeviceConfig, EComConfig, SerialConfig, TransportConfig, UdpConfig};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink, TracingSink};
pub use ecom::{EComHandle, Expect};
pub use error::{EComError, EComResult, ErrorCode};
pub use ids::MsgClass;
pub use logs::{DiagLog, DiagType, LogData, LogRegistry};
pub use protocol::{Frame, Protocol};
pub use transport::{FileTransport, Transport};

#[cfg(feature = "serial")]
pub use transport::SerialTransport;
#[cfg(feature = "udp")]
pub use transport::UdpTransport;

/// Open a transport described by `config`.
///
/// # Errors
///
/// [`EComError::Config`] if the transport kind was compiled out, otherwise any
/// error raised while opening the link.
pub fn open_transport(config: &TransportConfig) -> EComResult<Box<dyn Transport>> {
    match config {
        #[cfg(feature = "serial")]
        TransportConfig::Serial(serial) => Ok(Box::new(SerialTransport::from_config(serial)?)),
        #[cfg(feature = "udp")]
        TransportConfig::Udp(udp) => Ok(Box::new(UdpTransport::from_config(udp)?)),
        #[allow(unreachable_patterns)]
        other => Err(EComError::Config(format!(
            "transport {other:?} not enabled in this build"
        ))),
    }
}
