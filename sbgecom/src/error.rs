//! Error types for sbgECom communication.
//!
//! Two layers live here:
//!
//! - [`ErrorCode`]: the 16-bit status codes defined by the device firmware.
//!   They travel on the wire inside ACK frames and must be preserved verbatim.
//! - [`EComError`]: the Rust error returned by every fallible operation of this
//!   crate. Device-reported failures are wrapped in [`EComError::Ack`].

use strum::{Display, EnumIter, IntoEnumIterator};
use thiserror::Error;

/// Status codes defined by the sbgECom protocol.
///
/// Values are fixed by the firmware. Codes this crate does not know about are
/// kept as [`ErrorCode::Unknown`] so they can still be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ErrorCode {
    #[strum(serialize = "SBG_NO_ERROR")]
    NoError,
    #[strum(serialize = "SBG_ERROR")]
    Error,
    #[strum(serialize = "SBG_NULL_POINTER")]
    NullPointer,
    #[strum(serialize = "SBG_INVALID_CRC")]
    InvalidCrc,
    #[strum(serialize = "SBG_INVALID_FRAME")]
    InvalidFrame,
    #[strum(serialize = "SBG_TIME_OUT")]
    TimeOut,
    #[strum(serialize = "SBG_WRITE_ERROR")]
    WriteError,
    #[strum(serialize = "SBG_READ_ERROR")]
    ReadError,
    #[strum(serialize = "SBG_BUFFER_OVERFLOW")]
    BufferOverflow,
    #[strum(serialize = "SBG_INVALID_PARAMETER")]
    InvalidParameter,
    #[strum(serialize = "SBG_NOT_READY")]
    NotReady,
    #[strum(serialize = "SBG_MALLOC_FAILED")]
    MallocFailed,
    #[strum(serialize = "SBG_CALIB_MAG_NOT_ENOUGH_POINTS")]
    CalibMagNotEnoughPoints,
    #[strum(serialize = "SBG_CALIB_MAG_INVALID_TAKE")]
    CalibMagInvalidTake,
    #[strum(serialize = "SBG_CALIB_MAG_SATURATION")]
    CalibMagSaturation,
    #[strum(serialize = "SBG_CALIB_MAG_POINTS_NOT_IN_A_PLANE")]
    CalibMagPointsNotInAPlane,
    #[strum(serialize = "SBG_DEVICE_NOT_FOUND")]
    DeviceNotFound,
    #[strum(serialize = "SBG_OPERATION_CANCELLED")]
    OperationCancelled,
    #[strum(serialize = "SBG_NOT_CONTINUOUS_FRAME")]
    NotContinuousFrame,
    #[strum(serialize = "SBG_INCOMPATIBLE_HARDWARE")]
    IncompatibleHardware,
    #[strum(serialize = "SBG_INVALID_VERSION")]
    InvalidVersion,
    /// Code not known to this crate; the raw value is kept.
    #[strum(serialize = "SBG_UNKNOWN_ERROR")]
    Unknown(u16),
}

impl ErrorCode {
    /// Decode a wire status code.
    pub fn from_u16(value: u16) -> Self {
        Self::iter()
            .find(|code| !matches!(code, Self::Unknown(_)) && code.as_u16() == value)
            .unwrap_or(Self::Unknown(value))
    }

    /// Wire value of this status code.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::NoError => 0,
            Self::Error => 1,
            Self::NullPointer => 2,
            Self::InvalidCrc => 3,
            Self::InvalidFrame => 4,
            Self::TimeOut => 5,
            Self::WriteError => 6,
            Self::ReadError => 7,
            Self::BufferOverflow => 8,
            Self::InvalidParameter => 9,
            Self::NotReady => 10,
            Self::MallocFailed => 11,
            Self::CalibMagNotEnoughPoints => 12,
            Self::CalibMagInvalidTake => 13,
            Self::CalibMagSaturation => 14,
            Self::CalibMagPointsNotInAPlane => 15,
            Self::DeviceNotFound => 16,
            Self::OperationCancelled => 17,
            Self::NotContinuousFrame => 18,
            Self::IncompatibleHardware => 19,
            Self::InvalidVersion => 20,
            Self::Unknown(value) => value,
        }
    }

    /// True for [`ErrorCode::NoError`].
    pub fn is_success(self) -> bool {
        self == Self::NoError
    }

    /// Human-readable description of the status code.
    pub fn description(self) -> String {
        match self {
            Self::NoError => "No error.".to_string(),
            Self::Error => "Generic error.".to_string(),
            Self::NullPointer => "A pointer is null.".to_string(),
            Self::InvalidCrc => "The received frame has an invalid CRC.".to_string(),
            Self::InvalidFrame => "The received frame is invalid.".to_string(),
            Self::TimeOut => "We have a time out during frame reception.".to_string(),
            Self::WriteError => "All bytes hasn't been written.".to_string(),
            Self::ReadError => "All bytes hasn't been read.".to_string(),
            Self::BufferOverflow => "A buffer is too small to contain so much data.".to_string(),
            Self::InvalidParameter => "An invalid parameter has been found.".to_string(),
            Self::NotReady => "A device isn't ready (Rx isn't ready for example).".to_string(),
            Self::MallocFailed => "Failed to allocate a buffer.".to_string(),
            Self::CalibMagNotEnoughPoints => {
                "Not enough points were available to perform magnetometers calibration."
                    .to_string()
            }
            Self::CalibMagInvalidTake => {
                "The calibration procedure could not be properly executed due to insufficient precision."
                    .to_string()
            }
            Self::CalibMagSaturation => {
                "Saturation were detected when attempt to calibrate magnetos.".to_string()
            }
            Self::CalibMagPointsNotInAPlane => {
                "2D calibration procedure could not be performed.".to_string()
            }
            Self::DeviceNotFound => "A device couldn't be found or opened.".to_string(),
            Self::OperationCancelled => "An operation has been canceled by a user.".to_string(),
            Self::NotContinuousFrame => {
                "We have received a frame that isn't a continuous one.".to_string()
            }
            Self::IncompatibleHardware => {
                "The configuration cannot be executed because of incompatible hardware."
                    .to_string()
            }
            Self::InvalidVersion => "Incompatible version.".to_string(),
            Self::Unknown(value) => format!("Undefined error code: {value}"),
        }
    }
}

/// Errors that can occur while talking to an sbgECom device.
///
/// Transport failures, local capacity checks and device-reported status codes
/// all end up here. Use [`EComError::is_retryable`] to know whether a command
/// attempt may be repeated.
#[derive(Error, Debug)]
pub enum EComError {
    /// Low-level I/O error outside of a read or write (open, configure).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport refused or truncated a write.
    #[error("Write error: {0}")]
    Write(std::io::Error),

    /// The transport reported a hard read failure.
    #[error("Read error: {0}")]
    Read(std::io::Error),

    /// Payload does not fit in a single frame.
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Requested payload size in bytes
        size: usize,
        /// Largest payload accepted by the encoder
        max: usize,
    },

    /// No matching frame arrived before the deadline.
    #[error("Timeout waiting for response")]
    TimedOut,

    /// A single non-blocking poll found no complete frame.
    #[error("No frame ready")]
    NotReady,

    /// The device acknowledged the command with a failure status.
    #[error("Device error {code}: {}", .code.description())]
    Ack {
        /// Status code carried by the ACK frame
        code: ErrorCode,
    },

    /// A frame was received but its content does not match what was expected.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// A caller-supplied argument is out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A received payload does not fit in the caller's buffer.
    #[error("Buffer overflow: {size} bytes received, {capacity} available")]
    BufferOverflow {
        /// Received payload size
        size: usize,
        /// Capacity of the destination
        capacity: usize,
    },

    /// Bytes were still arriving at the end of an input purge.
    #[error("Unable to purge the rx buffer, {0} bytes remaining")]
    PurgeFailed(usize),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for sbgECom operations.
pub type EComResult<T> = Result<T, EComError>;

impl EComError {
    /// Build an ACK error from a raw wire status code.
    pub fn ack(code: u16) -> Self {
        Self::Ack {
            code: ErrorCode::from_u16(code),
        }
    }

    /// Vendor status code equivalent to this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::Error,
            Self::Write(_) => ErrorCode::WriteError,
            Self::Read(_) => ErrorCode::ReadError,
            Self::PayloadTooLarge { .. } => ErrorCode::InvalidParameter,
            Self::TimedOut => ErrorCode::TimeOut,
            Self::NotReady => ErrorCode::NotReady,
            Self::Ack { code } => *code,
            Self::InvalidFrame(_) => ErrorCode::InvalidFrame,
            Self::InvalidParameter(_) | Self::Config(_) => ErrorCode::InvalidParameter,
            Self::BufferOverflow { .. } => ErrorCode::BufferOverflow,
            Self::PurgeFailed(_) => ErrorCode::Error,
        }
    }

    /// Whether a command attempt that failed with this error may be repeated.
    ///
    /// Write failures and local parameter errors abort the command; everything
    /// the device or the link can recover from (timeouts, NACKs, garbled or
    /// mismatched frames, read hiccups) is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TimedOut
                | Self::NotReady
                | Self::Ack { .. }
                | Self::InvalidFrame(_)
                | Self::Read(_)
                | Self::BufferOverflow { .. }
        )
    }
}
