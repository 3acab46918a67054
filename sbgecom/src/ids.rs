//! Message class and message ID constants.
//!
//! A frame is identified by a `(msg_class, msg_id)` pair. Classes below 0x10
//! carry free-running output logs; class 0x10 carries commands and their ACKs.

use strum::{Display, EnumIter, IntoEnumIterator};

/// Message classes defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum MsgClass {
    /// Binary output logs
    LogEcom0 = 0x00,
    /// High frequency binary output logs
    LogEcom1 = 0x01,
    /// Standard NMEA sentences
    LogNmea0 = 0x02,
    /// Proprietary NMEA sentences
    LogNmea1 = 0x03,
    /// Third party output formats
    LogThirdParty0 = 0x04,
    /// NMEA sentences forwarded from the GNSS receiver
    LogNmeaGnss = 0x05,
    /// Commands and command acknowledgements
    Cmd0 = 0x10,
}

impl MsgClass {
    /// Look up a class from its wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::iter().find(|class| *class as u8 == value)
    }

    /// Wire value of this class.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// True if frames of this class are asynchronous output logs.
pub fn is_log_class(msg_class: u8) -> bool {
    matches!(
        MsgClass::from_u8(msg_class),
        Some(
            MsgClass::LogEcom0
                | MsgClass::LogEcom1
                | MsgClass::LogNmea0
                | MsgClass::LogNmea1
                | MsgClass::LogThirdParty0
                | MsgClass::LogNmeaGnss
        )
    )
}

/// True if frames of this class hold NMEA text.
pub fn is_nmea_class(msg_class: u8) -> bool {
    matches!(
        MsgClass::from_u8(msg_class),
        Some(MsgClass::LogNmea0 | MsgClass::LogNmea1 | MsgClass::LogNmeaGnss)
    )
}

/// Command IDs within [`MsgClass::Cmd0`].
pub mod cmd {
    /// Acknowledgement of a previously sent command
    pub const ACK: u8 = 0;
    /// Save, restore or reboot action
    pub const SETTINGS_ACTION: u8 = 1;
    /// Device information query
    pub const INFO: u8 = 4;
}

/// Log IDs within [`MsgClass::LogEcom0`] that this crate decodes.
pub mod log {
    /// Diagnostic text messages
    pub const DIAG: u8 = 48;
}
