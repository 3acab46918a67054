//! Decoding and dispatch of asynchronous output logs.
//!
//! Frames that are not consumed as a command reply are decoded through a
//! [`LogRegistry`] keyed by `(msg_class, msg_id)` and handed to the handle's
//! callback as [`LogData`]. Only the diagnostic log and NMEA sentences are
//! decoded; every other log reaches the callback as raw bytes.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{EComError, EComResult, ErrorCode};
use crate::ids::{log, MsgClass};

/// A decoded log payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogData {
    /// Device diagnostic message (ECOM_0 / DIAG)
    Diag(DiagLog),
    /// NMEA sentence, trailing line terminator removed
    Nmea(String),
    /// Payload of a log without a registered decoder
    Raw(Bytes),
}

/// Severity of a diagnostic log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum DiagType {
    Error,
    Warning,
    Info,
    Debug,
    /// Value not known to this crate
    Unknown(u8),
}

impl DiagType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Error,
            1 => Self::Warning,
            2 => Self::Info,
            3 => Self::Debug,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Error => 0,
            Self::Warning => 1,
            Self::Info => 2,
            Self::Debug => 3,
            Self::Unknown(value) => value,
        }
    }
}

/// Diagnostic text emitted by the device.
///
/// Wire layout: `timestamp u32 LE | type u8 | error code u8 | text, NUL-terminated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagLog {
    /// Device timestamp in microseconds
    pub timestamp_us: u32,
    pub diag_type: DiagType,
    pub error_code: ErrorCode,
    pub message: String,
}

impl DiagLog {
    const HEADER_SIZE: usize = 6;

    pub fn decode(payload: &[u8]) -> EComResult<Self> {
        if payload.len() < Self::HEADER_SIZE {
            return Err(EComError::InvalidFrame(format!(
                "diagnostic log too short: {} bytes",
                payload.len()
            )));
        }

        let text = &payload[Self::HEADER_SIZE..];
        let text = match text.iter().position(|&b| b == 0) {
            Some(nul) => &text[..nul],
            None => text,
        };

        Ok(Self {
            timestamp_us: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            diag_type: DiagType::from_u8(payload[4]),
            error_code: ErrorCode::from_u16(payload[5] as u16),
            message: String::from_utf8_lossy(text).into_owned(),
        })
    }

    /// Serialize to the wire layout, used by device simulators.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + self.message.len() + 1);
        buf.put_u32_le(self.timestamp_us);
        buf.put_u8(self.diag_type.as_u8());
        buf.put_u8(self.error_code.as_u16() as u8);
        buf.put_slice(self.message.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }
}

/// Decoder turning a log payload into [`LogData`].
pub type LogDecoder = fn(&[u8]) -> EComResult<LogData>;

/// Callback receiving every log frame not consumed by the correlator.
pub type LogCallback = Box<dyn FnMut(u8, u8, &LogData) + Send>;

fn decode_diag(payload: &[u8]) -> EComResult<LogData> {
    DiagLog::decode(payload).map(LogData::Diag)
}

fn decode_nmea(payload: &[u8]) -> EComResult<LogData> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| EComError::InvalidFrame(format!("NMEA sentence is not text: {e}")))?;
    Ok(LogData::Nmea(
        text.trim_end_matches(['\r', '\n', '\0']).to_string(),
    ))
}

/// Map from `(msg_class, msg_id)` to a decoder.
///
/// A class-wide decoder applies to every ID of the class that has no specific
/// entry.
#[derive(Clone)]
pub struct LogRegistry {
    decoders: HashMap<(u8, u8), LogDecoder>,
    class_decoders: HashMap<u8, LogDecoder>,
}

impl LogRegistry {
    /// Registry without any decoder: every log is dispatched as raw bytes.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
            class_decoders: HashMap::new(),
        }
    }

    pub fn register(&mut self, msg_class: u8, msg_id: u8, decoder: LogDecoder) {
        self.decoders.insert((msg_class, msg_id), decoder);
    }

    pub fn register_class(&mut self, msg_class: u8, decoder: LogDecoder) {
        self.class_decoders.insert(msg_class, decoder);
    }

    pub fn decoder_for(&self, msg_class: u8, msg_id: u8) -> Option<LogDecoder> {
        self.decoders
            .get(&(msg_class, msg_id))
            .or_else(|| self.class_decoders.get(&msg_class))
            .copied()
    }

    /// Decode a payload. Logs without a decoder become [`LogData::Raw`].
    pub fn decode(&self, msg_class: u8, msg_id: u8, payload: &Bytes) -> EComResult<LogData> {
        match self.decoder_for(msg_class, msg_id) {
            Some(decoder) => decoder(payload),
            None => Ok(LogData::Raw(payload.clone())),
        }
    }
}

impl Default for LogRegistry {
    /// DIAG in ECOM_0 plus every NMEA class.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MsgClass::LogEcom0.as_u8(), log::DIAG, decode_diag);
        for class in [MsgClass::LogNmea0, MsgClass::LogNmea1, MsgClass::LogNmeaGnss] {
            registry.register_class(class.as_u8(), decode_nmea);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diag_decode() {
        let mut payload = vec![0x10, 0x27, 0x00, 0x00, 1, 9];
        payload.extend_from_slice(b"GNSS antenna disconnected\0garbage");

        let diag = DiagLog::decode(&payload).unwrap();
        assert_eq!(diag.timestamp_us, 10_000);
        assert_eq!(diag.diag_type, DiagType::Warning);
        assert_eq!(diag.error_code, ErrorCode::InvalidParameter);
        assert_eq!(diag.message, "GNSS antenna disconnected");
    }

    #[test]
    fn test_diag_without_terminator() {
        let payload = [0, 0, 0, 0, 2, 0, b'o', b'k'];
        let diag = DiagLog::decode(&payload).unwrap();
        assert_eq!(diag.diag_type, DiagType::Info);
        assert_eq!(diag.message, "ok");
    }

    #[test]
    fn test_diag_too_short() {
        assert!(matches!(
            DiagLog::decode(&[0, 0, 0]),
            Err(EComError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_diag_payload_round_trip() {
        let diag = DiagLog {
            timestamp_us: 42,
            diag_type: DiagType::Error,
            error_code: ErrorCode::TimeOut,
            message: "no PPS".into(),
        };
        assert_eq!(DiagLog::decode(&diag.to_payload()).unwrap(), diag);
    }

    #[test]
    fn test_default_registry() {
        let registry = LogRegistry::default();
        let nmea = Bytes::from_static(b"$GPGGA,123519,4807.038,N*47\r\n");

        assert_eq!(
            registry.decode(0x02, 0x07, &nmea).unwrap(),
            LogData::Nmea("$GPGGA,123519,4807.038,N*47".into())
        );
        assert_eq!(
            registry.decode(0x00, 0x03, &Bytes::from_static(&[1, 2])).unwrap(),
            LogData::Raw(Bytes::from_static(&[1, 2]))
        );
        assert!(registry.decoder_for(0x00, log::DIAG).is_some());
        assert!(registry.decoder_for(0x04, 0x01).is_none());
    }

    #[test]
    fn test_invalid_nmea_is_decode_error() {
        let registry = LogRegistry::default();
        assert!(registry
            .decode(0x05, 0x00, &Bytes::from_static(&[0xFF, 0xFE]))
            .is_err());
    }

    #[test]
    fn test_specific_decoder_overrides_class() {
        fn raw_marker(_: &[u8]) -> EComResult<LogData> {
            Ok(LogData::Raw(Bytes::from_static(b"marker")))
        }

        let mut registry = LogRegistry::default();
        registry.register(0x02, 0x01, raw_marker);
        assert_eq!(
            registry.decode(0x02, 0x01, &Bytes::from_static(b"$X")).unwrap(),
            LogData::Raw(Bytes::from_static(b"marker"))
        );
    }

    #[test]
    fn test_empty_registry_is_raw() {
        let registry = LogRegistry::empty();
        let payload = Bytes::from_static(&[0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            registry.decode(0x00, log::DIAG, &payload).unwrap(),
            LogData::Raw(_)
        ));
    }
}
