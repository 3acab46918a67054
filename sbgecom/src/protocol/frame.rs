//! sbgECom frame layout and encoding
//!
//! Standard frame:
//!
//! ```text
//! | SYNC1 | SYNC2 | MSG ID | CLASS | LEN (LE) | DATA       | CRC (LE) | ETX  |
//! | 0xFF  | 0x5A  | 1      | 1     | 2        | 0..4086    | 2        | 0x33 |
//! ```
//!
//! Extended frames set bit 0x80 of the class byte and prefix the data with a
//! 5-byte page header (`transfer id`, `page index`, `page count`). The length
//! field counts that header, so an extended page carries at most 4081 data bytes.
//!
//! The message ID precedes the class on the wire; every API of this crate
//! nevertheless takes `(msg_class, msg_id)` in that order.

use bytemuck::{Pod, Zeroable};
use bytes::{BufMut, Bytes, BytesMut};

use super::crc::compute_crc;
use crate::error::{EComError, EComResult, ErrorCode};
use crate::ids::{cmd, MsgClass};

/// First synchronization byte.
pub const SYNC_1: u8 = 0xFF;
/// Second synchronization byte.
pub const SYNC_2: u8 = 0x5A;
/// End of frame byte.
pub const ETX: u8 = 0x33;

/// Maximum reception work buffer size in bytes.
pub const MAX_BUFFER_SIZE: usize = 4096;
/// Maximum payload of a standard frame.
pub const MAX_PAYLOAD_SIZE: usize = 4086;
/// Maximum data carried by one extended page.
pub const MAX_EXTENDED_PAYLOAD_SIZE: usize = 4081;

/// Bytes of a frame that are not payload: SYNC x2, ID, class, LEN x2, CRC x2, ETX.
pub const FRAME_OVERHEAD: usize = 9;
/// Size of the extended page header.
pub const EXTENDED_HEADER_SIZE: usize = 5;
/// Class bit flagging an extended frame.
pub const EXTENDED_CLASS_FLAG: u8 = 0x80;

/// Page information carried by an extended frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// Transfer identifier (4 bits)
    pub transfer_id: u8,
    /// Zero-based index of this page
    pub page_index: u16,
    /// Total number of pages in the transfer
    pub page_count: u16,
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message class (extended flag removed)
    pub msg_class: u8,
    /// Message ID within the class
    pub msg_id: u8,
    /// Frame payload, excluding any extended header
    pub payload: Bytes,
    /// Present for a single page of an extended transfer
    pub page: Option<PageInfo>,
}

impl Frame {
    /// Create a standard frame.
    pub fn new(msg_class: u8, msg_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_class,
            msg_id,
            payload: payload.into(),
            page: None,
        }
    }

    /// Whether this frame matches a `(class, id)` pair.
    pub fn is(&self, msg_class: u8, msg_id: u8) -> bool {
        self.msg_class == msg_class && self.msg_id == msg_id
    }

    /// Whether this frame is a command acknowledgement.
    pub fn is_ack(&self) -> bool {
        self.page.is_none() && self.is(MsgClass::Cmd0.as_u8(), cmd::ACK)
    }

    /// Move the payload out, leaving this frame with an empty payload.
    pub fn take_payload(&mut self) -> Bytes {
        std::mem::take(&mut self.payload)
    }
}

/// Encode a standard frame.
///
/// # Errors
///
/// Returns [`EComError::PayloadTooLarge`] if `payload` exceeds
/// [`MAX_PAYLOAD_SIZE`], and [`EComError::InvalidParameter`] if the class uses
/// the reserved extended bit.
pub fn encode(msg_class: u8, msg_id: u8, payload: &[u8]) -> EComResult<Bytes> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(EComError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    check_class(msg_class)?;

    let mut buf = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
    buf.put_u8(SYNC_1);
    buf.put_u8(SYNC_2);
    buf.put_u8(msg_id);
    buf.put_u8(msg_class);
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    finish(buf)
}

/// Encode one page of an extended transfer.
///
/// # Errors
///
/// Returns [`EComError::PayloadTooLarge`] if `data` exceeds
/// [`MAX_EXTENDED_PAYLOAD_SIZE`], and [`EComError::InvalidParameter`] for
/// inconsistent page information.
pub fn encode_extended(msg_class: u8, msg_id: u8, page: PageInfo, data: &[u8]) -> EComResult<Bytes> {
    if data.len() > MAX_EXTENDED_PAYLOAD_SIZE {
        return Err(EComError::PayloadTooLarge {
            size: data.len(),
            max: MAX_EXTENDED_PAYLOAD_SIZE,
        });
    }
    check_class(msg_class)?;
    if page.transfer_id & 0xF0 != 0 {
        return Err(EComError::InvalidParameter(format!(
            "transfer id {:#x} exceeds 4 bits",
            page.transfer_id
        )));
    }
    if page.page_count == 0 || page.page_index >= page.page_count {
        return Err(EComError::InvalidParameter(format!(
            "invalid page {}/{}",
            page.page_index, page.page_count
        )));
    }

    let mut buf = BytesMut::with_capacity(data.len() + FRAME_OVERHEAD + EXTENDED_HEADER_SIZE);
    buf.put_u8(SYNC_1);
    buf.put_u8(SYNC_2);
    buf.put_u8(msg_id);
    buf.put_u8(EXTENDED_CLASS_FLAG | msg_class);
    // The length spans the extended header for compatibility with standard parsers
    buf.put_u16_le((data.len() + EXTENDED_HEADER_SIZE) as u16);
    buf.put_u8(page.transfer_id);
    buf.put_u16_le(page.page_index);
    buf.put_u16_le(page.page_count);
    buf.put_slice(data);
    finish(buf)
}

fn check_class(msg_class: u8) -> EComResult<()> {
    if msg_class & EXTENDED_CLASS_FLAG != 0 {
        return Err(EComError::InvalidParameter(format!(
            "message class {msg_class:#x} uses the extended frame bit"
        )));
    }
    Ok(())
}

/// Append CRC and ETX to a frame whose header and payload are written.
fn finish(mut buf: BytesMut) -> EComResult<Bytes> {
    let crc = compute_crc(&buf[2..]);
    buf.put_u16_le(crc);
    buf.put_u8(ETX);
    Ok(buf.freeze())
}

/// Payload of a command acknowledgement frame.
///
/// Total payload size: 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct AckPayload {
    /// ID of the acknowledged command (1 byte)
    pub msg_id: u8,

    /// Class of the acknowledged command (1 byte)
    pub msg_class: u8,

    /// Status code, little-endian on the wire (2 bytes)
    pub error_code: u16,
}

impl AckPayload {
    /// Expected payload size in bytes
    pub const PAYLOAD_SIZE: usize = 4;

    pub fn new(msg_class: u8, msg_id: u8, code: ErrorCode) -> Self {
        Self {
            msg_id,
            msg_class,
            error_code: code.as_u16().to_le(),
        }
    }

    /// Parse an ACK payload, rejecting any size other than 4 bytes.
    pub fn parse(payload: &[u8]) -> EComResult<Self> {
        if payload.len() != Self::PAYLOAD_SIZE {
            return Err(EComError::InvalidFrame(format!(
                "payload size {} is invalid for an ACK",
                payload.len()
            )));
        }
        Ok(*bytemuck::from_bytes(payload))
    }

    /// Decoded status code.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from_u16(u16::from_le(self.error_code))
    }

    /// Whether this ACK refers to the given command.
    pub fn acknowledges(&self, msg_class: u8, msg_id: u8) -> bool {
        self.msg_class == msg_class && self.msg_id == msg_id
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::verify_crc;

    #[test]
    fn test_encode_layout() {
        let wire = encode(0x01, 0x02, &[0xAA, 0xBB]).unwrap();
        assert_eq!(wire.len(), 2 + FRAME_OVERHEAD);
        assert_eq!(&wire[..6], &[SYNC_1, SYNC_2, 0x02, 0x01, 0x02, 0x00]);
        assert_eq!(&wire[6..8], &[0xAA, 0xBB]);
        assert_eq!(wire[wire.len() - 1], ETX);
        // CRC covers ID through payload
        assert!(verify_crc(&wire[2..wire.len() - 1]));
    }

    #[test]
    fn test_encode_empty_payload() {
        let wire = encode(MsgClass::Cmd0.as_u8(), cmd::INFO, &[]).unwrap();
        assert_eq!(wire.len(), FRAME_OVERHEAD);
        assert_eq!(&wire[4..6], &[0x00, 0x00]);
    }

    #[test]
    fn test_encode_max_payload() {
        let payload = vec![0x55; MAX_PAYLOAD_SIZE];
        let wire = encode(0x00, 0x01, &payload).unwrap();
        assert_eq!(wire.len(), MAX_PAYLOAD_SIZE + FRAME_OVERHEAD);
        assert!(wire.len() <= MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = encode(0x00, 0x01, &payload).unwrap_err();
        assert!(matches!(
            err,
            EComError::PayloadTooLarge { size: 4087, max: 4086 }
        ));
    }

    #[test]
    fn test_encode_rejects_extended_class_bit() {
        assert!(matches!(
            encode(0x81, 0x01, &[]),
            Err(EComError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_encode_extended_layout() {
        let page = PageInfo {
            transfer_id: 3,
            page_index: 1,
            page_count: 2,
        };
        let wire = encode_extended(0x10, 0x03, page, &[1, 2, 3]).unwrap();
        assert_eq!(wire[3], 0x90);
        assert_eq!(u16::from_le_bytes([wire[4], wire[5]]), 3 + 5);
        assert_eq!(&wire[6..11], &[3, 1, 0, 2, 0]);
        assert_eq!(&wire[11..14], &[1, 2, 3]);
        assert!(verify_crc(&wire[2..wire.len() - 1]));
    }

    #[test]
    fn test_encode_extended_rejects_bad_pages() {
        let bad_index = PageInfo {
            transfer_id: 0,
            page_index: 2,
            page_count: 2,
        };
        assert!(encode_extended(0x10, 0x03, bad_index, &[]).is_err());

        let bad_id = PageInfo {
            transfer_id: 0x10,
            page_index: 0,
            page_count: 1,
        };
        assert!(encode_extended(0x10, 0x03, bad_id, &[]).is_err());
    }

    #[test]
    fn test_ack_payload_layout() {
        let ack = AckPayload::new(0x10, 0x05, ErrorCode::InvalidParameter);
        assert_eq!(ack.as_bytes(), &[0x05, 0x10, 0x09, 0x00]);

        let parsed = AckPayload::parse(ack.as_bytes()).unwrap();
        assert!(parsed.acknowledges(0x10, 0x05));
        assert_eq!(parsed.code(), ErrorCode::InvalidParameter);
    }

    #[test]
    fn test_ack_payload_wrong_size() {
        assert!(matches!(
            AckPayload::parse(&[0x05, 0x10, 0x00]),
            Err(EComError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_take_payload_leaves_empty() {
        let mut frame = Frame::new(0x00, 0x30, vec![1, 2, 3]);
        let payload = frame.take_payload();
        assert_eq!(&payload[..], &[1, 2, 3]);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_frame_is_ack() {
        let ack = Frame::new(0x10, cmd::ACK, vec![0, 0, 0, 0]);
        assert!(ack.is_ack());
        assert!(!Frame::new(0x00, cmd::ACK, Bytes::new()).is_ack());
    }
}
