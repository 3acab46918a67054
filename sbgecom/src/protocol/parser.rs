//! Incremental frame parser
//!
//! Bytes are fed one at a time into a small state machine:
//!
//! ```text
//! AwaitingSync -> AwaitingSync2 -> ReadingHeader -> ReadingPayload
//!              -> ReadingChecksum -> ReadingEtx -> FrameComplete
//! ```
//!
//! Any malformed candidate (oversized length, bad CRC, bad ETX, bad page header)
//! is rejected and the machine returns to `AwaitingSync`. The bytes of the
//! rejected candidate following its SYNC pair are queued again and re-scanned
//! before any new input, so a genuine frame that started inside the rejected
//! bytes is still recovered. Bytes outside a candidate frame are dropped
//! silently.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{trace, warn};

use super::crc::CrcAccumulator;
use super::frame::{
    Frame, PageInfo, ETX, EXTENDED_CLASS_FLAG, EXTENDED_HEADER_SIZE, MAX_PAYLOAD_SIZE, SYNC_1,
    SYNC_2,
};

/// Offset of the first payload byte within a frame.
const PAYLOAD_OFFSET: usize = 6;

/// Reason a candidate frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingFault {
    /// Length field above the protocol maximum, or too short for an extended header
    InvalidLength(usize),
    /// Byte found where ETX was expected
    InvalidEtx(u8),
    /// Extended page index not below the page count
    InvalidPage { page_index: u16, page_count: u16 },
}

/// Outcome of advancing the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// No complete frame yet
    NeedMoreData,
    /// A valid frame was decoded
    FrameComplete(Frame),
    /// The CRC of a candidate frame did not match
    ChecksumError { stored: u16, computed: u16 },
    /// A candidate frame was structurally invalid
    FramingError(FramingFault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingSync,
    AwaitingSync2,
    ReadingHeader,
    ReadingPayload,
    ReadingChecksum,
    ReadingEtx,
}

/// Resynchronizing sbgECom frame parser.
pub struct FrameParser {
    state: State,
    /// Bytes of the candidate frame, starting with its SYNC pair
    frame: Vec<u8>,
    crc: CrcAccumulator,
    payload_len: usize,
    /// Bytes waiting to be stepped through the state machine
    pending: VecDeque<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: State::AwaitingSync,
            frame: Vec::with_capacity(super::frame::MAX_BUFFER_SIZE),
            crc: CrcAccumulator::new(),
            payload_len: 0,
            pending: VecDeque::new(),
        }
    }

    /// Feed one byte and advance until an event or until input runs out.
    ///
    /// Queued bytes from an earlier rejection are processed before `byte`.
    pub fn feed_byte(&mut self, byte: u8) -> ParseEvent {
        self.pending.push_back(byte);
        self.poll()
    }

    /// Queue bytes without processing them. Use [`poll`](Self::poll) to drain.
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend(data);
    }

    /// Process queued bytes until an event other than `NeedMoreData` occurs.
    ///
    /// Returns `NeedMoreData` once the queue is empty.
    pub fn poll(&mut self) -> ParseEvent {
        while let Some(byte) = self.pending.pop_front() {
            match self.step(byte) {
                ParseEvent::NeedMoreData => continue,
                event => return event,
            }
        }
        ParseEvent::NeedMoreData
    }

    /// Number of bytes queued but not yet processed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the parser is inside a candidate frame.
    pub fn in_frame(&self) -> bool {
        self.state != State::AwaitingSync
    }

    /// Drop all queued bytes and any partial frame.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.clear_frame();
    }

    fn clear_frame(&mut self) {
        self.state = State::AwaitingSync;
        self.frame.clear();
        self.crc = CrcAccumulator::new();
        self.payload_len = 0;
    }

    /// Discard the candidate frame and queue its bytes after the SYNC pair for re-scanning.
    fn reject(&mut self, event: ParseEvent) -> ParseEvent {
        trace!("Rejecting candidate frame ({} bytes): {:?}", self.frame.len(), event);
        for &byte in self.frame[2..].iter().rev() {
            self.pending.push_front(byte);
        }
        self.clear_frame();
        event
    }

    fn step(&mut self, byte: u8) -> ParseEvent {
        match self.state {
            State::AwaitingSync => {
                if byte == SYNC_1 {
                    self.frame.push(byte);
                    self.state = State::AwaitingSync2;
                }
            }
            State::AwaitingSync2 => {
                if byte == SYNC_2 {
                    self.frame.push(byte);
                    self.state = State::ReadingHeader;
                } else if byte != SYNC_1 {
                    self.clear_frame();
                }
            }
            State::ReadingHeader => {
                self.frame.push(byte);
                self.crc.update(byte);

                if self.frame.len() == PAYLOAD_OFFSET {
                    let len = u16::from_le_bytes([self.frame[4], self.frame[5]]) as usize;

                    if len > MAX_PAYLOAD_SIZE {
                        return self.reject(ParseEvent::FramingError(FramingFault::InvalidLength(
                            len,
                        )));
                    }

                    self.payload_len = len;
                    self.state = if len == 0 {
                        State::ReadingChecksum
                    } else {
                        State::ReadingPayload
                    };
                }
            }
            State::ReadingPayload => {
                self.frame.push(byte);
                self.crc.update(byte);

                if self.frame.len() == PAYLOAD_OFFSET + self.payload_len {
                    self.state = State::ReadingChecksum;
                }
            }
            State::ReadingChecksum => {
                self.frame.push(byte);

                let crc_end = PAYLOAD_OFFSET + self.payload_len + 2;
                if self.frame.len() == crc_end {
                    let stored = u16::from_le_bytes([self.frame[crc_end - 2], self.frame[crc_end - 1]]);
                    let computed = std::mem::take(&mut self.crc).finalize();

                    if stored != computed {
                        return self.reject(ParseEvent::ChecksumError { stored, computed });
                    }
                    self.state = State::ReadingEtx;
                }
            }
            State::ReadingEtx => {
                self.frame.push(byte);

                if byte != ETX {
                    return self.reject(ParseEvent::FramingError(FramingFault::InvalidEtx(byte)));
                }
                return self.complete();
            }
        }

        ParseEvent::NeedMoreData
    }

    fn complete(&mut self) -> ParseEvent {
        let msg_id = self.frame[2];
        let raw_class = self.frame[3];

        // Checked after the CRC so a flipped class bit is a checksum error
        if raw_class & EXTENDED_CLASS_FLAG != 0 && self.payload_len < EXTENDED_HEADER_SIZE {
            let len = self.payload_len;
            return self.reject(ParseEvent::FramingError(FramingFault::InvalidLength(len)));
        }

        let body = &self.frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + self.payload_len];

        let frame = if raw_class & EXTENDED_CLASS_FLAG == 0 {
            Frame {
                msg_class: raw_class,
                msg_id,
                payload: Bytes::copy_from_slice(body),
                page: None,
            }
        } else {
            let mut transfer_id = body[0];
            let page_index = u16::from_le_bytes([body[1], body[2]]);
            let page_count = u16::from_le_bytes([body[3], body[4]]);

            if transfer_id & 0xF0 != 0 {
                warn!("Reserved bits set in extended header: {:#x}", transfer_id);
                transfer_id &= 0x0F;
            }
            if page_index >= page_count {
                return self.reject(ParseEvent::FramingError(FramingFault::InvalidPage {
                    page_index,
                    page_count,
                }));
            }

            Frame {
                msg_class: raw_class & !EXTENDED_CLASS_FLAG,
                msg_id,
                payload: Bytes::copy_from_slice(&body[EXTENDED_HEADER_SIZE..]),
                page: Some(PageInfo {
                    transfer_id,
                    page_index,
                    page_count,
                }),
            }
        };

        self.clear_frame();
        ParseEvent::FrameComplete(frame)
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::compute_crc;
    use crate::protocol::frame::{encode, encode_extended, MAX_BUFFER_SIZE};

    /// Feed every byte, then drain the queue, collecting non-idle events.
    fn feed_all(parser: &mut FrameParser, data: &[u8]) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        for &b in data {
            let event = parser.feed_byte(b);
            if event != ParseEvent::NeedMoreData {
                events.push(event);
            }
        }
        loop {
            match parser.poll() {
                ParseEvent::NeedMoreData => break,
                event => events.push(event),
            }
        }
        events
    }

    fn frames(events: &[ParseEvent]) -> Vec<Frame> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::FrameComplete(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_frame_byte_by_byte() {
        let wire = encode(1, 2, &[0xAA, 0xBB]).unwrap();
        let mut parser = FrameParser::new();

        let events = feed_all(&mut parser, &wire);

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            ParseEvent::FrameComplete(Frame::new(1, 2, vec![0xAA, 0xBB]))
        );
        assert!(!parser.in_frame());
    }

    #[test]
    fn test_round_trip_payload_sizes() {
        let mut parser = FrameParser::new();
        for size in [0usize, 1, 2, 255, 256, 1024, MAX_PAYLOAD_SIZE] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let wire = encode(0x03, 0x7F, &payload).unwrap();
            let events = feed_all(&mut parser, &wire);
            assert_eq!(events, vec![ParseEvent::FrameComplete(Frame::new(0x03, 0x7F, payload))]);
        }
    }

    #[test]
    fn test_frames_separated_by_noise() {
        let first = encode(0x00, 0x01, &[1, 2, 3]).unwrap();
        let second = encode(0x10, 0x00, &[4, 0x10, 0, 0]).unwrap();
        let third = encode(0x02, 0x05, b"$GPGGA").unwrap();

        let mut stream = vec![0x00, 0x13, 0x5A, 0x33];
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&[0x42; 17]);
        stream.extend_from_slice(&second);
        stream.extend_from_slice(&third);
        stream.extend_from_slice(&[0x5A, 0x33, 0x01]);

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &stream);
        let decoded = frames(&events);

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], Frame::new(0x00, 0x01, vec![1, 2, 3]));
        assert_eq!(decoded[1], Frame::new(0x10, 0x00, vec![4, 0x10, 0, 0]));
        assert_eq!(decoded[2], Frame::new(0x02, 0x05, b"$GPGGA".to_vec()));
    }

    #[test]
    fn test_frame_recovered_from_inside_rejected_candidate() {
        let valid = encode(0x00, 0x30, &[9, 8, 7]).unwrap();

        // Fake header claiming a 20-byte payload that swallows the valid frame
        let mut stream = vec![SYNC_1, SYNC_2, 0x01, 0x00, 20, 0x00];
        stream.extend_from_slice(&valid);
        stream.extend_from_slice(&[0x00; 20]);

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &stream);

        assert!(matches!(events[0], ParseEvent::ChecksumError { .. }));
        assert_eq!(frames(&events), vec![Frame::new(0x00, 0x30, vec![9, 8, 7])]);
    }

    #[test]
    fn test_not_stuck_after_noise() {
        let mut parser = FrameParser::new();
        let noise: Vec<u8> = (0..2000u32).map(|i| (i * 37 % 251) as u8).collect();
        feed_all(&mut parser, &noise);

        let wire = encode(0x01, 0x02, &[0x10, 0x20]).unwrap();
        let events = feed_all(&mut parser, &wire);
        assert_eq!(frames(&events), vec![Frame::new(0x01, 0x02, vec![0x10, 0x20])]);
    }

    #[test]
    fn test_repeated_sync1_bytes() {
        let wire = encode(0x00, 0x02, &[0x01]).unwrap();
        let mut stream = vec![SYNC_1, SYNC_1, SYNC_1];
        stream.extend_from_slice(&wire);

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &stream);
        assert_eq!(frames(&events), vec![Frame::new(0x00, 0x02, vec![0x01])]);
    }

    #[test]
    fn test_single_bit_flip_reports_checksum_error() {
        let wire = encode(0x01, 0x02, &[0xAA, 0xBB, 0xCC]).unwrap();

        // Message ID, class and payload bytes; length and CRC fields excluded
        let covered = [2usize, 3, 6, 7, 8];
        for &index in &covered {
            for bit in 0..8 {
                let mut corrupted = wire.to_vec();
                corrupted[index] ^= 1 << bit;

                let mut parser = FrameParser::new();
                let events = feed_all(&mut parser, &corrupted);

                assert!(
                    matches!(events.first(), Some(ParseEvent::ChecksumError { .. })),
                    "byte {index} bit {bit}: {events:?}"
                );
                assert!(frames(&events).is_empty(), "byte {index} bit {bit}");
            }
        }
    }

    #[test]
    fn test_flipped_extended_bit_reports_checksum_error() {
        let mut wire = encode(0x01, 0x02, &[0xAA, 0xBB, 0xCC]).unwrap().to_vec();
        wire[3] |= EXTENDED_CLASS_FLAG;

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &wire);
        assert!(matches!(events.first(), Some(ParseEvent::ChecksumError { .. })));
        assert!(frames(&events).is_empty());
    }

    #[test]
    fn test_short_extended_header_rejected_after_crc() {
        let mut wire = vec![SYNC_1, SYNC_2, 0x02, 0x81, 0x03, 0x00, 0x01, 0x02, 0x03];
        let crc = compute_crc(&wire[2..]);
        wire.extend_from_slice(&crc.to_le_bytes());
        wire.push(ETX);

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &wire);
        assert_eq!(
            events[0],
            ParseEvent::FramingError(FramingFault::InvalidLength(3))
        );
        assert!(frames(&events).is_empty());
    }

    #[test]
    fn test_bad_etx_reports_framing_error() {
        let mut wire = encode(0x01, 0x02, &[0xAA]).unwrap().to_vec();
        let last = wire.len() - 1;
        wire[last] = 0x34;

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &wire);
        assert_eq!(
            events,
            vec![ParseEvent::FramingError(FramingFault::InvalidEtx(0x34))]
        );
    }

    #[test]
    fn test_oversize_length_rejected_then_resync() {
        let mut stream = vec![SYNC_1, SYNC_2, 0x01, 0x00, 0xFF, 0x0F];
        let valid = encode(0x00, 0x01, &[0x55]).unwrap();
        stream.extend_from_slice(&valid);

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &stream);

        assert_eq!(
            events[0],
            ParseEvent::FramingError(FramingFault::InvalidLength(0x0FFF))
        );
        assert_eq!(frames(&events), vec![Frame::new(0x00, 0x01, vec![0x55])]);
    }

    #[test]
    fn test_extended_frame_page_info() {
        let page = PageInfo {
            transfer_id: 7,
            page_index: 0,
            page_count: 3,
        };
        let wire = encode_extended(0x10, 0x03, page, &[1, 2, 3, 4]).unwrap();

        let mut parser = FrameParser::new();
        let events = feed_all(&mut parser, &wire);
        let decoded = frames(&events);

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].msg_class, 0x10);
        assert_eq!(decoded[0].msg_id, 0x03);
        assert_eq!(decoded[0].page, Some(page));
        assert_eq!(&decoded[0].payload[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_chunked_push_and_poll() {
        let a = encode(0x00, 0x01, &[1]).unwrap();
        let b = encode(0x00, 0x02, &[2]).unwrap();
        let mut chunk = a.to_vec();
        chunk.extend_from_slice(&b);

        let mut parser = FrameParser::new();
        parser.push(&chunk[..5]);
        assert_eq!(parser.poll(), ParseEvent::NeedMoreData);
        assert!(parser.in_frame());

        parser.push(&chunk[5..]);
        assert!(matches!(parser.poll(), ParseEvent::FrameComplete(f) if f.msg_id == 1));
        assert!(parser.pending_len() > 0);
        assert!(matches!(parser.poll(), ParseEvent::FrameComplete(f) if f.msg_id == 2));
        assert_eq!(parser.poll(), ParseEvent::NeedMoreData);
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let wire = encode(0x00, 0x01, &[1, 2, 3]).unwrap();
        let mut parser = FrameParser::new();
        parser.push(&wire[..7]);
        parser.poll();
        assert!(parser.in_frame());

        parser.reset();
        assert!(!parser.in_frame());
        assert_eq!(parser.pending_len(), 0);
        assert!(wire.len() < MAX_BUFFER_SIZE);
    }
}
