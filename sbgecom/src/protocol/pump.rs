//! Receive pump and frame sender.
//!
//! [`Protocol`] owns a [`Transport`] and a [`FrameParser`]. Reads are polled:
//! when the transport has nothing to offer the pump sleeps for
//! [`POLL_INTERVAL`] and tries again until the deadline. The deadline is
//! checked against the wall clock on every iteration.
//!
//! Extended pages are reassembled here, so callers only ever see complete
//! frames.

use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, trace};

use super::frame::{
    encode, encode_extended, Frame, PageInfo, MAX_BUFFER_SIZE, MAX_EXTENDED_PAYLOAD_SIZE,
    MAX_PAYLOAD_SIZE,
};
use super::parser::{FrameParser, ParseEvent};
use crate::diagnostics::{default_sink, Diagnostic, DiagnosticKind, SharedSink};
use crate::error::{EComError, EComResult};
use crate::transport::Transport;

/// Sleep between two empty reads.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How long [`Protocol::purge_incoming`] drains the transport.
pub const PURGE_DURATION: Duration = Duration::from_millis(100);

/// Back-off when the transport cannot accept an extended page yet.
const WOULD_BLOCK_DELAY: Duration = Duration::from_millis(50);

/// Largest number of pages in one large transfer.
pub const MAX_TRANSFER_PAGES: usize = u16::MAX as usize;

/// Counters maintained by the pump.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolStats {
    /// Valid frames decoded, extended pages included
    pub frames: u64,
    pub checksum_errors: u64,
    pub framing_errors: u64,
    /// Large transfers dropped before completion
    pub aborted_transfers: u64,
}

/// Reassembly state of an incoming large transfer.
struct LargeTransfer {
    msg_class: u8,
    msg_id: u8,
    transfer_id: u8,
    page_count: u16,
    next_page: u16,
    data: BytesMut,
}

impl LargeTransfer {
    fn start(frame: &Frame, page: PageInfo) -> Self {
        Self {
            msg_class: frame.msg_class,
            msg_id: frame.msg_id,
            transfer_id: page.transfer_id,
            page_count: page.page_count,
            next_page: 0,
            data: BytesMut::with_capacity(frame.payload.len()),
        }
    }

    /// Append a page. Returns `Ok(true)` once the last page is in.
    fn append(&mut self, frame: &Frame, page: PageInfo) -> Result<bool, String> {
        if frame.msg_class != self.msg_class {
            return Err(format!("message class mismatch ({:#04x})", frame.msg_class));
        }
        if frame.msg_id != self.msg_id {
            return Err(format!("message ID mismatch ({:#04x})", frame.msg_id));
        }
        if page.transfer_id != self.transfer_id {
            return Err(format!("transfer ID mismatch ({})", page.transfer_id));
        }
        if page.page_count != self.page_count {
            return Err(format!("page count mismatch ({})", page.page_count));
        }
        if page.page_index != self.next_page {
            return Err(format!(
                "page {} received out of sequence, expected {}",
                page.page_index, self.next_page
            ));
        }

        self.data.extend_from_slice(&frame.payload);
        self.next_page += 1;
        Ok(self.next_page == self.page_count)
    }

    fn into_frame(self) -> Frame {
        Frame::new(self.msg_class, self.msg_id, self.data.freeze())
    }
}

/// Frame-level access to a transport.
pub struct Protocol<T: Transport> {
    transport: T,
    parser: FrameParser,
    rx_buf: Vec<u8>,
    transfer: Option<LargeTransfer>,
    next_transfer_id: u8,
    stats: ProtocolStats,
    sink: SharedSink,
}

impl<T: Transport> Protocol<T> {
    /// Wrap a transport, reporting diagnostics to `tracing`.
    pub fn new(transport: T) -> Self {
        Self::with_sink(transport, default_sink())
    }

    /// Wrap a transport with a dedicated diagnostic sink.
    pub fn with_sink(transport: T, sink: SharedSink) -> Self {
        debug!("Protocol opened on {}", transport.name());
        Self {
            transport,
            parser: FrameParser::new(),
            rx_buf: vec![0u8; MAX_BUFFER_SIZE],
            transfer: None,
            next_transfer_id: 0,
            stats: ProtocolStats::default(),
            sink,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport. Buffered bytes and partial frames are lost.
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn stats(&self) -> ProtocolStats {
        self.stats
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Send a single standard frame.
    ///
    /// # Errors
    ///
    /// [`EComError::PayloadTooLarge`] before any I/O if the payload does not
    /// fit, [`EComError::Write`] if the transport fails.
    pub fn send(&mut self, msg_class: u8, msg_id: u8, payload: &[u8]) -> EComResult<()> {
        let wire = encode(msg_class, msg_id, payload)?;
        trace!(
            "send {:#04x}/{:#04x} ({} bytes payload)",
            msg_class,
            msg_id,
            payload.len()
        );
        self.transport.write_all(&wire).map_err(EComError::Write)
    }

    /// Send a payload of any size up to [`MAX_TRANSFER_PAGES`] extended pages.
    ///
    /// Payloads that fit in a standard frame are sent as one.
    pub fn send_large(&mut self, msg_class: u8, msg_id: u8, payload: &[u8]) -> EComResult<()> {
        if payload.len() <= MAX_PAYLOAD_SIZE {
            return self.send(msg_class, msg_id, payload);
        }

        let page_count = payload.len().div_ceil(MAX_EXTENDED_PAYLOAD_SIZE);
        if page_count > MAX_TRANSFER_PAGES {
            return Err(EComError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_TRANSFER_PAGES * MAX_EXTENDED_PAYLOAD_SIZE,
            });
        }

        let transfer_id = self.allocate_transfer_id();
        debug!(
            "Large transfer {} for {:#04x}/{:#04x}: {} bytes in {} pages",
            transfer_id,
            msg_class,
            msg_id,
            payload.len(),
            page_count
        );

        for (index, chunk) in payload.chunks(MAX_EXTENDED_PAYLOAD_SIZE).enumerate() {
            let page = PageInfo {
                transfer_id,
                page_index: index as u16,
                page_count: page_count as u16,
            };
            let wire = encode_extended(msg_class, msg_id, page, chunk)?;

            loop {
                match self.transport.write_all(&wire) {
                    Ok(()) => break,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        trace!("Transport busy, retrying page {}", index);
                        thread::sleep(WOULD_BLOCK_DELAY);
                    }
                    Err(e) => return Err(EComError::Write(e)),
                }
            }
        }
        Ok(())
    }

    fn allocate_transfer_id(&mut self) -> u8 {
        let id = self.next_transfer_id;
        self.next_transfer_id = (id + 1) & 0x0F;
        id
    }

    /// Receive the next complete frame.
    ///
    /// With a zero `timeout` the transport is read at most once and
    /// [`EComError::NotReady`] is returned if no frame is available, even when
    /// the read returned bytes.
    ///
    /// # Errors
    ///
    /// [`EComError::TimedOut`] when the deadline passes, [`EComError::Read`] on
    /// a hard transport failure.
    pub fn receive_frame(&mut self, timeout: Duration) -> EComResult<Frame> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(frame) = self.next_frame() {
                return Ok(frame);
            }

            let read = self
                .transport
                .read(&mut self.rx_buf)
                .map_err(EComError::Read)?;

            if read > 0 {
                self.parser.push(&self.rx_buf[..read]);
                if let Some(frame) = self.next_frame() {
                    return Ok(frame);
                }
            }

            if timeout.is_zero() {
                return Err(EComError::NotReady);
            }
            if Instant::now() >= deadline {
                return Err(EComError::TimedOut);
            }
            if read == 0 {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Drain the parser until it yields a frame for the caller.
    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.parser.poll() {
                ParseEvent::NeedMoreData => return None,
                ParseEvent::FrameComplete(frame) => {
                    self.stats.frames += 1;
                    if let Some(frame) = self.accept(frame) {
                        return Some(frame);
                    }
                }
                ParseEvent::ChecksumError { stored, computed } => {
                    self.stats.checksum_errors += 1;
                    self.report(
                        DiagnosticKind::ChecksumError,
                        format!("invalid CRC: stored {stored:#06x}, computed {computed:#06x}"),
                    );
                }
                ParseEvent::FramingError(fault) => {
                    self.stats.framing_errors += 1;
                    self.report(DiagnosticKind::FramingError, format!("{fault:?}"));
                }
            }
        }
    }

    /// Pass standard frames through; collect extended pages.
    fn accept(&mut self, frame: Frame) -> Option<Frame> {
        let Some(page) = frame.page else {
            return Some(frame);
        };

        if page.page_index == 0 {
            if self.transfer.is_some() {
                self.abort_transfer("new large transfer started while one is in progress".into());
            }
            self.transfer = Some(LargeTransfer::start(&frame, page));
        }

        let outcome = match self.transfer.as_mut() {
            Some(transfer) => transfer.append(&frame, page),
            None => Err(format!(
                "page {}/{} received with no large transfer in progress",
                page.page_index, page.page_count
            )),
        };

        match outcome {
            Ok(true) => self.transfer.take().map(LargeTransfer::into_frame),
            Ok(false) => None,
            Err(reason) => {
                self.abort_transfer(reason);
                None
            }
        }
    }

    fn abort_transfer(&mut self, reason: String) {
        self.transfer = None;
        self.stats.aborted_transfers += 1;
        self.report(DiagnosticKind::TransferAborted, reason);
    }

    fn report(&self, kind: DiagnosticKind, message: String) {
        self.sink.report(Diagnostic::new(kind, message));
    }

    /// Discard everything buffered or in flight on the input side.
    ///
    /// Parser and reassembly state are reset, then the transport is drained for
    /// [`PURGE_DURATION`].
    ///
    /// # Errors
    ///
    /// [`EComError::PurgeFailed`] if the last read still returned data.
    pub fn purge_incoming(&mut self) -> EComResult<()> {
        self.parser.reset();
        self.transfer = None;
        self.next_transfer_id = 0;

        let start = Instant::now();
        let mut last_read = 0;

        while start.elapsed() < PURGE_DURATION {
            last_read = self
                .transport
                .read(&mut self.rx_buf)
                .map_err(EComError::Read)?;
            if last_read == 0 {
                thread::sleep(POLL_INTERVAL);
            }
        }

        if last_read != 0 {
            return Err(EComError::PurgeFailed(last_read));
        }
        Ok(())
    }
}
