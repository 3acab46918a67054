//! Command/reply correlation on top of the framing layer.
//!
//! A device streams output logs on the same link that carries command replies,
//! so waiting for a reply is a classify-and-continue loop: every decoded frame
//! is either the awaited reply, an ACK for the pending command, or something
//! else that goes to the log callback. Frames are handled strictly in arrival
//! order and the deadline is never extended by unrelated traffic.
//!
//! The handle is single-flight: issue one command at a time. Share it between
//! threads behind a `Mutex` if needed.
//!
//! # Example
//!
//! ```no_run
//! use sbgecom::{EComHandle, SerialTransport, LogData};
//! use sbgecom::commands::{settings_action, SettingsAction};
//!
//! let transport = SerialTransport::open("/dev/ttyUSB0", 115_200)?;
//! let mut handle = EComHandle::new(transport);
//!
//! handle.set_receive_log_callback(|class, id, data| {
//!     if let LogData::Diag(diag) = data {
//!         println!("{class:#04x}/{id:#04x}: {}", diag.message);
//!     }
//! });
//!
//! settings_action(&mut handle, SettingsAction::SaveSettings)?;
//! handle.handle()?;
//! # Ok::<(), sbgecom::EComError>(())
//! ```

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::EComConfig;
use crate::diagnostics::{default_sink, Diagnostic, DiagnosticKind, SharedSink};
use crate::error::{EComError, EComResult, ErrorCode};
use crate::ids::{cmd, is_log_class, MsgClass};
use crate::logs::{LogCallback, LogData, LogRegistry};
use crate::protocol::{AckPayload, Frame, Protocol};
use crate::retry::retry;
use crate::transport::Transport;

/// Most frames processed by one [`EComHandle::handle`] call.
pub const MAX_FRAMES_PER_HANDLE: usize = 256;

/// What concludes a successful command attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// An ACK with a success status (set-style commands)
    Ack,
    /// A frame with the same class and ID as the command (get-style commands)
    Reply,
}

/// Connection to one device.
pub struct EComHandle<T: Transport> {
    protocol: Protocol<T>,
    registry: LogRegistry,
    callback: Option<LogCallback>,
    num_trials: u32,
    cmd_default_timeout: Duration,
    sink: SharedSink,
}

impl<T: Transport> EComHandle<T> {
    /// Open a handle with default retry settings and `tracing` diagnostics.
    pub fn new(transport: T) -> Self {
        let config = EComConfig::default();
        Self::build(transport, &config, default_sink())
    }

    /// Open a handle with the given retry settings.
    pub fn with_config(transport: T, config: &EComConfig) -> EComResult<Self> {
        Self::with_sink(transport, config, default_sink())
    }

    /// Open a handle reporting diagnostics to `sink`.
    pub fn with_sink(transport: T, config: &EComConfig, sink: SharedSink) -> EComResult<Self> {
        config.validate()?;
        Ok(Self::build(transport, config, sink))
    }

    fn build(transport: T, config: &EComConfig, sink: SharedSink) -> Self {
        Self {
            protocol: Protocol::with_sink(transport, sink.clone()),
            registry: LogRegistry::default(),
            callback: None,
            num_trials: config.num_trials,
            cmd_default_timeout: config.default_timeout(),
            sink,
        }
    }

    /// Install the callback receiving every log frame not consumed as a reply.
    ///
    /// Replaces any previous callback. User context is whatever the closure
    /// captures.
    pub fn set_receive_log_callback<F>(&mut self, callback: F)
    where
        F: FnMut(u8, u8, &LogData) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn clear_receive_log_callback(&mut self) {
        self.callback = None;
    }

    pub fn registry(&self) -> &LogRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut LogRegistry {
        &mut self.registry
    }

    /// Set the retry budget used by [`set_command`](Self::set_command) and
    /// [`get_command`](Self::get_command).
    ///
    /// # Errors
    ///
    /// [`EComError::InvalidParameter`] if either value is zero.
    pub fn set_cmd_trials_and_timeout(&mut self, num_trials: u32, timeout: Duration) -> EComResult<()> {
        if num_trials == 0 || timeout.is_zero() {
            return Err(EComError::InvalidParameter(format!(
                "trials ({num_trials}) and timeout ({timeout:?}) must be non-zero"
            )));
        }
        self.num_trials = num_trials;
        self.cmd_default_timeout = timeout;
        Ok(())
    }

    pub fn num_trials(&self) -> u32 {
        self.num_trials
    }

    pub fn cmd_default_timeout(&self) -> Duration {
        self.cmd_default_timeout
    }

    pub fn protocol(&self) -> &Protocol<T> {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut Protocol<T> {
        &mut self.protocol
    }

    /// Close the handle and return its transport.
    pub fn into_transport(self) -> T {
        self.protocol.into_transport()
    }

    /// Discard all pending input. See [`Protocol::purge_incoming`].
    pub fn purge_incoming(&mut self) -> EComResult<()> {
        self.protocol.purge_incoming()
    }

    /// Encode and write one command frame. No retry at this level.
    pub fn send_command(&mut self, msg_class: u8, msg_id: u8, payload: &[u8]) -> EComResult<()> {
        self.protocol.send(msg_class, msg_id, payload)
    }

    /// Write an ACK for `(msg_class, msg_id)` carrying `code`.
    ///
    /// This is what a device sends; it is used by simulators and tests.
    pub fn send_ack(&mut self, msg_class: u8, msg_id: u8, code: ErrorCode) -> EComResult<()> {
        let ack = AckPayload::new(msg_class, msg_id, code);
        self.protocol
            .send(MsgClass::Cmd0.as_u8(), cmd::ACK, ack.as_bytes())
    }

    /// Wait for the frame `(msg_class, msg_id)` and return its payload.
    ///
    /// Other frames are dispatched to the log callback while waiting. An ACK
    /// for the same command ends the wait: with a failure status that status
    /// is returned, and with a success status [`ErrorCode::Error`] is returned
    /// because the caller expected data, not an acknowledgement.
    ///
    /// # Errors
    ///
    /// [`EComError::TimedOut`], [`EComError::Ack`], or a transport read error.
    pub fn receive_reply(&mut self, msg_class: u8, msg_id: u8, timeout: Duration) -> EComResult<Bytes> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut frame = match self.protocol.receive_frame(remaining) {
                Ok(frame) => frame,
                Err(EComError::NotReady) => return Err(EComError::TimedOut),
                Err(e) => return Err(e),
            };

            if frame.is(msg_class, msg_id) {
                trace!("Reply {:#04x}/{:#04x} received", msg_class, msg_id);
                return Ok(frame.take_payload());
            }

            if frame.is_ack() {
                if let Ok(ack) = AckPayload::parse(&frame.payload) {
                    if ack.acknowledges(msg_class, msg_id) {
                        let code = ack.code();
                        debug!("Command {:#04x}/{:#04x} acknowledged with {}", msg_class, msg_id, code);
                        return Err(EComError::Ack {
                            code: if code.is_success() { ErrorCode::Error } else { code },
                        });
                    }
                }
            }

            self.dispatch(&frame);
            if Instant::now() >= deadline {
                return Err(EComError::TimedOut);
            }
        }
    }

    /// Like [`receive_reply`](Self::receive_reply), copying the payload into `buf`.
    ///
    /// # Errors
    ///
    /// [`EComError::BufferOverflow`] if the payload does not fit in `buf`.
    pub fn receive_reply_into(
        &mut self,
        msg_class: u8,
        msg_id: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> EComResult<usize> {
        let payload = self.receive_reply(msg_class, msg_id, timeout)?;
        if payload.len() > buf.len() {
            return Err(EComError::BufferOverflow {
                size: payload.len(),
                capacity: buf.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    /// Wait for the ACK of command `(msg_class, msg_id)`.
    ///
    /// # Errors
    ///
    /// [`EComError::Ack`] with the device status if it is not a success,
    /// [`EComError::InvalidFrame`] if the first ACK received is malformed or
    /// acknowledges another command, [`EComError::TimedOut`] if none arrives.
    pub fn wait_for_ack(&mut self, msg_class: u8, msg_id: u8, timeout: Duration) -> EComResult<()> {
        let payload = self.receive_reply(MsgClass::Cmd0.as_u8(), cmd::ACK, timeout)?;
        let ack = AckPayload::parse(&payload)?;

        if !ack.acknowledges(msg_class, msg_id) {
            warn!(
                "Received ACK mismatch: expecting {:#04x}:{:#04x} got {:#04x}:{:#04x}",
                msg_class,
                msg_id,
                { ack.msg_class },
                { ack.msg_id }
            );
            return Err(EComError::InvalidFrame(format!(
                "ACK for {:#04x}:{:#04x} while waiting for {:#04x}:{:#04x}",
                { ack.msg_class },
                { ack.msg_id },
                msg_class,
                msg_id
            )));
        }

        match ack.code() {
            code if code.is_success() => Ok(()),
            code => Err(EComError::Ack { code }),
        }
    }

    /// Return the next frame that is not an output log.
    ///
    /// Logs received on the way are dispatched. The deadline holds even while
    /// logs keep arriving. With a zero `timeout` at most one frame is examined
    /// and [`EComError::NotReady`] is returned if it was a log.
    pub fn receive_any(&mut self, timeout: Duration) -> EComResult<Frame> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = match self.protocol.receive_frame(remaining) {
                Ok(frame) => frame,
                Err(EComError::NotReady) if !timeout.is_zero() => return Err(EComError::TimedOut),
                Err(e) => return Err(e),
            };

            if !is_log_class(frame.msg_class) {
                return Ok(frame);
            }
            self.dispatch(&frame);
            if Instant::now() >= deadline {
                return Err(if timeout.is_zero() {
                    EComError::NotReady
                } else {
                    EComError::TimedOut
                });
            }
        }
    }

    /// Process at most one received frame without waiting.
    ///
    /// # Errors
    ///
    /// [`EComError::NotReady`] if no frame is available.
    pub fn handle_one_log(&mut self) -> EComResult<()> {
        let frame = self.protocol.receive_frame(Duration::ZERO)?;

        if is_log_class(frame.msg_class) {
            self.dispatch(&frame);
        } else {
            self.report(
                DiagnosticKind::UnexpectedFrame,
                format!(
                    "unsolicited frame {:#04x}/{:#04x} ({} bytes)",
                    frame.msg_class,
                    frame.msg_id,
                    frame.payload.len()
                ),
            );
        }
        Ok(())
    }

    /// Process the frames already received, up to [`MAX_FRAMES_PER_HANDLE`].
    ///
    /// Returns once no frame is available or the limit is reached, so a link
    /// that never goes quiet cannot stall the caller.
    pub fn handle(&mut self) -> EComResult<()> {
        for _ in 0..MAX_FRAMES_PER_HANDLE {
            match self.handle_one_log() {
                Ok(()) => continue,
                Err(EComError::NotReady) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        trace!("Frame limit reached, remaining input left for the next call");
        Ok(())
    }

    /// Send a command and wait for its ACK or reply, retrying per the policy of
    /// [`EComError::is_retryable`].
    ///
    /// Returns the reply payload, or an empty payload for [`Expect::Ack`].
    pub fn execute_command(
        &mut self,
        msg_class: u8,
        msg_id: u8,
        payload: &[u8],
        expect: Expect,
        num_trials: u32,
        timeout: Duration,
    ) -> EComResult<Bytes> {
        retry(num_trials, |trial| {
            if trial > 1 {
                self.report(
                    DiagnosticKind::CommandRetry,
                    format!("command {msg_class:#04x}/{msg_id:#04x} attempt {trial}/{num_trials}"),
                );
            }

            self.send_command(msg_class, msg_id, payload)?;
            match expect {
                Expect::Ack => self
                    .wait_for_ack(msg_class, msg_id, timeout)
                    .map(|()| Bytes::new()),
                Expect::Reply => self.receive_reply(msg_class, msg_id, timeout),
            }
        })
    }

    /// Send a set-style command with the handle's retry settings.
    pub fn set_command(&mut self, msg_class: u8, msg_id: u8, payload: &[u8]) -> EComResult<()> {
        let (trials, timeout) = (self.num_trials, self.cmd_default_timeout);
        self.execute_command(msg_class, msg_id, payload, Expect::Ack, trials, timeout)
            .map(|_| ())
    }

    /// Send a get-style command with the handle's retry settings.
    pub fn get_command(&mut self, msg_class: u8, msg_id: u8, payload: &[u8]) -> EComResult<Bytes> {
        let (trials, timeout) = (self.num_trials, self.cmd_default_timeout);
        self.execute_command(msg_class, msg_id, payload, Expect::Reply, trials, timeout)
    }

    /// Decode a frame and hand it to the log callback.
    fn dispatch(&mut self, frame: &Frame) {
        let Some(callback) = self.callback.as_mut() else {
            trace!("No callback for {:#04x}/{:#04x}", frame.msg_class, frame.msg_id);
            return;
        };

        let data = match self
            .registry
            .decode(frame.msg_class, frame.msg_id, &frame.payload)
        {
            Ok(data) => data,
            Err(e) => {
                self.sink.report(Diagnostic::new(
                    DiagnosticKind::DecodeError,
                    format!("{:#04x}/{:#04x}: {e}", frame.msg_class, frame.msg_id),
                ));
                LogData::Raw(frame.payload.clone())
            }
        };

        callback(frame.msg_class, frame.msg_id, &data);
    }

    fn report(&self, kind: DiagnosticKind, message: String) {
        self.sink.report(Diagnostic::new(kind, message));
    }
}
