//! In-memory transport for tests and simulations.
//!
//! [`MockTransport`] serves reads from a queue and records every write. An
//! optional responder closure runs on each write and can queue a reply, which
//! is enough to script a device: answer only the third attempt, stream logs
//! before the reply, NACK a command, and so on.
//!
//! [`MockProbe`] shares the transport state, so a test keeps inspecting and
//! feeding the link after the transport itself has moved into a handle.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::Transport;

/// Closure run on each write; returned bytes are queued for reading.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    write_failure: Option<io::ErrorKind>,
    read_errors: VecDeque<io::ErrorKind>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted transport.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    responder: Option<Responder>,
    max_read: usize,
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a transport and the probe attached to it.
    pub fn new() -> (Self, MockProbe) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let transport = Self {
            state: Arc::clone(&state),
            responder: None,
            max_read: usize::MAX,
        };
        (transport, MockProbe { state })
    }

    /// Run `responder` on every successful write.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Limit the number of bytes returned by a single read.
    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        {
            let mut state = lock(&self.state);
            if let Some(kind) = state.write_failure {
                return Err(io::Error::new(kind, "mock write failure"));
            }
            state.writes.push(data.to_vec());
        }

        if let Some(responder) = self.responder.as_mut() {
            let reply = responder(data);
            lock(&self.state).rx.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if let Some(kind) = state.read_errors.pop_front() {
            return Err(io::Error::new(kind, "mock read failure"));
        }

        let count = buf.len().min(state.rx.len()).min(self.max_read);
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

impl MockProbe {
    /// Queue bytes for the transport to return from `read`.
    pub fn queue_rx(&self, data: &[u8]) {
        lock(&self.state).rx.extend(data);
    }

    /// Bytes queued but not read yet.
    pub fn rx_len(&self) -> usize {
        lock(&self.state).rx.len()
    }

    /// Every buffer written so far, one entry per `write_all` call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.state).writes.len()
    }

    /// Make subsequent writes fail with `kind`, or succeed again with `None`.
    pub fn set_write_failure(&self, kind: Option<io::ErrorKind>) {
        lock(&self.state).write_failure = kind;
    }

    /// Make the next read fail once with `kind`.
    pub fn inject_read_error(&self, kind: io::ErrorKind) {
        lock(&self.state).read_errors.push_back(kind);
    }
}
