//! Per-connection diagnostic reporting.
//!
//! Conditions that are absorbed internally (corrupted frames, aborted large
//! transfers, unsolicited frames) are reported to a [`DiagnosticSink`] owned by
//! the connection instead of a process-wide logger. Each handle gets its own
//! sink, so tests can capture what happened on one connection only.

use std::sync::{Arc, Mutex};

use strum::Display;
use tracing::{debug, warn};

/// Category of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DiagnosticKind {
    /// A candidate frame failed its CRC
    ChecksumError,
    /// A candidate frame had an invalid length, ETX or page header
    FramingError,
    /// A large transfer was dropped before completion
    TransferAborted,
    /// A non-log frame arrived while nothing was waiting for it
    UnexpectedFrame,
    /// A log payload could not be decoded
    DecodeError,
    /// A command attempt failed and will be retried
    CommandRetry,
}

/// A single diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Receiver of diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Shared sink handle, cloned into every layer of a connection.
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Forwards diagnostics to `tracing`.
///
/// Line noise is expected on serial links, so framing problems are logged at
/// debug level; everything else is a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.kind {
            DiagnosticKind::ChecksumError | DiagnosticKind::FramingError => {
                debug!("{}: {}", diagnostic.kind, diagnostic.message);
            }
            _ => warn!("{}: {}", diagnostic.kind, diagnostic.message),
        }
    }
}

/// Stores every diagnostic in memory.
///
/// Clones share the same storage, so a clone can be handed to a connection
/// while the original is kept to inspect events.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<Diagnostic>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events collected so far.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of collected events of the given kind.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|d| d.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(diagnostic);
    }
}

/// Default sink used when none is supplied.
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}
