//! Structured lifecycle logging.
//!
//! Every notable decision across the bitmap, allocator, write pipeline,
//! resolver, and scavenger emits one [`LogRecord`] rather than a free-text
//! line. The sink that does something with these records (a file, an audit
//! log, a metrics exporter) is an external collaborator — this crate only
//! defines the record shape, the [`LogSink`] trait, and a trivial in-memory
//! sink used by tests and the harness.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Monotonic, process-wide decision id (see [`next_decision_id`]).
    pub decision_id: u64,
    /// Correlation id for the call chain this event belongs to (e.g. one
    /// write-pipeline invocation end to end).
    pub trace_id: u64,
    pub level: LogLevel,
    /// Which component emitted this: `"bitmap"`, `"allocator"`,
    /// `"write_pipeline"`, `"resolver"`, `"scavenger:reaper"`, ...
    pub component: &'static str,
    /// Event kind: `"heal"`, `"cas_retry"`, `"eclipse"`, `"rollback"`, ...
    pub event: &'static str,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
}

static NEXT_DECISION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-wide monotonic decision id.
pub fn next_decision_id() -> u64 {
    NEXT_DECISION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where structured lifecycle records go. Implemented externally in
/// production (Chronicle log, a metrics sink); [`NullSink`] and
/// [`RecordingSink`] are the two trivial implementations this crate ships
/// for production-passthrough and test-assertion use respectively.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: LogRecord);
}

/// Discards every record. The default sink when nothing else is wired up.
#[derive(Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _record: LogRecord) {}
}

/// Keeps every record in memory, for tests and the conformance harness to
/// assert against.
#[derive(Default)]
pub struct RecordingSink {
    records: parking_lot::Mutex<Vec<LogRecord>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn drain(&self) -> Vec<LogRecord> {
        std::mem::take(&mut self.records.lock())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl LogSink for RecordingSink {
    fn emit(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}
