//! Structured cache diagnostics.
//!
//! Every recovered failure and notable non-error outcome in the cache layer is
//! emitted as a `tracing` event carrying `error_kind` and `key` fields, and is
//! also retained in a bounded in-memory ring so callers (tests, the admin
//! surface) can inspect what happened without scraping logs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::diagnostics";
const DEFAULT_CAPACITY: usize = 256;

/// Key-value store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    SetIfAbsent,
    Delete,
    Scan,
}

impl StoreOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::SetIfAbsent => "set_if_absent",
            Self::Delete => "delete",
            Self::Scan => "scan",
        }
    }
}

/// Classification of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// The key-value backend failed; the operation degraded to its neutral result.
    BackendError(StoreOp),
    /// A stored value could not be decoded and was treated as a miss.
    CorruptEntry,
    /// A refresh was skipped because another holder owns the lock.
    LockContention,
    /// The content source reported the item as gone.
    SourceNotFound,
    /// The content source failed for any other reason.
    SourceTransient,
    /// A background refresh failed and the stale entry was kept.
    RefreshFailed,
    /// A refresh job was discarded because the queue was full.
    RefreshDropped,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackendError(_) => "cache_backend_error",
            Self::CorruptEntry => "corrupt_entry",
            Self::LockContention => "lock_contention",
            Self::SourceNotFound => "source_not_found",
            Self::SourceTransient => "source_transient_error",
            Self::RefreshFailed => "refresh_failed",
            Self::RefreshDropped => "refresh_dropped",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendError(op) => write!(f, "{}:{}", self.as_str(), op.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A recorded diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Monotonic sequence number within this process.
    pub seq: u64,
    pub kind: DiagnosticKind,
    pub key: String,
    pub detail: Option<String>,
    pub at: OffsetDateTime,
}

/// Bounded ring of recent diagnostics.
pub struct Diagnostics {
    ring: Mutex<VecDeque<Diagnostic>>,
    capacity: usize,
    seq: AtomicU64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
        }
    }

    /// Emit and retain a diagnostic.
    pub fn record(&self, kind: DiagnosticKind, key: &str, detail: Option<String>) {
        let detail_str = detail.as_deref().unwrap_or("");
        match kind {
            DiagnosticKind::LockContention => {
                debug!(error_kind = kind.as_str(), key, "refresh lock held elsewhere")
            }
            DiagnosticKind::SourceNotFound => {
                info!(error_kind = kind.as_str(), key, "content source reported not found")
            }
            DiagnosticKind::BackendError(op) => warn!(
                error_kind = kind.as_str(),
                op = op.as_str(),
                key,
                detail = detail_str,
                "cache backend operation failed"
            ),
            _ => warn!(error_kind = kind.as_str(), key, detail = detail_str, "cache diagnostic"),
        }

        let diagnostic = Diagnostic {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            kind,
            key: key.to_string(),
            detail,
            at: OffsetDateTime::now_utc(),
        };

        let mut ring = mutex_lock(&self.ring, SOURCE, "record");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(diagnostic);
    }

    /// Copy of the retained diagnostics, oldest first.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        mutex_lock(&self.ring, SOURCE, "snapshot").iter().cloned().collect()
    }

    /// Number of retained diagnostics matching `kind`.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        mutex_lock(&self.ring, SOURCE, "count")
            .iter()
            .filter(|d| d.kind == kind)
            .count()
    }

    /// Number of retained diagnostics whose kind satisfies `predicate`.
    pub fn count_where(&self, predicate: impl Fn(DiagnosticKind) -> bool) -> usize {
        mutex_lock(&self.ring, SOURCE, "count_where")
            .iter()
            .filter(|d| predicate(d.kind))
            .count()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.ring, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.ring, SOURCE, "clear").clear();
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
