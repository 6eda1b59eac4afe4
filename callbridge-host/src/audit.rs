//! Audit trail for call correlation events
//!
//! Records permission requests, resolutions, rejections, dropped stale
//! responses and snapshot activity. Sinks are pluggable; recording failures
//! are logged by the engine and never affect call handling.

use callbridge_api::{CallId, PermissionStates, RequestId};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// RFC 3339 timestamp
pub type Timestamp = String;

/// One step of a call's life
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: Timestamp,
    pub event_type: AuditEventType,
    pub plugin: String,
    /// Operation that created the call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<CallId>,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, plugin: impl Into<String>, details: AuditDetails) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            plugin: plugin.into(),
            method: None,
            call: None,
            details,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_call(mut self, call: &CallId) -> Self {
        self.call = Some(call.clone());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PermissionRequested,
    PermissionResolved,
    CallRejected,
    StaleResponseDropped,
    EventRetained,
    ActivityLaunched,
    SnapshotSaved,
    SnapshotRestored,
}

/// Event-specific payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Request {
        request: RequestId,
        identifiers: Vec<String>,
    },
    /// `request` is absent for auto-granted results
    Resolved {
        #[serde(skip_serializing_if = "Option::is_none")]
        request: Option<RequestId>,
        states: PermissionStates,
    },
    Rejected {
        reason: String,
    },
    Stale {
        request: RequestId,
    },
    Event {
        name: String,
    },
    Activity {
        request: RequestId,
        call: String,
    },
    Snapshot {
        bytes: usize,
    },
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode audit event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination of audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Push buffered events out; called on engine teardown
    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        (**self).record(event)
    }

    fn flush(&self) -> Result<(), AuditError> {
        (**self).flush()
    }
}

// ============================================================================
// JSON Lines file
// ============================================================================

/// Appends one JSON object per line
pub struct FileAuditSink {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Open (or create) the log, creating parent directories as needed
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let line = serde_json::to_string(&event)?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        Ok(())
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// In-memory ring (for testing)
// ============================================================================

/// Keeps the most recent events, oldest evicted first
pub struct MemoryAuditSink {
    ring: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditSink {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
            capacity,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }

    /// Events concerning one call, oldest first
    pub fn for_call(&self, call: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.call.as_ref().is_some_and(|id| id.as_str() == call))
            .collect()
    }

    pub fn clear(&self) {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        while ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("len", &self.count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Fans each event out to several sinks
///
/// A failing sink does not stop the others; the first error is returned.
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    fn each(&self, mut f: impl FnMut(&dyn AuditSink) -> Result<(), AuditError>) -> Result<(), AuditError> {
        let mut first = None;
        for sink in &self.sinks {
            if let Err(e) = f(sink.as_ref()) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.each(|sink| sink.record(event.clone()))
    }

    fn flush(&self) -> Result<(), AuditError> {
        self.each(|sink| sink.flush())
    }
}

impl fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

// ============================================================================
// Event constructors
// ============================================================================

pub fn permission_requested(
    plugin: &str,
    method: &str,
    request: RequestId,
    identifiers: &[String],
) -> AuditEvent {
    let details = AuditDetails::Request {
        request,
        identifiers: identifiers.to_vec(),
    };
    AuditEvent::new(AuditEventType::PermissionRequested, plugin, details).with_method(method)
}

pub fn permission_resolved(
    plugin: &str,
    method: &str,
    request: Option<RequestId>,
    states: &PermissionStates,
) -> AuditEvent {
    let details = AuditDetails::Resolved {
        request,
        states: states.clone(),
    };
    AuditEvent::new(AuditEventType::PermissionResolved, plugin, details).with_method(method)
}

pub fn call_rejected(plugin: &str, method: &str, reason: &str) -> AuditEvent {
    let details = AuditDetails::Rejected {
        reason: reason.to_string(),
    };
    AuditEvent::new(AuditEventType::CallRejected, plugin, details).with_method(method)
}

pub fn stale_response(plugin: &str, request: RequestId) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::StaleResponseDropped,
        plugin,
        AuditDetails::Stale { request },
    )
}
