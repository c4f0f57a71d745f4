use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default capacity of the sync log ring.
const DEFAULT_CAPACITY: usize = 1000;

/// Kind of sync log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogKind {
    Upload,
    Download,
    Conflict,
    Delete,
    Error,
    Info,
}

/// One observability record. Never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: SyncLogKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// Append-only, capacity-bounded ring of sync activity.
pub struct SyncLog {
    capacity: usize,
    entries: Mutex<VecDeque<SyncLogEntry>>,
}

impl SyncLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SyncLog {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    /// Append an entry, dropping the oldest once at capacity.
    pub fn append(
        &self,
        kind: SyncLogKind,
        message: impl Into<String>,
        document_id: Option<&str>,
    ) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(SyncLogEntry {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            document_id: document_id.map(str::to_string),
        });
    }

    /// The most recent `n` entries, newest last.
    pub fn recent(&self, n: usize) -> Vec<SyncLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SyncLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_recent() {
        let log = SyncLog::new();
        log.append(SyncLogKind::Upload, "uploaded doc-1", Some("doc-1"));
        log.append(SyncLogKind::Download, "downloaded doc-2", Some("doc-2"));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, SyncLogKind::Upload);
        assert_eq!(recent[1].document_id.as_deref(), Some("doc-2"));
    }

    #[test]
    fn test_capacity_bound() {
        let log = SyncLog::with_capacity(3);
        for i in 0..10 {
            log.append(SyncLogKind::Info, format!("event {}", i), None);
        }
        assert_eq!(log.len(), 3);
        let recent = log.recent(3);
        assert_eq!(recent[0].message, "event 7");
        assert_eq!(recent[2].message, "event 9");
    }

    #[test]
    fn test_recent_fewer_than_asked() {
        let log = SyncLog::new();
        log.append(SyncLogKind::Error, "one", None);
        assert_eq!(log.recent(100).len(), 1);
    }
}
