//! Event history: tagged, timestamped, capacity-bounded logs
//!
//! Each session owns one [`EventLog`]; every session-level event is also
//! mirrored into the registry's global log. Appends are synchronous and
//! never fail; at capacity the oldest entry is evicted (FIFO).

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Per-session log capacity
pub const SESSION_LOG_CAPACITY: usize = 500;

/// Global log capacity
pub const GLOBAL_LOG_CAPACITY: usize = 1000;

/// Severity/category tag attached to every log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTag {
    Info,
    Ok,
    Warn,
    Error,
    Data,
}

/// One immutable log entry
#[derive(Debug, Clone, Serialize)]
pub struct EventEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub tag: EventTag,
    pub source: Option<String>,
}

/// Append-only bounded event log.
///
/// Entries are in insertion order, which is also chronological order;
/// the log is never reordered or edited.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: Mutex<VecDeque<EventEntry>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append one entry, evicting the oldest when at capacity
    pub fn append(&self, tag: EventTag, message: impl Into<String>, source: Option<&str>) {
        let entry = EventEntry {
            timestamp: Utc::now(),
            message: message.into(),
            tag,
            source: source.map(str::to_owned),
        };

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy of the current entries, newest last
    pub fn snapshot(&self) -> Vec<EventEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Revision-counter change feed for presentation code.
///
/// Every observable mutation bumps the revision; subscribers re-render
/// whenever the watched value changes.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: Arc<watch::Sender<u64>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn notify(&self) {
        self.tx.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session event sink: appends to the session log, mirrors into the
/// global log, bumps the change feed, and echoes to tracing.
#[derive(Clone)]
pub struct SessionLogger {
    source: Arc<str>,
    session_log: Arc<EventLog>,
    global_log: Arc<EventLog>,
    notifier: ChangeNotifier,
}

impl SessionLogger {
    pub fn new(
        source: Arc<str>,
        session_log: Arc<EventLog>,
        global_log: Arc<EventLog>,
        notifier: ChangeNotifier,
    ) -> Self {
        Self {
            source,
            session_log,
            global_log,
            notifier,
        }
    }

    pub fn log(&self, tag: EventTag, message: impl Into<String>) {
        let message = message.into();

        match tag {
            EventTag::Error => error!("[{}] {}", self.source, message),
            EventTag::Warn => warn!("[{}] {}", self.source, message),
            _ => debug!("[{}] {}", self.source, message),
        }

        self.session_log
            .append(tag, message.clone(), Some(&self.source));
        self.global_log.append(tag, message, Some(&self.source));
        self.notifier.notify();
    }

    /// Bump the change feed without logging (state/flag changes)
    pub fn notify(&self) {
        self.notifier.notify();
    }

    pub fn session_log(&self) -> &Arc<EventLog> {
        &self.session_log
    }
}
