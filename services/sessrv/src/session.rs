//! Session lifecycle and read/write execution
//!
//! A [`Session`] is one configured connection to one Modbus TCP device:
//! connection state, the pending write-entry queue, the last-read-result
//! cache, and three poll controllers (read, write, multi-write; see
//! [`crate::poll`]).
//!
//! The command surface (connect, disconnect, reads, writes, poll control)
//! is serialized by a per-session async mutex; no two operations on the
//! same session overlap, whether user- or poll-initiated. Snapshot
//! accessors read through cheap sync locks and never contend with link IO.
//!
//! Failures never escape as faults: each operation logs its own outcome to
//! the session log (mirrored into the global log) and returns a plain
//! `Result` that poll loops and presentation adapters may ignore.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use modlink::{LinkConfig, ModbusLink, RegisterKind, TcpLink, WriteKind};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::event::{EventTag, SessionLogger};
use crate::poll::PollController;

/// Opaque session identifier, allocated by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session {}", self.0)
    }
}

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A user-authored single-address write, queued for multi-write batches.
///
/// `values[0]` is the operative value; duplicates by address are allowed
/// and insertion order is preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteEntry {
    pub label: String,
    pub address: u16,
    pub kind: WriteKind,
    pub values: Vec<i64>,
}

impl WriteEntry {
    fn operative_value(&self) -> u16 {
        self.values.first().copied().unwrap_or(0) as u16
    }
}

/// One row of the most recent successful read.
///
/// The full set is replaced wholesale on every successful read; a failed
/// read leaves the previous set untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadResultRow {
    pub address: u16,
    pub value: i64,
    pub is_bit: bool,
}

/// Outcome of one multi-write batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiWriteSummary {
    pub succeeded: usize,
    pub total: usize,
}

/// Seam for creating device links; tests inject mock implementations
pub trait LinkFactory: Send + Sync {
    fn create(&self, config: &SessionConfig, timeout: Duration) -> Arc<dyn ModbusLink>;
}

/// Default factory producing Modbus TCP links
pub struct TcpLinkFactory;

impl LinkFactory for TcpLinkFactory {
    fn create(&self, config: &SessionConfig, timeout: Duration) -> Arc<dyn ModbusLink> {
        Arc::new(TcpLink::new(LinkConfig {
            host: config.host.clone(),
            port: config.port,
            unit_id: config.unit_id,
            timeout,
        }))
    }
}

/// One named device endpoint with its connection state, event log, write
/// queue, read cache, and poll controllers. Owned exclusively by the
/// registry as an `Arc<Session>`.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    logger: SessionLogger,
    /// Handle to our own Arc, handed to poll tasks so they never keep a
    /// removed session alive
    self_weak: Weak<Session>,
    state: RwLock<LinkState>,
    /// Present iff the session has ever connected; reused across reconnects
    link: Mutex<Option<Arc<dyn ModbusLink>>>,
    link_factory: Arc<dyn LinkFactory>,
    link_timeout: Duration,
    write_entries: RwLock<Vec<WriteEntry>>,
    last_read_results: RwLock<Vec<ReadResultRow>>,
    /// Serializes the command surface; the only lock held across link IO
    op_lock: tokio::sync::Mutex<()>,
    pub(crate) read_poll: PollController,
    pub(crate) write_poll: PollController,
    pub(crate) multi_write_poll: PollController,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        config: SessionConfig,
        logger: SessionLogger,
        link_factory: Arc<dyn LinkFactory>,
        link_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            id,
            config,
            logger,
            self_weak: self_weak.clone(),
            state: RwLock::new(LinkState::Disconnected),
            link: Mutex::new(None),
            link_factory,
            link_timeout,
            write_entries: RwLock::new(Vec::new()),
            last_read_results: RwLock::new(Vec::new()),
            op_lock: tokio::sync::Mutex::new(()),
            read_poll: PollController::default(),
            write_poll: PollController::default(),
            multi_write_poll: PollController::default(),
        })
    }

    pub(crate) fn weak_handle(&self) -> Weak<Session> {
        self.self_weak.clone()
    }

    // ------------------------------------------------------------------
    // Read-only views
    // ------------------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn unit_id(&self) -> u8 {
        self.config.unit_id
    }

    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        *self.state.read() == LinkState::Connected
    }

    pub fn log_snapshot(&self) -> Vec<crate::event::EventEntry> {
        self.logger.session_log().snapshot()
    }

    pub fn write_entries(&self) -> Vec<WriteEntry> {
        self.write_entries.read().clone()
    }

    pub fn last_read_results(&self) -> Vec<ReadResultRow> {
        self.last_read_results.read().clone()
    }

    /// Status snapshot for presentation and tooling
    pub fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.0,
            "label": self.config.label,
            "endpoint": format!("{}:{}", self.config.host, self.config.port),
            "unit_id": self.config.unit_id,
            "state": self.state(),
            "write_entries": self.write_entries.read().len(),
            "last_read_values": self.last_read_results.read().len(),
            "polls": {
                "read": self.read_poll.is_active(),
                "write": self.write_poll.is_active(),
                "multi_write": self.multi_write_poll.is_active(),
            },
        })
    }

    pub(crate) fn logger(&self) -> &SessionLogger {
        &self.logger
    }

    pub(crate) fn op_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.op_lock
    }

    fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
        self.logger.notify();
    }

    /// Get the link, creating it on first use
    fn link_handle(&self) -> Arc<dyn ModbusLink> {
        let mut guard = self.link.lock();
        guard
            .get_or_insert_with(|| self.link_factory.create(&self.config, self.link_timeout))
            .clone()
    }

    fn current_link(&self) -> Option<Arc<dyn ModbusLink>> {
        self.link.lock().clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect to the device. No-op when already connected; the outcome is
    /// always logged, never thrown.
    pub async fn connect(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;

        if *self.state.read() == LinkState::Connected {
            return Ok(());
        }

        self.set_state(LinkState::Connecting);
        self.logger.log(
            EventTag::Info,
            format!("Connecting to {}:{}...", self.config.host, self.config.port),
        );

        let link = self.link_handle();
        match link.connect().await {
            Ok(()) => {
                self.set_state(LinkState::Connected);
                self.logger.log(EventTag::Ok, "Connected.");
                Ok(())
            },
            Err(e) => {
                self.set_state(LinkState::Disconnected);
                self.logger.log(EventTag::Error, format!("Connection failed: {e}"));
                Err(SessionError::connection(&e))
            },
        }
    }

    /// Disconnect: halt all pollers, release the link, mark disconnected.
    /// A repeat call on an already-disconnected session is a complete no-op
    /// (no log entry).
    pub async fn disconnect(&self) {
        let _op = self.op_lock.lock().await;
        self.disconnect_locked().await;
    }

    pub(crate) async fn disconnect_locked(&self) {
        if *self.state.read() == LinkState::Disconnected {
            return;
        }

        self.set_state(LinkState::Disconnecting);

        // Pollers must be halted before the link is released so no tick can
        // fire against a closed connection
        self.force_stop_all_polls();

        if let Some(link) = self.current_link() {
            link.disconnect().await;
        }

        self.set_state(LinkState::Disconnected);
        self.logger.log(EventTag::Warn, "Disconnected.");
    }

    // ------------------------------------------------------------------
    // Read execution
    // ------------------------------------------------------------------

    /// Issue one batched read of `count` contiguous addresses and replace
    /// the read-result cache on success. Validation failures and transport
    /// errors are logged; a failed read leaves the cache untouched.
    pub async fn execute_read(&self, address: u16, count: u16, kind: RegisterKind) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.read_locked(address, count, kind).await
    }

    pub(crate) async fn read_locked(
        &self,
        address: u16,
        count: u16,
        kind: RegisterKind,
    ) -> Result<()> {
        if *self.state.read() != LinkState::Connected {
            self.logger.log(EventTag::Error, "Read failed: not connected");
            return Err(SessionError::NotConnected);
        }

        // Limit check applies to all four categories, before any network call
        let limit = kind.max_read_count();
        if count > limit {
            self.logger.log(
                EventTag::Error,
                format!("Read failed: count {count} exceeds limit {limit} for {kind}"),
            );
            return Err(SessionError::RequestLimitExceeded { kind, count, limit });
        }

        // Only holding registers and coils have an execution path
        match kind {
            RegisterKind::HoldingRegister | RegisterKind::Coil => {},
            other => {
                self.logger.log(
                    EventTag::Error,
                    format!("Read failed: unsupported type {other}"),
                );
                return Err(SessionError::UnsupportedType(other));
            },
        }

        let Some(link) = self.current_link() else {
            self.logger.log(EventTag::Error, "Read failed: not connected");
            return Err(SessionError::NotConnected);
        };

        match link.read_block(address, count, kind).await {
            Ok(values) => {
                let is_bit = kind.is_bit();
                let rows: Vec<ReadResultRow> = values
                    .iter()
                    .enumerate()
                    .map(|(i, &raw)| ReadResultRow {
                        address: address.wrapping_add(i as u16),
                        value: if is_bit {
                            i64::from(raw != 0)
                        } else {
                            i64::from(raw)
                        },
                        is_bit,
                    })
                    .collect();
                let n = rows.len();
                *self.last_read_results.write() = rows;
                self.logger.log(
                    EventTag::Ok,
                    format!("✓ {n} value(s) read from addr {address}"),
                );
                Ok(())
            },
            Err(e) => {
                self.logger.log(EventTag::Error, format!("Read exception: {e}"));
                Err(SessionError::request(&e))
            },
        }
    }

    // ------------------------------------------------------------------
    // Write execution
    // ------------------------------------------------------------------

    /// Write a single register or coil
    pub async fn execute_write(&self, address: u16, kind: WriteKind, value: u16) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.write_locked(address, kind, value).await
    }

    pub(crate) async fn write_locked(
        &self,
        address: u16,
        kind: WriteKind,
        value: u16,
    ) -> Result<()> {
        if *self.state.read() != LinkState::Connected {
            self.logger.log(EventTag::Error, "Write failed: not connected");
            return Err(SessionError::NotConnected);
        }

        let Some(link) = self.current_link() else {
            self.logger.log(EventTag::Error, "Write failed: not connected");
            return Err(SessionError::NotConnected);
        };

        match link.write_single(address, kind, value).await {
            Ok(()) => {
                self.logger
                    .log(EventTag::Ok, format!("✓ wrote {value} to addr {address}"));
                Ok(())
            },
            Err(e) => {
                self.logger.log(EventTag::Error, format!("Write exception: {e}"));
                Err(SessionError::request(&e))
            },
        }
    }

    /// Send every queued write entry, sequentially and in insertion order.
    /// A single entry's failure does not stop the batch; losing the
    /// connection mid-batch aborts the remaining entries without marking
    /// them failed. Returns the success/total counts from the summary row.
    ///
    /// When the session is not connected this is a silent no-op: the call
    /// returns `NotConnected` but appends no log entry.
    pub async fn execute_multi_write(&self) -> Result<MultiWriteSummary> {
        let _op = self.op_lock.lock().await;
        self.multi_write_locked().await
    }

    pub(crate) async fn multi_write_locked(&self) -> Result<MultiWriteSummary> {
        if *self.state.read() != LinkState::Connected {
            return Err(SessionError::NotConnected);
        }

        let entries = self.write_entries.read().clone();
        let total = entries.len();
        self.logger
            .log(EventTag::Info, format!("MULTI-WRITE: sending {total} entries"));

        let mut succeeded = 0usize;
        for entry in &entries {
            // Abort the remainder if the connection is lost mid-batch
            if *self.state.read() != LinkState::Connected {
                break;
            }
            let Some(link) = self.current_link() else {
                break;
            };

            match link
                .write_single(entry.address, entry.kind, entry.operative_value())
                .await
            {
                Ok(()) => {
                    succeeded += 1;
                    self.logger.log(
                        EventTag::Ok,
                        format!("  ✓ addr={} [{}]: {:?}", entry.address, entry.label, entry.values),
                    );
                },
                Err(e) => {
                    self.logger.log(
                        EventTag::Error,
                        format!(
                            "  ✗ addr={} [{}]: exception: {e}",
                            entry.address, entry.label
                        ),
                    );
                },
            }
        }

        let tag = if succeeded == total {
            EventTag::Ok
        } else {
            EventTag::Warn
        };
        self.logger.log(
            tag,
            format!("Multi-write complete: {succeeded}/{total} succeeded."),
        );

        Ok(MultiWriteSummary { succeeded, total })
    }

    // ------------------------------------------------------------------
    // Write-entry queue
    // ------------------------------------------------------------------

    pub fn add_write_entry(&self, entry: WriteEntry) {
        self.write_entries.write().push(entry);
        self.logger.notify();
    }

    pub fn remove_write_entry(&self, index: usize) -> Result<WriteEntry> {
        let mut entries = self.write_entries.write();
        if index >= entries.len() {
            return Err(SessionError::WriteEntryNotFound(index));
        }
        let entry = entries.remove(index);
        drop(entries);
        self.logger.notify();
        Ok(entry)
    }
}
