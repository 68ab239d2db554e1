//! Test support: scripted mock links
//!
//! [`MockLink`] implements [`ModbusLink`] with per-call scripted outcomes,
//! atomic call counters, and an operation journal for ordering assertions.
//! Unscripted calls succeed with benign defaults, so tests only script the
//! interesting outcomes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use modlink::error::Result as LinkResult;
use modlink::{ModbusLink, RegisterKind, WriteKind};

use crate::config::SessionConfig;
use crate::session::LinkFactory;

type DisconnectHook = Box<dyn Fn() + Send + Sync>;

/// Scripted in-memory Modbus link
#[derive(Default)]
pub struct MockLink {
    connect_script: Mutex<VecDeque<LinkResult<()>>>,
    read_script: Mutex<VecDeque<LinkResult<Vec<u16>>>>,
    write_script: Mutex<VecDeque<LinkResult<()>>>,
    connect_count: AtomicUsize,
    disconnect_count: AtomicUsize,
    read_count: AtomicUsize,
    write_count: AtomicUsize,
    journal: Mutex<Vec<String>>,
    on_disconnect: Mutex<Option<DisconnectHook>>,
    read_delay: Mutex<Option<Duration>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of the next connect; unscripted connects succeed
    pub fn push_connect(&self, result: LinkResult<()>) {
        self.connect_script.lock().push_back(result);
    }

    /// Script the outcome of the next read; unscripted reads return
    /// sequential values of the requested length
    pub fn push_read(&self, result: LinkResult<Vec<u16>>) {
        self.read_script.lock().push_back(result);
    }

    /// Script the outcome of the next write; unscripted writes succeed
    pub fn push_write(&self, result: LinkResult<()>) {
        self.write_script.lock().push_back(result);
    }

    /// Observer invoked at the start of every disconnect
    pub fn set_on_disconnect(&self, hook: DisconnectHook) {
        *self.on_disconnect.lock() = Some(hook);
    }

    /// Make every read take this long (virtual time under a paused clock)
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Every operation in invocation order
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    fn record(&self, op: String) {
        self.journal.lock().push(op);
    }
}

#[async_trait]
impl ModbusLink for MockLink {
    async fn connect(&self) -> LinkResult<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        self.record("connect".to_string());
        self.connect_script.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&self) {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_disconnect.lock().as_ref() {
            hook();
        }
        self.record("disconnect".to_string());
    }

    async fn read_block(&self, address: u16, count: u16, kind: RegisterKind) -> LinkResult<Vec<u16>> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        self.record(format!("read {kind:?} {address}+{count}"));
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.read_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok((0..count).collect()))
    }

    async fn write_single(&self, address: u16, kind: WriteKind, value: u16) -> LinkResult<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.record(format!("write {kind:?} {address}={value}"));
        self.write_script.lock().pop_front().unwrap_or(Ok(()))
    }
}

/// Factory handing out one [`MockLink`] per session label.
///
/// Links can be prepared before the session ever connects, so failures of
/// the very first connect are scriptable.
#[derive(Default)]
pub struct MockLinkFactory {
    links: Mutex<HashMap<String, Arc<MockLink>>>,
}

impl MockLinkFactory {
    /// Get or create the link that `create` will hand to the session with
    /// this label
    pub fn prepare(&self, label: &str) -> Arc<MockLink> {
        Arc::clone(
            self.links
                .lock()
                .entry(label.to_string())
                .or_insert_with(|| Arc::new(MockLink::new())),
        )
    }

    /// The link for a label, if one has been created or prepared
    pub fn link_for(&self, label: &str) -> Option<Arc<MockLink>> {
        self.links.lock().get(label).cloned()
    }
}

impl LinkFactory for MockLinkFactory {
    fn create(&self, config: &SessionConfig, _timeout: Duration) -> Arc<dyn ModbusLink> {
        self.prepare(&config.label)
    }
}
