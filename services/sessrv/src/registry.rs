//! Session registry
//!
//! Owns the set of all sessions, routes commands to the right one, fans
//! session-level events into the global log, and is the single mutation
//! point presentation code observes. Sessions iterate in creation order,
//! stable under removal of others.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::info;

use modlink::RegisterKind;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::event::{
    ChangeNotifier, EventLog, EventTag, SessionLogger, GLOBAL_LOG_CAPACITY, SESSION_LOG_CAPACITY,
};
use crate::poll::PollCommand;
use crate::session::{
    LinkFactory, MultiWriteSummary, Session, SessionId, TcpLinkFactory, WriteEntry,
};

/// Process-wide owner of all sessions and the global event log
pub struct SessionRegistry {
    sessions: RwLock<Vec<Arc<Session>>>,
    global_log: Arc<EventLog>,
    notifier: ChangeNotifier,
    link_factory: Arc<dyn LinkFactory>,
    link_timeout: Duration,
    next_id: AtomicU32,
}

impl SessionRegistry {
    /// Registry producing real Modbus TCP links
    pub fn new(link_timeout: Duration) -> Self {
        Self::with_link_factory(Arc::new(TcpLinkFactory), link_timeout)
    }

    /// Registry with an injected link factory (tests, alternative transports)
    pub fn with_link_factory(link_factory: Arc<dyn LinkFactory>, link_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            global_log: Arc::new(EventLog::new(GLOBAL_LOG_CAPACITY)),
            notifier: ChangeNotifier::new(),
            link_factory,
            link_timeout,
            next_id: AtomicU32::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Observable state
    // ------------------------------------------------------------------

    /// Sessions in creation order
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().clone()
    }

    pub fn session(&self, id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .ok_or(SessionError::SessionNotFound(id))
    }

    pub fn global_log(&self) -> &Arc<EventLog> {
        &self.global_log
    }

    /// Change feed: the watched revision bumps on every observable mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Create a session for one device endpoint
    pub fn add_session(&self, config: SessionConfig) -> Result<Arc<Session>> {
        config.validate()?;

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let logger = SessionLogger::new(
            Arc::from(config.label.as_str()),
            Arc::new(EventLog::new(SESSION_LOG_CAPACITY)),
            Arc::clone(&self.global_log),
            self.notifier.clone(),
        );

        let session = Session::new(
            id,
            config,
            logger,
            Arc::clone(&self.link_factory),
            self.link_timeout,
        );

        info!("Session {} '{}' created", id.0, session.label());
        self.global_log.append(
            EventTag::Info,
            format!(
                "Session '{}' added ({}:{})",
                session.label(),
                session.host(),
                session.port()
            ),
            None,
        );

        self.sessions.write().push(Arc::clone(&session));
        self.notifier.notify();
        Ok(session)
    }

    /// Disconnect (stopping all pollers) and remove a session
    pub async fn remove_session(&self, id: SessionId) -> Result<()> {
        let session = self.session(id)?;
        session.disconnect().await;

        self.sessions.write().retain(|s| s.id() != id);
        self.global_log.append(
            EventTag::Warn,
            format!("Session '{}' removed.", session.label()),
            None,
        );
        self.notifier.notify();
        info!("Session {} '{}' removed", id.0, session.label());
        Ok(())
    }

    pub async fn connect(&self, id: SessionId) -> Result<()> {
        self.session(id)?.connect().await
    }

    pub async fn disconnect(&self, id: SessionId) -> Result<()> {
        self.session(id)?.disconnect().await;
        Ok(())
    }

    pub async fn execute_read(
        &self,
        id: SessionId,
        address: u16,
        count: u16,
        kind: RegisterKind,
    ) -> Result<()> {
        self.session(id)?.execute_read(address, count, kind).await
    }

    pub async fn execute_multi_write(&self, id: SessionId) -> Result<MultiWriteSummary> {
        self.session(id)?.execute_multi_write().await
    }

    pub fn add_write_entry(&self, id: SessionId, entry: WriteEntry) -> Result<()> {
        self.session(id)?.add_write_entry(entry);
        Ok(())
    }

    pub fn remove_write_entry(&self, id: SessionId, index: usize) -> Result<WriteEntry> {
        self.session(id)?.remove_write_entry(index)
    }

    pub fn toggle_poll(&self, id: SessionId, command: PollCommand) -> Result<()> {
        self.session(id)?.toggle_poll(command);
        Ok(())
    }
}
