//! Polling engine
//!
//! Each session owns three [`PollController`]s (read, write, multi-write)
//! sharing one template: `start` captures the operation's parameters and
//! arms a repeating timer, `stop` cancels it, and every tick re-checks
//! liveness before executing.
//!
//! One tokio task runs per active controller. The task selects between its
//! cancellation token and the timer; the operation itself runs inside the
//! tick branch, so cancellation prevents future ticks but never aborts one
//! in flight. Ticks execute under the session op lock and the timer uses
//! `MissedTickBehavior::Delay`, so ticks can never overlap; an operation
//! that outlasts the interval simply delays the next tick.

use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use modlink::{RegisterKind, WriteKind};

use crate::event::EventTag;
use crate::session::Session;

/// Floor for poll intervals; sub-floor values are silently raised
pub const MIN_POLL_INTERVAL_SECS: f64 = 0.1;

/// Which repeating operation a controller drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollRole {
    Read,
    Write,
    MultiWrite,
}

impl PollRole {
    /// Loop name used in start/stop log messages
    pub fn loop_name(self) -> &'static str {
        match self {
            PollRole::Read => "Read",
            PollRole::Write => "Write",
            PollRole::MultiWrite => "Multi-write",
        }
    }
}

/// Poll parameters, captured once at start time. A running poll cannot be
/// reparameterized; stop it and start again.
#[derive(Debug, Clone)]
pub enum PollCommand {
    Read {
        address: u16,
        count: u16,
        kind: RegisterKind,
        interval_secs: f64,
    },
    Write {
        address: u16,
        kind: WriteKind,
        value: u16,
        interval_secs: f64,
    },
    MultiWrite {
        interval_secs: f64,
    },
}

impl PollCommand {
    pub fn role(&self) -> PollRole {
        match self {
            PollCommand::Read { .. } => PollRole::Read,
            PollCommand::Write { .. } => PollRole::Write,
            PollCommand::MultiWrite { .. } => PollRole::MultiWrite,
        }
    }

    fn interval_secs(&self) -> f64 {
        match self {
            PollCommand::Read { interval_secs, .. }
            | PollCommand::Write { interval_secs, .. }
            | PollCommand::MultiWrite { interval_secs } => *interval_secs,
        }
    }
}

#[derive(Debug, Default)]
struct PollState {
    active: bool,
    interval_secs: f64,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Schedule state for one repeating operation.
///
/// Invariant: `active` is true exactly while a cancellation token is armed
/// and its task is scheduled.
#[derive(Debug, Default)]
pub struct PollController {
    inner: Mutex<PollState>,
}

impl PollController {
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Interval of the current (or most recent) schedule
    pub fn interval_secs(&self) -> f64 {
        self.inner.lock().interval_secs
    }

    /// Cancel the timer and clear the active flag. Safe on a stopped
    /// controller; an in-flight tick still runs to completion. Returns
    /// whether the controller was active.
    fn stop(&self) -> bool {
        let mut state = self.inner.lock();
        let was_active = state.active;
        state.active = false;
        if let Some(token) = state.token.take() {
            token.cancel();
        }
        // The task observes the cancelled token and exits on its own
        state.handle.take();
        was_active
    }

    /// Mark active and hand out a fresh token; `None` if already active
    fn arm(&self, interval_secs: f64) -> Option<CancellationToken> {
        let mut state = self.inner.lock();
        if state.active {
            return None;
        }
        let token = CancellationToken::new();
        state.active = true;
        state.interval_secs = interval_secs;
        state.token = Some(token.clone());
        Some(token)
    }

    fn set_handle(&self, handle: JoinHandle<()>) {
        self.inner.lock().handle = Some(handle);
    }
}

impl Session {
    pub fn controller(&self, role: PollRole) -> &PollController {
        match role {
            PollRole::Read => &self.read_poll,
            PollRole::Write => &self.write_poll,
            PollRole::MultiWrite => &self.multi_write_poll,
        }
    }

    pub fn poll_active(&self, role: PollRole) -> bool {
        self.controller(role).is_active()
    }

    /// Stop the poll if it is running, else start it
    pub fn toggle_poll(&self, command: PollCommand) {
        let role = command.role();
        if self.controller(role).is_active() {
            self.stop_poll(role);
        } else {
            self.start_poll(command);
        }
    }

    /// User-initiated stop: logs "... polling stopped." when the controller
    /// was actually running. Forced internal stops are silent.
    pub fn stop_poll(&self, role: PollRole) {
        if self.controller(role).stop() {
            self.logger().log(
                EventTag::Info,
                format!("{} polling stopped.", role.loop_name()),
            );
        }
    }

    pub(crate) fn force_stop_poll(&self, role: PollRole) {
        if self.controller(role).stop() {
            self.logger().notify();
        }
    }

    pub(crate) fn force_stop_all_polls(&self) {
        for role in [PollRole::Read, PollRole::Write, PollRole::MultiWrite] {
            self.force_stop_poll(role);
        }
    }

    /// Arm a repeating poll with the command's parameters.
    ///
    /// No-op when the session is not connected, when the controller is
    /// already running, or (multi-write) when the write queue is empty.
    /// The interval is clamped to [`MIN_POLL_INTERVAL_SECS`].
    pub fn start_poll(&self, command: PollCommand) {
        if !self.is_connected() {
            return;
        }
        if matches!(command, PollCommand::MultiWrite { .. }) && self.write_entries().is_empty() {
            return;
        }

        let role = command.role();
        let interval_secs = command.interval_secs().max(MIN_POLL_INTERVAL_SECS);
        let Some(token) = self.controller(role).arm(interval_secs) else {
            return;
        };

        self.logger().log(
            EventTag::Info,
            format!("{} polling started ({interval_secs}s).", role.loop_name()),
        );

        let period = Duration::from_secs_f64(interval_secs);
        let weak = self.weak_handle();
        let handle = tokio::spawn(run_poll_loop(weak, role, command, period, token));
        self.controller(role).set_handle(handle);
    }

    /// One tick: serialize behind the op lock, re-check liveness, run the
    /// operation. A session that disconnected since the tick fired gets a
    /// forced, silent stop instead of an error entry.
    async fn run_tick(&self, role: PollRole, command: &PollCommand, token: &CancellationToken) {
        let _op = self.op_lock().lock().await;

        if token.is_cancelled() {
            return;
        }
        if !self.is_connected() {
            self.force_stop_poll(role);
            return;
        }

        // Outcomes are already logged by the operation itself
        match command {
            PollCommand::Read {
                address,
                count,
                kind,
                ..
            } => {
                let _ = self.read_locked(*address, *count, *kind).await;
            },
            PollCommand::Write {
                address, kind, value, ..
            } => {
                let _ = self.write_locked(*address, *kind, *value).await;
            },
            PollCommand::MultiWrite { .. } => {
                let _ = self.multi_write_locked().await;
            },
        }
    }
}

async fn run_poll_loop(
    session: Weak<Session>,
    role: PollRole,
    command: PollCommand,
    period: Duration,
    token: CancellationToken,
) {
    // First fire one period after start, not immediately
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = timer.tick() => {
                let Some(session) = session.upgrade() else { break };
                session.run_tick(role, &command, &token).await;
                if token.is_cancelled() {
                    break;
                }
            }
        }
    }

    debug!("{} poll task exited", role.loop_name());
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::registry::SessionRegistry;
    use crate::session::{LinkFactory, WriteEntry};
    use crate::testing::MockLinkFactory;
    use std::sync::Arc;

    fn test_config(label: &str) -> SessionConfig {
        SessionConfig {
            label: label.to_string(),
            host: "10.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            connect_on_start: false,
            read_poll: None,
        }
    }

    fn registry_with_mocks() -> (SessionRegistry, Arc<MockLinkFactory>) {
        let factory = Arc::new(MockLinkFactory::default());
        let registry = SessionRegistry::with_link_factory(
            factory.clone() as Arc<dyn LinkFactory>,
            Duration::from_secs(1),
        );
        (registry, factory)
    }

    fn read_command(interval_secs: f64) -> PollCommand {
        PollCommand::Read {
            address: 0,
            count: 4,
            kind: RegisterKind::HoldingRegister,
            interval_secs,
        }
    }

    #[tokio::test]
    async fn test_start_requires_connection() {
        let (registry, _factory) = registry_with_mocks();
        let session = registry.add_session(test_config("dev")).unwrap();

        session.start_poll(read_command(1.0));
        assert!(!session.poll_active(PollRole::Read));
        assert!(session.log_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_interval_clamped_to_floor() {
        let (registry, _factory) = registry_with_mocks();
        let session = registry.add_session(test_config("dev")).unwrap();
        session.connect().await.unwrap();

        session.start_poll(read_command(0.01));
        assert!(session.poll_active(PollRole::Read));
        assert!((session.controller(PollRole::Read).interval_secs() - 0.1).abs() < f64::EPSILON);

        let last = session.log_snapshot().pop().unwrap();
        assert_eq!(last.message, "Read polling started (0.1s).");
        session.stop_poll(PollRole::Read);
    }

    #[tokio::test]
    async fn test_start_while_active_is_noop() {
        let (registry, _factory) = registry_with_mocks();
        let session = registry.add_session(test_config("dev")).unwrap();
        session.connect().await.unwrap();

        session.start_poll(read_command(1.0));
        let len_before = session.log_snapshot().len();
        session.start_poll(read_command(5.0));
        assert_eq!(session.log_snapshot().len(), len_before);
        assert!((session.controller(PollRole::Read).interval_secs() - 1.0).abs() < f64::EPSILON);
        session.stop_poll(PollRole::Read);
    }

    #[tokio::test]
    async fn test_toggle_starts_then_stops_with_log() {
        let (registry, _factory) = registry_with_mocks();
        let session = registry.add_session(test_config("dev")).unwrap();
        session.connect().await.unwrap();

        session.toggle_poll(read_command(1.0));
        assert!(session.poll_active(PollRole::Read));

        session.toggle_poll(read_command(1.0));
        assert!(!session.poll_active(PollRole::Read));

        let last = session.log_snapshot().pop().unwrap();
        assert_eq!(last.message, "Read polling stopped.");
        assert_eq!(last.tag, EventTag::Info);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_silent() {
        let (registry, _factory) = registry_with_mocks();
        let session = registry.add_session(test_config("dev")).unwrap();
        session.connect().await.unwrap();

        let len_before = session.log_snapshot().len();
        session.stop_poll(PollRole::Read);
        assert_eq!(session.log_snapshot().len(), len_before);
    }

    #[tokio::test]
    async fn test_multi_write_poll_requires_entries() {
        let (registry, _factory) = registry_with_mocks();
        let session = registry.add_session(test_config("dev")).unwrap();
        session.connect().await.unwrap();

        session.start_poll(PollCommand::MultiWrite { interval_secs: 1.0 });
        assert!(!session.poll_active(PollRole::MultiWrite));

        session.add_write_entry(WriteEntry {
            label: "w".to_string(),
            address: 1,
            kind: WriteKind::Coil,
            values: vec![1],
        });
        session.start_poll(PollCommand::MultiWrite { interval_secs: 1.0 });
        assert!(session.poll_active(PollRole::MultiWrite));
        session.stop_poll(PollRole::MultiWrite);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_execute_and_never_burst() {
        let (registry, factory) = registry_with_mocks();
        let session = registry.add_session(test_config("dev")).unwrap();
        session.connect().await.unwrap();
        let link = factory.link_for("dev").unwrap();

        session.start_poll(read_command(1.0));
        assert_eq!(link.read_calls(), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(link.read_calls(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let calls = link.read_calls();
        assert!((3..=5).contains(&calls), "got {calls} ticks");

        session.stop_poll(PollRole::Read);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_stop_logs_exactly_once() {
        let (registry, factory) = registry_with_mocks();
        let session = registry.add_session(test_config("dev")).unwrap();
        session.connect().await.unwrap();
        let link = factory.link_for("dev").unwrap();

        session.start_poll(read_command(1.0));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(link.read_calls(), 1);
        session.stop_poll(PollRole::Read);
        // Force-stop path inherited from disconnect is exercised in the
        // integration tests; here the user stop logs exactly once
        let stops = session
            .log_snapshot()
            .iter()
            .filter(|e| e.message.ends_with("polling stopped."))
            .count();
        assert_eq!(stops, 1);
    }
}
