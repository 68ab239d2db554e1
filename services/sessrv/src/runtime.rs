//! Runtime lifecycle
//!
//! Bootstraps configured sessions at startup and disconnects everything on
//! graceful shutdown. Individual session failures never abort startup; the
//! service comes up with whatever subset connected.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::poll::PollCommand;
use crate::registry::SessionRegistry;

/// Create every configured session, connect the flagged ones concurrently,
/// and start their auto read polls.
pub async fn start_sessions(registry: &SessionRegistry, config: &AppConfig) -> Result<()> {
    if config.sessions.is_empty() {
        warn!("No sessions configured");
        return Ok(());
    }

    info!("Creating {} sessions...", config.sessions.len());

    let mut created = Vec::new();
    for session_config in &config.sessions {
        match registry.add_session(session_config.clone()) {
            Ok(session) => created.push((session, session_config.clone())),
            Err(e) => {
                error!("Failed to create session '{}': {}", session_config.label, e);
            },
        }
    }

    let default_interval = config.service.default_poll_interval_secs;
    let startup_futures: Vec<_> = created
        .iter()
        .filter(|(_, cfg)| cfg.connect_on_start)
        .map(|(session, cfg)| {
            let session = Arc::clone(session);
            let read_poll = cfg.read_poll.clone();
            async move {
                // Failures are already logged to the session's event log
                if session.connect().await.is_err() {
                    return false;
                }
                if let Some(poll) = read_poll {
                    session.start_poll(PollCommand::Read {
                        address: poll.address,
                        count: poll.count,
                        kind: poll.kind,
                        interval_secs: poll.interval_secs.unwrap_or(default_interval),
                    });
                }
                true
            }
        })
        .collect();

    let results = join_all(startup_futures).await;
    let connected = results.iter().filter(|ok| **ok).count();
    let failed = results.len() - connected;

    info!(
        "Session startup completed: {} created, {} connected, {} connect failures",
        created.len(),
        connected,
        failed
    );

    Ok(())
}

/// Disconnect all sessions concurrently. Each disconnect halts that
/// session's pollers before releasing its link.
pub async fn shutdown(registry: &SessionRegistry) {
    info!("Starting graceful shutdown...");

    let sessions = registry.sessions();
    if sessions.is_empty() {
        info!("No sessions to shut down");
        return;
    }

    let total = sessions.len();
    join_all(sessions.iter().map(|session| session.disconnect())).await;

    info!("Shutdown completed: {} sessions disconnected", total);
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::{ReadPollConfig, ServiceConfig, SessionConfig};
    use crate::poll::PollRole;
    use crate::session::LinkFactory;
    use crate::testing::MockLinkFactory;
    use modlink::{LinkError, RegisterKind};
    use std::time::Duration;

    fn app_config(sessions: Vec<SessionConfig>) -> AppConfig {
        AppConfig {
            service: ServiceConfig::default(),
            sessions,
        }
    }

    fn endpoint(label: &str, connect_on_start: bool) -> SessionConfig {
        SessionConfig {
            label: label.to_string(),
            host: "10.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            connect_on_start,
            read_poll: None,
        }
    }

    #[tokio::test]
    async fn test_startup_connects_flagged_sessions_and_starts_polls() {
        let factory = Arc::new(MockLinkFactory::default());
        let registry = SessionRegistry::with_link_factory(
            factory.clone() as Arc<dyn LinkFactory>,
            Duration::from_secs(1),
        );

        let mut polled = endpoint("polled", true);
        polled.read_poll = Some(ReadPollConfig {
            address: 0,
            count: 8,
            kind: RegisterKind::HoldingRegister,
            interval_secs: Some(2.0),
        });
        let config = app_config(vec![polled, endpoint("manual", false)]);

        start_sessions(&registry, &config).await.unwrap();

        let sessions = registry.sessions();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].is_connected());
        assert!(sessions[0].poll_active(PollRole::Read));
        assert!(!sessions[1].is_connected());

        shutdown(&registry).await;
        assert!(!sessions[0].is_connected());
        assert!(!sessions[0].poll_active(PollRole::Read));
    }

    #[tokio::test]
    async fn test_startup_isolates_connect_failures() {
        let factory = Arc::new(MockLinkFactory::default());
        let registry = SessionRegistry::with_link_factory(
            factory.clone() as Arc<dyn LinkFactory>,
            Duration::from_secs(1),
        );
        factory
            .prepare("down")
            .push_connect(Err(LinkError::Connection("refused".to_string())));

        let config = app_config(vec![endpoint("down", true), endpoint("up", true)]);
        start_sessions(&registry, &config).await.unwrap();

        let sessions = registry.sessions();
        assert!(!sessions[0].is_connected());
        assert!(sessions[1].is_connected());
    }
}
