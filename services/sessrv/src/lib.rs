//! Modbus TCP session and polling service
//!
//! `sessrv` manages concurrent connections to multiple Modbus TCP devices,
//! issuing on-demand and periodically-polled read/write operations while
//! keeping a bounded event history per session and globally.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  commands   ┌──────────────────┐
//! │   Presentation   │────────────►│  SessionRegistry │──┐ global log +
//! │  (external)      │◄────────────│                  │  │ change feed
//! └──────────────────┘  snapshots  └────────┬─────────┘◄─┘
//!                        + watch feed       │ owns, creation order
//!                                           ▼
//!                                  ┌──────────────────┐
//!                                  │     Session      │ state machine,
//!                                  │  (op-lock actor) │ write queue,
//!                                  └───┬──────────┬───┘ read cache, log
//!                     PollController ×3│          │ ModbusLink
//!                      (read / write / │          ▼
//!                        multi-write)  │  ┌──────────────────┐
//!                                      └─►│     TcpLink      │──► device
//!                                         │  (modlink crate) │
//!                                         └──────────────────┘
//! ```
//!
//! Every session serializes its command surface behind one async mutex, so
//! user commands and poll ticks never overlap on the same device. Sessions
//! are independent; only the global event log is shared. All failures are
//! captured at the operation boundary, logged with a severity tag, and
//! returned as plain values; the log stream is the error surface.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use modlink::RegisterKind;
//! use sessrv::{SessionConfig, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> sessrv::Result<()> {
//!     let registry = SessionRegistry::new(Duration::from_secs(5));
//!
//!     let session = registry.add_session(SessionConfig {
//!         label: "PLC line 1".into(),
//!         host: "192.168.1.100".into(),
//!         port: 502,
//!         unit_id: 1,
//!         connect_on_start: false,
//!         read_poll: None,
//!     })?;
//!
//!     session.connect().await?;
//!     session.execute_read(0, 16, RegisterKind::HoldingRegister).await?;
//!     for row in session.last_read_results() {
//!         println!("{}: {}", row.address, row.value);
//!     }
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod poll;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod testing;

pub use config::{AppConfig, ReadPollConfig, ServiceConfig, SessionConfig};
pub use error::{Result, SessionError};
pub use event::{ChangeNotifier, EventEntry, EventLog, EventTag};
pub use poll::{PollCommand, PollController, PollRole, MIN_POLL_INTERVAL_SECS};
pub use registry::SessionRegistry;
pub use session::{
    LinkFactory, LinkState, MultiWriteSummary, ReadResultRow, Session, SessionId, TcpLinkFactory,
    WriteEntry,
};
