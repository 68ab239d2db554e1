//! Modbus TCP link layer
//!
//! This crate provides the transport seam used by `sessrv`: the
//! [`ModbusLink`] trait describing what a device connection can do, and
//! [`TcpLink`], the Modbus TCP implementation of it.
//!
//! The session layer is written entirely against the trait, so tests (and
//! alternative transports) can substitute their own implementation.
//!
//! ```text
//! ┌──────────────┐     ModbusLink      ┌──────────────┐     TCP      ┌────────┐
//! │   Session    │────────────────────►│   TcpLink    │─────────────►│ Device │
//! │  (sessrv)    │  connect/read/write │ (MBAP + PDU) │   port 502   │        │
//! └──────────────┘                     └──────────────┘              └────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;

pub mod error;
pub mod frame;
pub mod tcp;
pub mod types;

pub use error::{LinkError, Result};
pub use tcp::TcpLink;
pub use types::{RegisterKind, WriteKind};

/// Connection parameters for a single device endpoint
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Device hostname or IP address
    pub host: String,
    /// TCP port (502 for standard Modbus)
    pub port: u16,
    /// Modbus unit identifier (slave ID)
    pub unit_id: u8,
    /// Timeout applied to connect and to each read on the wire
    pub timeout: Duration,
}

/// One connection to one Modbus device.
///
/// Implementations serialize their own wire access: the caller may hold a
/// single handle from multiple tasks, but never needs more than one
/// outstanding operation per device.
#[async_trait]
pub trait ModbusLink: Send + Sync {
    /// Open the transport. Fails on network, timeout, or protocol errors.
    async fn connect(&self) -> Result<()>;

    /// Release the transport. Idempotent, never fails.
    async fn disconnect(&self);

    /// Read `count` contiguous elements starting at `address`.
    ///
    /// Bit kinds return 0/1 per element; word kinds return raw register
    /// values. Fails if `count` exceeds the kind's protocol limit
    /// (125 registers / 2000 bits) or on any transport failure.
    async fn read_block(&self, address: u16, count: u16, kind: RegisterKind) -> Result<Vec<u16>>;

    /// Write a single register or coil. Coils treat any nonzero value as ON.
    async fn write_single(&self, address: u16, kind: WriteKind, value: u16) -> Result<()>;
}
