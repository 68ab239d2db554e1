//! Modbus TCP link implementation
//!
//! One [`TcpLink`] owns one TCP connection to one device. All request and
//! response handling goes through a single exchange path guarded by the
//! stream mutex, so at most one request/response pair is in flight per link.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::frame;
use crate::types::{RegisterKind, WriteKind, MBAP_HEADER_LEN};
use crate::{LinkConfig, ModbusLink};

/// Consecutive IO errors before the socket is dropped and must be re-opened
const ERROR_THRESHOLD: u32 = 3;

/// Modbus TCP client link
pub struct TcpLink {
    config: LinkConfig,
    /// Connection instance; the guard is held for a full request/response
    /// exchange so requests never interleave on the wire
    stream: Mutex<Option<TcpStream>>,
    /// Transaction ID counter, wraps naturally at 0xFFFF
    next_transaction_id: AtomicU16,
    /// Consecutive IO error counter for socket teardown
    consecutive_errors: AtomicU32,
}

impl TcpLink {
    /// Create a new link for the given endpoint. No connection is attempted
    /// until [`ModbusLink::connect`] is called.
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            stream: Mutex::new(None),
            next_transaction_id: AtomicU16::new(1),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    /// Whether a socket is currently open
    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    fn next_transaction_id(&self) -> u16 {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Record an exchange failure; drops the socket after repeated IO errors
    /// since an interrupted exchange can leave the wire desynchronized.
    fn note_failure(&self, stream: &mut Option<TcpStream>, err: &LinkError) {
        if matches!(err, LinkError::Io(_) | LinkError::Timeout(_)) {
            let errors = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
            if errors >= ERROR_THRESHOLD {
                warn!(
                    "{}:{}: {} consecutive IO errors, dropping socket",
                    self.config.host, self.config.port, errors
                );
                self.consecutive_errors.store(0, Ordering::Relaxed);
                *stream = None;
            }
        }
    }

    /// Send one request frame and read back one complete response PDU
    async fn exchange(&self, request: &[u8], expected_tid: u16) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;

        let result = async {
            let stream = guard
                .as_mut()
                .ok_or_else(|| LinkError::Connection("Not connected".to_string()))?;

            stream
                .write_all(request)
                .await
                .map_err(|e| LinkError::Io(format!("TCP send error: {e}")))?;
            debug!("TX: {}B", request.len());

            // Read MBAP header, then the exact PDU length it declares
            let mut header_buf = [0u8; MBAP_HEADER_LEN];
            match timeout(self.config.timeout, stream.read_exact(&mut header_buf)).await {
                Ok(Ok(_)) => {},
                Ok(Err(e)) => return Err(LinkError::Io(format!("TCP header read error: {e}"))),
                Err(_) => return Err(LinkError::Timeout("TCP header read timeout".to_string())),
            }

            let header = frame::MbapHeader::parse(&header_buf)?;

            let mut pdu = vec![0u8; header.pdu_len()];
            match timeout(self.config.timeout, stream.read_exact(&mut pdu)).await {
                Ok(Ok(_)) => {},
                Ok(Err(e)) => return Err(LinkError::Io(format!("TCP PDU read error: {e}"))),
                Err(_) => return Err(LinkError::Timeout("TCP PDU read timeout".to_string())),
            }
            debug!("RX: {}B", MBAP_HEADER_LEN + pdu.len());

            if header.transaction_id != expected_tid {
                return Err(LinkError::Protocol(format!(
                    "Transaction ID mismatch: expected {}, got {}",
                    expected_tid, header.transaction_id
                )));
            }
            if header.unit_id != self.config.unit_id {
                return Err(LinkError::Protocol(format!(
                    "Unit ID mismatch: expected {}, got {}",
                    self.config.unit_id, header.unit_id
                )));
            }

            Ok(pdu)
        }
        .await;

        match &result {
            Ok(_) => {
                self.consecutive_errors.store(0, Ordering::Relaxed);
            },
            Err(e) => self.note_failure(&mut guard, e),
        }

        result
    }
}

#[async_trait]
impl ModbusLink for TcpLink {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;

        // Reconnect drops any stale socket first
        if guard.is_some() {
            *guard = None;
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        debug!("TCP connecting: {}", addr);

        match timeout(self.config.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                self.consecutive_errors.store(0, Ordering::Relaxed);
                *guard = Some(stream);
                Ok(())
            },
            Ok(Err(e)) => Err(LinkError::Connection(format!(
                "Failed to connect to {addr}: {e}"
            ))),
            Err(_) => Err(LinkError::Timeout(format!("Connection to {addr} timed out"))),
        }
    }

    async fn disconnect(&self) {
        let mut guard = self.stream.lock().await;
        *guard = None;
        debug!("{}:{} disconnected", self.config.host, self.config.port);
    }

    async fn read_block(&self, address: u16, count: u16, kind: RegisterKind) -> Result<Vec<u16>> {
        match kind {
            RegisterKind::HoldingRegister | RegisterKind::Coil => {},
            other => {
                return Err(LinkError::Unsupported(format!(
                    "{other} have no read path on this link"
                )))
            },
        }

        if count == 0 || count > kind.max_read_count() {
            return Err(LinkError::Protocol(format!(
                "Invalid count {count} for {kind} (max {})",
                kind.max_read_count()
            )));
        }

        let function = kind.read_function();
        let tid = self.next_transaction_id();
        let request = frame::build_read_request(tid, self.config.unit_id, function, address, count)?;
        let pdu = self.exchange(&request, tid).await?;

        if kind.is_bit() {
            frame::parse_read_bits(&pdu, function, count)
        } else {
            frame::parse_read_registers(&pdu, function, count)
        }
    }

    async fn write_single(&self, address: u16, kind: WriteKind, value: u16) -> Result<()> {
        let tid = self.next_transaction_id();
        let request = frame::build_write_single(tid, self.config.unit_id, kind, address, value);
        let pdu = self.exchange(&request, tid).await?;
        frame::parse_write_response(&pdu, kind.write_function(), address)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn link_for(addr: std::net::SocketAddr) -> TcpLink {
        TcpLink::new(LinkConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            unit_id: 1,
            timeout: Duration::from_secs(1),
        })
    }

    /// Serve exactly one scripted exchange: read a fixed-size request and
    /// answer with the given PDU under the request's transaction id.
    async fn serve_one(listener: TcpListener, request_len: usize, response_pdu: Vec<u8>) {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = vec![0u8; request_len];
        sock.read_exact(&mut req).await.unwrap();

        let mut resp = Vec::new();
        resp.extend_from_slice(&req[0..2]); // echo transaction id
        resp.extend_from_slice(&[0x00, 0x00]); // protocol id
        resp.extend_from_slice(&(response_pdu.len() as u16 + 1).to_be_bytes());
        resp.push(req[6]); // echo unit id
        resp.extend_from_slice(&response_pdu);
        sock.write_all(&resp).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_holding_registers_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_one(
            listener,
            12,
            vec![0x03, 0x04, 0x01, 0x02, 0x03, 0x04],
        ));

        let link = link_for(addr);
        link.connect().await.unwrap();
        let values = link
            .read_block(0, 2, RegisterKind::HoldingRegister)
            .await
            .unwrap();
        assert_eq!(values, vec![0x0102, 0x0304]);
    }

    #[tokio::test]
    async fn test_read_coils_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_one(listener, 12, vec![0x01, 0x01, 0x05]));

        let link = link_for(addr);
        link.connect().await.unwrap();
        let values = link.read_block(0, 3, RegisterKind::Coil).await.unwrap();
        assert_eq!(values, vec![1, 0, 1]);
    }

    #[tokio::test]
    async fn test_write_single_register_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Echo response: FC06 addr=100 value=0x1234
        tokio::spawn(serve_one(listener, 12, vec![0x06, 0x00, 0x64, 0x12, 0x34]));

        let link = link_for(addr);
        link.connect().await.unwrap();
        link.write_single(100, WriteKind::HoldingRegister, 0x1234)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exception_response_surfaces() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_one(listener, 12, vec![0x83, 0x02]));

        let link = link_for(addr);
        link.connect().await.unwrap();
        let err = link
            .read_block(0, 1, RegisterKind::HoldingRegister)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Exception { code: 0x02, .. }));
    }

    #[tokio::test]
    async fn test_unsupported_kinds_rejected_before_io() {
        let link = link_for("127.0.0.1:1".parse().unwrap());
        let err = link
            .read_block(0, 1, RegisterKind::DiscreteInput)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_count_limit_rejected_before_io() {
        let link = link_for("127.0.0.1:1".parse().unwrap());
        let err = link
            .read_block(0, 126, RegisterKind::HoldingRegister)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_without_connection() {
        let link = link_for("127.0.0.1:1".parse().unwrap());
        let err = link
            .read_block(0, 1, RegisterKind::HoldingRegister)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Connection(_)));
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let link = link_for("127.0.0.1:1".parse().unwrap());
        link.disconnect().await;
        link.disconnect().await;
        assert!(!link.is_connected().await);
    }
}
