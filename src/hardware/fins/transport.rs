//! Datagram transports for FINS frames.
//!
//! A [`Transport`] sends one complete frame and returns exactly one reply
//! datagram. The UDP implementation owns a single socket for the lifetime of
//! the connection; the in-memory controller used by tests lives in
//! [`crate::hardware::mock`].

use crate::error::FinsError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Largest reply datagram accepted from the controller.
const MAX_DATAGRAM: usize = 2048;

/// One-request/one-reply datagram exchange.
///
/// # Contract
/// - `exchange` performs exactly one attempt; it never retries
/// - Returns the raw reply bytes, or `FinsError::Timeout` if nothing arrives in time
/// - Implementations serialize concurrent callers so replies cannot interleave
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `frame` and wait for the reply datagram.
    async fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>, FinsError>;

    /// Human-readable description of the remote end (for logs).
    fn endpoint(&self) -> String;
}

/// UDP transport bound to an ephemeral local port and connected to the PLC.
pub struct UdpTransport {
    socket: Mutex<UdpSocket>,
    remote: SocketAddr,
    timeout: Duration,
}

impl UdpTransport {
    /// Bind a local socket and associate it with `remote`.
    ///
    /// # Errors
    /// Returns `FinsError::Transport` if the socket cannot be bound or connected.
    pub async fn connect(remote: SocketAddr, timeout: Duration) -> Result<Self, FinsError> {
        let local: SocketAddr = if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        tracing::debug!(%remote, local = ?socket.local_addr().ok(), "FINS UDP socket ready");

        Ok(Self {
            socket: Mutex::new(socket),
            remote,
            timeout,
        })
    }

    /// Discard datagrams that are already queued (late replies to timed-out requests).
    fn drain_stale(socket: &UdpSocket) {
        let mut scratch = [0u8; MAX_DATAGRAM];
        let mut dropped = 0usize;
        while let Ok(n) = socket.try_recv(&mut scratch) {
            dropped += 1;
            tracing::debug!(bytes = n, "Discarding stale FINS datagram");
        }
        if dropped > 0 {
            tracing::warn!(dropped, "Discarded stale replies before new request");
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>, FinsError> {
        let socket = self.socket.lock().await;
        Self::drain_stale(&socket);

        socket.send(frame).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        match timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(FinsError::Transport(e)),
            Err(_) => Err(FinsError::Timeout {
                endpoint: self.remote.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    fn endpoint(&self) -> String {
        self.remote.to_string()
    }
}
