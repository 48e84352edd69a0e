//! Fail-soft controller connector.
//!
//! `PlcConnector` owns the connection lifecycle and wraps [`FinsClient`] with a
//! facade that never propagates a fault: failed reads come back as `None` (or a
//! zero-filled block), failed writes as `false`, and every failure leaves a log
//! record. The trigger monitor can therefore poll without per-call error
//! handling.
//!
//! Connecting has no handshake. A single successful heartbeat-bit read is the
//! connectivity proof; anything else is a failed connect. There is no automatic
//! reconnect.
//!
//! # Example
//! ```no_run
//! # async fn demo() {
//! use fins_daq::hardware::PlcConnector;
//! use fins_daq::messages::EventBus;
//!
//! let connector = PlcConnector::new(EventBus::default());
//! let endpoint = std::net::SocketAddr::from(([172, 22, 80, 1], 9600));
//! if connector.connect(endpoint, 1, 3).await {
//!     let trigger = connector.read_trigger_bit(0xAF, 1, 1).await;
//! }
//! # }
//! ```

use super::fins::{Address, FinsClient, Transport, UdpTransport};
use crate::error::FinsError;
use crate::hardware::fins::frame::decode_signed;
use crate::messages::{DaqEvent, EventBus};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Default heartbeat bit: area 0xAF, word 0, bit 0.
pub const DEFAULT_HEARTBEAT: Address = Address::bit(0xAF, 0, 0);

/// Default reply timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Typed, fail-soft facade over one FINS connection.
pub struct PlcConnector {
    client: RwLock<Option<FinsClient>>,
    connected: AtomicBool,
    heartbeat: Address,
    timeout: Duration,
    events: EventBus,
}

impl PlcConnector {
    /// Create a disconnected connector publishing status changes on `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            client: RwLock::new(None),
            connected: AtomicBool::new(false),
            heartbeat: DEFAULT_HEARTBEAT,
            timeout: DEFAULT_TIMEOUT,
            events,
        }
    }

    /// Set the heartbeat bit used as connectivity proof.
    pub fn with_heartbeat(mut self, heartbeat: Address) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the per-request reply timeout used by [`connect`](Self::connect).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Event bus this connector publishes on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Open a UDP transport to `endpoint` and probe the heartbeat bit.
    pub async fn connect(&self, endpoint: SocketAddr, plc_node: u8, pc_node: u8) -> bool {
        tracing::info!(%endpoint, plc_node, pc_node, "Connecting to PLC");
        match UdpTransport::connect(endpoint, self.timeout).await {
            Ok(transport) => self.connect_with(Arc::new(transport), plc_node, pc_node).await,
            Err(e) => {
                tracing::error!(%endpoint, error = %e, "Failed to open FINS socket");
                self.set_connected(false);
                false
            }
        }
    }

    /// Connect over an already constructed transport.
    pub async fn connect_with(
        &self,
        transport: Arc<dyn Transport>,
        plc_node: u8,
        pc_node: u8,
    ) -> bool {
        let client = FinsClient::new(transport, plc_node, pc_node);
        let hb = self.heartbeat;

        match client.read_bit(hb.area, hb.word, hb.bit).await {
            Ok(_) => {
                tracing::info!(endpoint = %client.endpoint(), "PLC connected");
                *self.client.write().await = Some(client);
                self.set_connected(true);
                true
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %client.endpoint(),
                    error = %e,
                    "PLC connect failed: no heartbeat reply"
                );
                *self.client.write().await = None;
                self.set_connected(false);
                false
            }
        }
    }

    /// Drop the transport and clear the connectivity flag.
    pub async fn disconnect(&self) {
        if self.client.write().await.take().is_some() {
            tracing::info!("PLC disconnected");
        }
        self.set_connected(false);
    }

    /// Current connectivity flag.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.events
            .publish(DaqEvent::ConnectionStatusChanged(connected));
    }

    async fn client(&self) -> Option<FinsClient> {
        let client = self.client.read().await.clone();
        if client.is_none() {
            tracing::warn!(error = %FinsError::NotConnected, "PLC request skipped");
        }
        client
    }

    /// Read the configured heartbeat bit.
    pub async fn read_heartbeat_bit(&self) -> Option<bool> {
        let hb = self.heartbeat;
        let client = self.client().await?;
        client
            .read_bit(hb.area, hb.word, hb.bit)
            .await
            .map_err(|e| tracing::error!(address = %hb, error = %e, "Heartbeat read failed"))
            .ok()
    }

    /// Read one trigger or area-selector bit.
    pub async fn read_trigger_bit(&self, area: u8, word_addr: u16, bit_offset: u8) -> Option<bool> {
        let client = self.client().await?;
        client
            .read_bit(area, word_addr, bit_offset)
            .await
            .map_err(|e| {
                tracing::error!(
                    address = %Address::bit(area, word_addr, bit_offset),
                    error = %e,
                    "Trigger bit read failed"
                )
            })
            .ok()
    }

    /// Read `count` raw words.
    pub async fn read_word(&self, area: u8, word_addr: u16, count: u16) -> Option<Vec<u16>> {
        let client = self.client().await?;
        client
            .read_words(area, word_addr, count)
            .await
            .map_err(|e| {
                tracing::error!(
                    address = %Address::word(area, word_addr),
                    count,
                    error = %e,
                    "Word read failed"
                )
            })
            .ok()
    }

    /// Read one word and reinterpret it as signed.
    pub async fn read_signed_word(&self, area: u8, word_addr: u16) -> Option<i32> {
        self.read_word(area, word_addr, 1)
            .await
            .and_then(|words| words.first().copied())
            .map(decode_signed)
    }

    /// Read exactly `count` words; missing or failed words read as zero.
    pub async fn read_block(&self, area: u8, word_addr: u16, count: u16) -> Vec<u16> {
        let len = usize::from(count);
        match self.read_word(area, word_addr, count).await {
            Some(mut words) => {
                words.resize(len, 0);
                words
            }
            None => {
                tracing::warn!(
                    address = %Address::word(area, word_addr),
                    count,
                    "Block read failed, substituting zeros"
                );
                vec![0; len]
            }
        }
    }

    /// Write one word. `true` means a reply was received.
    pub async fn write_word(&self, area: u8, word_addr: u16, value: u16) -> bool {
        let Some(client) = self.client().await else {
            return false;
        };
        match client.write_word(area, word_addr, value).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    address = %Address::word(area, word_addr),
                    value,
                    error = %e,
                    "Word write failed"
                );
                false
            }
        }
    }

    /// Set or clear a response bit (read-modify-write).
    pub async fn write_response_bit(
        &self,
        area: u8,
        word_addr: u16,
        bit_offset: u8,
        on: bool,
    ) -> bool {
        let Some(client) = self.client().await else {
            return false;
        };
        match client.write_bit(area, word_addr, bit_offset, on).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    address = %Address::bit(area, word_addr, bit_offset),
                    on,
                    error = %e,
                    "Response bit write failed"
                );
                false
            }
        }
    }
}
