//! Mock Hardware Implementations
//!
//! Provides a simulated FINS controller for testing without a physical PLC.
//! `MockPlc` implements [`Transport`] directly: it decodes each request frame,
//! applies it to an in-memory word map and answers with a well-formed reply.
//!
//! # Fault injection
//!
//! - `set_online(false)`: every exchange times out
//! - `set_unreachable(area, word, true)`: requests starting at that word time out
//! - `set_truncate_replies(true)`: replies stop after the end code (no data)
//!
//! Only the most recent requests are kept (see [`MockPlc::with_log_capacity`]),
//! so a long simulated run does not grow without bound.
//!
//! # Example
//!
//! ```
//! use fins_daq::hardware::{MockPlc, PlcConnector};
//! use fins_daq::messages::EventBus;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let plc = Arc::new(MockPlc::new());
//! plc.set_word(0xA0, 840, 12).await;
//!
//! let connector = PlcConnector::new(EventBus::default());
//! assert!(connector.connect_with(plc.clone(), 1, 3).await);
//! assert_eq!(connector.read_word(0xA0, 840, 1).await, Some(vec![12]));
//! # });
//! ```

use crate::error::FinsError;
use crate::hardware::fins::frame::{
    Address, CMD_MEMORY_AREA_READ, CMD_MEMORY_AREA_WRITE, HEADER_LEN,
};
use crate::hardware::fins::Transport;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Requests remembered by default.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// End code: normal completion.
const END_OK: [u8; 2] = [0x00, 0x00];
/// End code: command too short.
const END_TOO_SHORT: [u8; 2] = [0x10, 0x01];
/// End code: unsupported command.
const END_UNSUPPORTED: [u8; 2] = [0x04, 0x01];

/// One request observed by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRequest {
    /// Memory-area read of `count` words
    Read {
        /// First word read
        address: Address,
        /// Number of words
        count: u16,
    },
    /// Single-word memory-area write
    Write {
        /// Word written
        address: Address,
        /// Value written
        value: u16,
    },
}

/// Simulated PLC answering FINS memory-area read/write commands.
pub struct MockPlc {
    memory: Mutex<HashMap<(u8, u16), u16>>,
    log: Mutex<VecDeque<MockRequest>>,
    log_capacity: usize,
    unreachable: Mutex<HashSet<(u8, u16)>>,
    online: AtomicBool,
    truncate: AtomicBool,
}

impl MockPlc {
    /// Create an online controller with all memory reading as zero.
    pub fn new() -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            log: Mutex::new(VecDeque::new()),
            log_capacity: DEFAULT_LOG_CAPACITY,
            unreachable: Mutex::new(HashSet::new()),
            online: AtomicBool::new(true),
            truncate: AtomicBool::new(false),
        }
    }

    /// Keep at most `capacity` requests, dropping the oldest first.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Take the controller on or off the network.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Answer with replies that carry no data bytes.
    pub fn set_truncate_replies(&self, truncate: bool) {
        self.truncate.store(truncate, Ordering::SeqCst);
    }

    /// Make requests that start at `area:word` time out.
    pub async fn set_unreachable(&self, area: u8, word: u16, unreachable: bool) {
        let mut set = self.unreachable.lock().await;
        if unreachable {
            set.insert((area, word));
        } else {
            set.remove(&(area, word));
        }
    }

    /// Set one word.
    pub async fn set_word(&self, area: u8, word: u16, value: u16) {
        self.memory.lock().await.insert((area, word), value);
    }

    /// Set consecutive words starting at `word`.
    pub async fn set_words(&self, area: u8, word: u16, values: &[u16]) {
        let mut memory = self.memory.lock().await;
        for (i, value) in values.iter().enumerate() {
            memory.insert((area, word.wrapping_add(i as u16)), *value);
        }
    }

    /// Set or clear one bit without touching the rest of the word.
    pub async fn set_bit(&self, area: u8, word: u16, bit: u8, on: bool) {
        let mut memory = self.memory.lock().await;
        let entry = memory.entry((area, word)).or_insert(0);
        *entry = crate::hardware::fins::frame::with_bit(*entry, bit, on);
    }

    /// Current value of one word.
    pub async fn word(&self, area: u8, word: u16) -> u16 {
        self.memory
            .lock()
            .await
            .get(&(area, word))
            .copied()
            .unwrap_or(0)
    }

    /// Word writes still in the request log, in order.
    pub async fn writes(&self) -> Vec<(Address, u16)> {
        self.log
            .lock()
            .await
            .iter()
            .filter_map(|r| match r {
                MockRequest::Write { address, value } => Some((*address, *value)),
                MockRequest::Read { .. } => None,
            })
            .collect()
    }

    async fn record(&self, request: MockRequest) {
        if self.log_capacity == 0 {
            return;
        }
        let mut log = self.log.lock().await;
        while log.len() >= self.log_capacity {
            log.pop_front();
        }
        log.push_back(request);
    }

    fn reply_header(request: &[u8]) -> Vec<u8> {
        // Response header swaps destination and source nodes.
        vec![
            0xC0, 0x00, 0x02, 0x00, request[7], 0x00, 0x00, request[4], 0x00, request[9],
        ]
    }

    async fn handle(&self, frame: &[u8]) -> Result<Vec<u8>, FinsError> {
        if frame.len() < HEADER_LEN + 2 {
            return Err(FinsError::MalformedResponse {
                expected: HEADER_LEN + 2,
                actual: frame.len(),
            });
        }
        let mut reply = Self::reply_header(frame);
        let body = &frame[HEADER_LEN..];
        let command = [body[0], body[1]];
        reply.extend_from_slice(&command);

        if body.len() >= 6 {
            let address = Address::bit(body[2], u16::from_be_bytes([body[3], body[4]]), body[5]);
            if self
                .unreachable
                .lock()
                .await
                .contains(&(address.area, address.word))
            {
                return Err(self.timeout());
            }
        }

        match command {
            CMD_MEMORY_AREA_READ if body.len() >= 8 => {
                let address = Address::bit(body[2], u16::from_be_bytes([body[3], body[4]]), body[5]);
                let count = u16::from_be_bytes([body[6], body[7]]);
                self.record(MockRequest::Read { address, count }).await;

                reply.extend_from_slice(&END_OK);
                if !self.truncate.load(Ordering::SeqCst) {
                    let memory = self.memory.lock().await;
                    for i in 0..count {
                        let value = memory
                            .get(&(address.area, address.word.wrapping_add(i)))
                            .copied()
                            .unwrap_or(0);
                        reply.extend_from_slice(&value.to_be_bytes());
                    }
                }
            }
            CMD_MEMORY_AREA_WRITE if body.len() >= 10 => {
                let address = Address::bit(body[2], u16::from_be_bytes([body[3], body[4]]), body[5]);
                let value = u16::from_be_bytes([body[8], body[9]]);
                self.record(MockRequest::Write { address, value }).await;
                self.memory
                    .lock()
                    .await
                    .insert((address.area, address.word), value);
                reply.extend_from_slice(&END_OK);
            }
            CMD_MEMORY_AREA_READ | CMD_MEMORY_AREA_WRITE => {
                reply.extend_from_slice(&END_TOO_SHORT);
            }
            _ => reply.extend_from_slice(&END_UNSUPPORTED),
        }
        Ok(reply)
    }

    fn timeout(&self) -> FinsError {
        FinsError::Timeout {
            endpoint: self.endpoint(),
            timeout: Duration::ZERO,
        }
    }
}

impl Default for MockPlc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockPlc {
    async fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>, FinsError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(self.timeout());
        }
        self.handle(frame).await
    }

    fn endpoint(&self) -> String {
        "mock-plc".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::fins::frame::{build_read_command, build_write_command, FinsHeader};

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let plc = MockPlc::new();
        let header = FinsHeader::new(1, 3);

        let write = header.frame(&build_write_command(0xA0, 840, 0, 0xFFFB));
        let reply = plc.exchange(&write).await.unwrap();
        assert_eq!(&reply[10..14], &[0x01, 0x02, 0x00, 0x00]);

        let read = header.frame(&build_read_command(0xA0, 840, 0, 1));
        let reply = plc.exchange(&read).await.unwrap();
        assert_eq!(reply.len(), 16);
        assert_eq!(&reply[14..], &[0xFF, 0xFB]);
        // Nodes swapped in the reply header
        assert_eq!(reply[4], 3);
        assert_eq!(reply[7], 1);

        assert_eq!(
            plc.writes().await,
            vec![(Address::word(0xA0, 840), 0xFFFB)]
        );
    }

    #[tokio::test]
    async fn test_request_log_keeps_most_recent() {
        let plc = MockPlc::new().with_log_capacity(3);
        let header = FinsHeader::new(1, 3);
        for word in 0..5u16 {
            let write = header.frame(&build_write_command(0xA0, word, 0, word + 100));
            plc.exchange(&write).await.unwrap();
        }
        let words: Vec<u16> = plc.writes().await.iter().map(|(a, _)| a.word).collect();
        assert_eq!(words, vec![2, 3, 4]);
        // Memory itself is unaffected by the log bound.
        assert_eq!(plc.word(0xA0, 0).await, 100);

        let quiet = MockPlc::new().with_log_capacity(0);
        quiet
            .exchange(&header.frame(&build_write_command(0xA0, 1, 0, 1)))
            .await
            .unwrap();
        assert!(quiet.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_command_reports_end_code() {
        let plc = MockPlc::new();
        let frame = FinsHeader::new(1, 3).frame(&[0x05, 0x01]);
        let reply = plc.exchange(&frame).await.unwrap();
        assert_eq!(&reply[12..14], &END_UNSUPPORTED);
    }

    #[tokio::test]
    async fn test_unreachable_word_times_out() {
        let plc = MockPlc::new();
        plc.set_unreachable(0xA0, 17550, true).await;
        let frame = FinsHeader::new(1, 3).frame(&build_read_command(0xA0, 17550, 0, 8));
        assert!(plc.exchange(&frame).await.unwrap_err().is_no_reply());

        let frame = FinsHeader::new(1, 3).frame(&build_read_command(0xA0, 17560, 0, 8));
        assert!(plc.exchange(&frame).await.is_ok());
    }
}
