//! FINS protocol client
//!
//! Wraps a [`Transport`] with the FINS header for one PLC/PC node pair and
//! exposes typed word and bit operations. Every operation is a single
//! request/response attempt and surfaces failures as [`FinsError`].
//!
//! # Concurrency precondition
//!
//! [`FinsClient::write_bit`] is a read-modify-write over two requests and is
//! not atomic. It is only correct when a single writer issues requests, which
//! the trigger monitor guarantees by serializing all PLC traffic on one task.

use super::frame::{self, FinsHeader};
use super::transport::Transport;
use crate::error::FinsError;
use std::sync::Arc;

/// Typed FINS client over a datagram transport.
#[derive(Clone)]
pub struct FinsClient {
    transport: Arc<dyn Transport>,
    header: FinsHeader,
}

impl FinsClient {
    /// Create a client for the given PLC node (`dest_node`) and local node (`src_node`).
    pub fn new(transport: Arc<dyn Transport>, dest_node: u8, src_node: u8) -> Self {
        tracing::info!(
            endpoint = %transport.endpoint(),
            plc_node = dest_node,
            pc_node = src_node,
            "FINS client initialized"
        );
        Self {
            transport,
            header: FinsHeader::new(dest_node, src_node),
        }
    }

    /// Remote endpoint description.
    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Prefix `body` with the header, send it, and return the raw reply.
    pub async fn send_command(&self, body: &[u8]) -> Result<Vec<u8>, FinsError> {
        let frame = self.header.frame(body);
        tracing::debug!(frame = %hex(&frame), "FINS send");

        let reply = self.transport.exchange(&frame).await.map_err(|e| {
            tracing::error!(endpoint = %self.transport.endpoint(), error = %e, "FINS exchange failed");
            e
        })?;

        tracing::debug!(reply = %hex(&reply), "FINS recv");
        if let Some(code) = frame::end_code(&reply).filter(|c| *c != 0) {
            tracing::warn!(end_code = %format!("{code:04X}"), "PLC reported non-zero end code");
        }
        Ok(reply)
    }

    /// Read one word. The value is taken from the last two bytes of the reply.
    pub async fn read_word(&self, area: u8, word_addr: u16) -> Result<u16, FinsError> {
        let cmd = frame::build_read_command(area, word_addr, 0, 1);
        let reply = self.send_command(&cmd).await?;
        frame::decode_single_word(&reply)
    }

    /// Read `count` consecutive words starting at `word_addr`.
    ///
    /// A count of 1 uses the single-word decode path so both entry points agree.
    pub async fn read_words(
        &self,
        area: u8,
        word_addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, FinsError> {
        if count <= 1 {
            return self.read_word(area, word_addr).await.map(|w| vec![w]);
        }
        let cmd = frame::build_read_command(area, word_addr, 0, count);
        let reply = self.send_command(&cmd).await?;
        frame::decode_words(&reply, count)
    }

    /// Read one bit. The bit offset is embedded in the command and then
    /// extracted from the returned word.
    pub async fn read_bit(&self, area: u8, word_addr: u16, bit_offset: u8) -> Result<bool, FinsError> {
        let cmd = frame::build_read_command(area, word_addr, bit_offset, 1);
        let reply = self.send_command(&cmd).await?;
        let word = frame::decode_single_word(&reply)?;
        let bit = frame::extract_bit(word, bit_offset);
        tracing::trace!(area, word_addr, bit_offset, bit, "Bit read");
        Ok(bit)
    }

    /// Write one word. Success means a reply was received.
    pub async fn write_word(&self, area: u8, word_addr: u16, value: u16) -> Result<(), FinsError> {
        let cmd = frame::build_write_command(area, word_addr, 0, value);
        self.send_command(&cmd).await?;
        tracing::debug!(area, word_addr, value, "Word write");
        Ok(())
    }

    /// Set or clear one bit via read-modify-write of the containing word.
    pub async fn write_bit(
        &self,
        area: u8,
        word_addr: u16,
        bit_offset: u8,
        on: bool,
    ) -> Result<(), FinsError> {
        let current = self.read_word(area, word_addr).await?;
        let updated = frame::with_bit(current, bit_offset, on);
        self.write_word(area, word_addr, updated).await?;
        tracing::info!(area, word_addr, bit_offset, on, "Bit write");
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockPlc;

    fn client(plc: &Arc<MockPlc>) -> FinsClient {
        FinsClient::new(plc.clone(), 1, 3)
    }

    #[tokio::test]
    async fn test_read_word_and_block() {
        let plc = Arc::new(MockPlc::new());
        plc.set_words(0xA0, 100, &[10, 20, 30]).await;
        let client = client(&plc);

        assert_eq!(client.read_word(0xA0, 101).await.unwrap(), 20);
        assert_eq!(
            client.read_words(0xA0, 100, 3).await.unwrap(),
            vec![10, 20, 30]
        );
        assert_eq!(client.read_words(0xA0, 102, 1).await.unwrap(), vec![30]);
    }

    #[tokio::test]
    async fn test_read_bit_extracts_offset() {
        let plc = Arc::new(MockPlc::new());
        plc.set_word(0xAF, 1, 0b0000_0110).await;
        let client = client(&plc);

        assert!(client.read_bit(0xAF, 1, 1).await.unwrap());
        assert!(client.read_bit(0xAF, 1, 2).await.unwrap());
        assert!(!client.read_bit(0xAF, 1, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_bit_preserves_other_bits() {
        let plc = Arc::new(MockPlc::new());
        plc.set_word(0xAF, 2, 0b1000_0001).await;
        let client = client(&plc);

        client.write_bit(0xAF, 2, 1, true).await.unwrap();
        assert_eq!(plc.word(0xAF, 2).await, 0b1000_0011);

        client.write_bit(0xAF, 2, 7, false).await.unwrap();
        assert_eq!(plc.word(0xAF, 2).await, 0b0000_0011);
    }

    #[tokio::test]
    async fn test_offline_plc_times_out() {
        let plc = Arc::new(MockPlc::new());
        plc.set_online(false);
        let client = client(&plc);

        let err = client.read_word(0xAF, 0).await.unwrap_err();
        assert!(err.is_no_reply());
    }

    #[tokio::test]
    async fn test_truncated_reply_is_malformed() {
        let plc = Arc::new(MockPlc::new());
        plc.set_truncate_replies(true);
        let client = client(&plc);

        let err = client.read_words(0xA0, 0, 4).await.unwrap_err();
        assert!(matches!(err, FinsError::MalformedResponse { .. }));
    }
}
