//! FINS frame construction and reply decoding.
//!
//! Protocol Overview:
//! - Transport: UDP, one request datagram answered by one reply datagram
//! - Header: 10 bytes `[ICF, RSV, GCT, DNA, DA1, DA2, SNA, SA1, SA2, SID]`
//! - Memory area read: command code `01 01`
//! - Memory area write: command code `01 02`
//! - Reply: header (10) + command code echo (2) + end code (2) + data
//!
//! Only the two memory-area commands are supported. Word values travel as
//! unsigned big-endian `u16`; temperatures and tuning parameters are signed
//! 16-bit quantities on the controller side, see [`decode_signed`] and
//! [`encode_signed`].

use crate::error::FinsError;
use serde::{Deserialize, Serialize};

/// Length of the fixed FINS header.
pub const HEADER_LEN: usize = 10;

/// Offset of the two-byte end code in a reply.
pub const END_CODE_OFFSET: usize = 12;

/// Offset of the first data byte in a memory-area read reply.
pub const RESPONSE_DATA_OFFSET: usize = 14;

/// Memory area read command code.
pub const CMD_MEMORY_AREA_READ: [u8; 2] = [0x01, 0x01];

/// Memory area write command code.
pub const CMD_MEMORY_AREA_WRITE: [u8; 2] = [0x01, 0x02];

/// One controller memory cell or bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Memory-area code (e.g. `0xA0`, `0xAF`)
    pub area: u8,
    /// Word offset inside the area
    pub word: u16,
    /// Bit offset inside the word (0-15)
    #[serde(default)]
    pub bit: u8,
}

impl Address {
    /// Word address (bit offset 0).
    pub const fn word(area: u8, word: u16) -> Self {
        Self { area, word, bit: 0 }
    }

    /// Bit address.
    pub const fn bit(area: u8, word: u16, bit: u8) -> Self {
        Self { area, word, bit }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X}:{}.{:02}", self.area, self.word, self.bit)
    }
}

/// Node addressing carried in every request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinsHeader {
    /// Destination (PLC) node number
    pub dest_node: u8,
    /// Source (local PC) node number
    pub src_node: u8,
}

impl FinsHeader {
    /// Create a header for the given PLC and local node numbers.
    pub fn new(dest_node: u8, src_node: u8) -> Self {
        Self {
            dest_node,
            src_node,
        }
    }

    /// Serialize the 10-byte header.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        [
            0x80,
            0x00,
            0x02,
            0x00,
            self.dest_node,
            0x00,
            0x00,
            self.src_node,
            0x00,
            0x00,
        ]
    }

    /// Header followed by the command body.
    pub fn frame(&self, body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&self.to_bytes());
        frame.extend_from_slice(body);
        frame
    }
}

/// Build a memory-area read command body.
///
/// `[0x01, 0x01, area, addrHi, addrLo, bit, countHi, countLo]`
pub fn build_read_command(area: u8, word_addr: u16, bit_offset: u8, word_count: u16) -> Vec<u8> {
    let [addr_hi, addr_lo] = word_addr.to_be_bytes();
    let [count_hi, count_lo] = word_count.to_be_bytes();
    vec![
        CMD_MEMORY_AREA_READ[0],
        CMD_MEMORY_AREA_READ[1],
        area,
        addr_hi,
        addr_lo,
        bit_offset,
        count_hi,
        count_lo,
    ]
}

/// Build a single-word memory-area write command body.
///
/// `[0x01, 0x02, area, addrHi, addrLo, bit, 0x00, 0x01, dataHi, dataLo]`
pub fn build_write_command(area: u8, word_addr: u16, bit_offset: u8, value: u16) -> Vec<u8> {
    let [addr_hi, addr_lo] = word_addr.to_be_bytes();
    let [data_hi, data_lo] = value.to_be_bytes();
    vec![
        CMD_MEMORY_AREA_WRITE[0],
        CMD_MEMORY_AREA_WRITE[1],
        area,
        addr_hi,
        addr_lo,
        bit_offset,
        0x00,
        0x01,
        data_hi,
        data_lo,
    ]
}

/// End code of a reply, if the reply is long enough to carry one.
///
/// `0x0000` means normal completion. Other values are controller diagnostics.
pub fn end_code(reply: &[u8]) -> Option<u16> {
    reply
        .get(END_CODE_OFFSET..END_CODE_OFFSET + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Decode a single-word read reply: the value is the last two bytes.
///
/// The reply must at least reach the end of the first data word, otherwise the
/// "last two bytes" would alias header or end-code bytes.
pub fn decode_single_word(reply: &[u8]) -> Result<u16, FinsError> {
    let expected = RESPONSE_DATA_OFFSET + 2;
    if reply.len() < expected {
        return Err(FinsError::MalformedResponse {
            expected,
            actual: reply.len(),
        });
    }
    let tail = &reply[reply.len() - 2..];
    Ok(u16::from_be_bytes([tail[0], tail[1]]))
}

/// Decode `count` consecutive big-endian words starting at the data offset.
pub fn decode_words(reply: &[u8], count: u16) -> Result<Vec<u16>, FinsError> {
    let count = usize::from(count);
    let expected = RESPONSE_DATA_OFFSET + 2 * count;
    if reply.len() < expected {
        return Err(FinsError::MalformedResponse {
            expected,
            actual: reply.len(),
        });
    }
    Ok(reply[RESPONSE_DATA_OFFSET..expected]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Extract one bit from a word. Offsets above 15 read as 0.
pub fn extract_bit(word: u16, bit_offset: u8) -> bool {
    bit_offset < 16 && (word >> bit_offset) & 1 == 1
}

/// Set or clear one bit of a word. Offsets above 15 leave the word unchanged.
pub fn with_bit(word: u16, bit_offset: u8, on: bool) -> u16 {
    if bit_offset >= 16 {
        return word;
    }
    if on {
        word | (1 << bit_offset)
    } else {
        word & !(1 << bit_offset)
    }
}

/// Reinterpret a raw wire word as a signed two's-complement value.
pub fn decode_signed(raw: u16) -> i32 {
    let raw = i32::from(raw);
    if raw >= 32768 {
        raw - 65536
    } else {
        raw
    }
}

/// Encode a signed domain value into its raw wire word.
///
/// Values outside `-32768..=32767` saturate to the nearest representable word.
pub fn encode_signed(value: i32) -> u16 {
    let clamped = value.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
    if clamped < 0 {
        (clamped + 65536) as u16
    } else {
        clamped as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_with_words(words: &[u16]) -> Vec<u8> {
        let mut reply = FinsHeader::new(3, 1).to_bytes().to_vec();
        reply.extend_from_slice(&CMD_MEMORY_AREA_READ);
        reply.extend_from_slice(&[0x00, 0x00]);
        for w in words {
            reply.extend_from_slice(&w.to_be_bytes());
        }
        reply
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(
            FinsHeader::new(1, 3).to_bytes(),
            [0x80, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x03, 0x00, 0x00]
        );
    }

    #[test]
    fn test_build_read_command() {
        assert_eq!(
            build_read_command(0xAF, 1, 2, 1),
            vec![0x01, 0x01, 0xAF, 0x00, 0x01, 0x02, 0x00, 0x01]
        );
        assert_eq!(
            build_read_command(0xA0, 17550, 0, 8),
            vec![0x01, 0x01, 0xA0, 0x44, 0x8E, 0x00, 0x00, 0x08]
        );
    }

    #[test]
    fn test_build_write_command() {
        assert_eq!(
            build_write_command(0xA0, 840, 0, 0xFFFE),
            vec![0x01, 0x02, 0xA0, 0x03, 0x48, 0x00, 0x00, 0x01, 0xFF, 0xFE]
        );
    }

    #[test]
    fn test_frame_concatenates_header_and_body() {
        let body = build_read_command(0xAF, 0, 0, 1);
        let frame = FinsHeader::new(1, 3).frame(&body);
        assert_eq!(frame.len(), HEADER_LEN + body.len());
        assert_eq!(&frame[HEADER_LEN..], body.as_slice());
    }

    #[test]
    fn test_decode_single_word_uses_last_two_bytes() {
        let reply = reply_with_words(&[0x1234]);
        assert_eq!(decode_single_word(&reply).unwrap(), 0x1234);
        assert_eq!(end_code(&reply), Some(0));
    }

    #[test]
    fn test_decode_rejects_short_replies() {
        let reply = reply_with_words(&[]);
        assert!(matches!(
            decode_single_word(&reply),
            Err(FinsError::MalformedResponse {
                expected: 16,
                actual: 14
            })
        ));

        let reply = reply_with_words(&[1, 2, 3]);
        assert!(matches!(
            decode_words(&reply, 4),
            Err(FinsError::MalformedResponse {
                expected: 22,
                actual: 20
            })
        ));
        assert_eq!(end_code(&[0x80, 0x00]), None);
    }

    #[test]
    fn test_decode_words_ignores_trailing_bytes() {
        let mut reply = reply_with_words(&[7, 0xFFFF, 42]);
        reply.push(0xEE);
        assert_eq!(decode_words(&reply, 3).unwrap(), vec![7, 0xFFFF, 42]);
        assert_eq!(decode_words(&reply, 2).unwrap(), vec![7, 0xFFFF]);
    }

    #[test]
    fn test_bit_helpers() {
        assert!(extract_bit(0b0110, 1));
        assert!(!extract_bit(0b0110, 0));
        assert!(!extract_bit(0xFFFF, 16));
        assert_eq!(with_bit(0b0100, 0, true), 0b0101);
        assert_eq!(with_bit(0b0101, 2, false), 0b0001);
        assert_eq!(with_bit(0x00FF, 20, true), 0x00FF);
    }

    #[test]
    fn test_signed_round_trip_over_full_range() {
        for raw in 0..=u16::MAX {
            assert_eq!(encode_signed(decode_signed(raw)), raw);
        }
        assert_eq!(decode_signed(32767), 32767);
        assert_eq!(decode_signed(32768), -32768);
        assert_eq!(decode_signed(65535), -1);
    }

    #[test]
    fn test_encode_signed_saturates() {
        assert_eq!(encode_signed(-1), 0xFFFF);
        assert_eq!(encode_signed(40_000), 0x7FFF);
        assert_eq!(encode_signed(-40_000), 0x8000);
    }
}
