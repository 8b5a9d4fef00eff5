//! Record codec
//!
//! Binary encoding of a single log record plus the sequence-number key prefix.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{CaskError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Size of the leading CRC field
pub const CRC_SIZE: usize = 4;

/// CRC (4) + type (1) + timestamp (4)
const FIXED_HEADER_SIZE: usize = CRC_SIZE + 1 + 4;

/// Longest varint needed for a u32 length
const MAX_VARINT32_LEN: usize = 5;

/// Longest varint needed for a u64
const MAX_VARINT64_LEN: usize = 10;

/// Largest possible record header
pub const MAX_HEADER_SIZE: usize = FIXED_HEADER_SIZE + MAX_VARINT32_LEN * 2;

/// Sequence number used by writes outside a batch
pub const NON_TXN_SEQ: u64 = 0;

/// Key of the marker record that commits a batch
pub const TXN_FIN_KEY: &[u8] = b"txn-fin";

// =============================================================================
// Types
// =============================================================================

/// Kind of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A live value
    Normal = 0,

    /// A tombstone
    Deleted = 1,

    /// Commit point of a write batch
    TxnFinished = 2,
}

impl LogRecordType {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(LogRecordType::Normal),
            1 => Some(LogRecordType::Deleted),
            2 => Some(LogRecordType::TxnFinished),
            _ => None,
        }
    }
}

/// A single entry appended to a segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

impl LogRecord {
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            rec_type: LogRecordType::Normal,
        }
    }

    pub fn deleted(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            rec_type: LogRecordType::Deleted,
        }
    }
}

/// Where a record lives on disk. This is what the index stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordPos {
    /// Segment id
    pub file_id: u32,
    /// Byte offset of the record inside the segment
    pub offset: u64,
    /// Encoded size of the record
    pub size: u32,
}

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub crc: u32,
    pub rec_type: u8,
    pub timestamp: u32,
    pub key_size: u32,
    pub value_size: u32,
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a record
///
/// Layout: `crc(4) | type(1) | timestamp_ms(4) | varint(key_len) | varint(value_len) | key | value`.
/// The CRC covers every byte after itself. Returns the bytes and their length.
pub fn encode_log_record(record: &LogRecord) -> (Vec<u8>, u64) {
    let mut buf =
        BytesMut::with_capacity(MAX_HEADER_SIZE + record.key.len() + record.value.len());

    buf.put_u32_le(0); // CRC placeholder
    buf.put_u8(record.rec_type as u8);
    buf.put_u32_le(timestamp_millis());
    put_varint(&mut buf, record.key.len() as u64);
    put_varint(&mut buf, record.value.len() as u64);
    buf.put_slice(&record.key);
    buf.put_slice(&record.value);

    let crc = crc32fast::hash(&buf[CRC_SIZE..]);
    buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

    let size = buf.len() as u64;
    (buf.to_vec(), size)
}

/// Decode a record header from the front of `buf`
///
/// Returns `None` when `buf` is too short to hold a complete header.
pub fn decode_log_record_header(buf: &[u8]) -> Option<(LogRecordHeader, usize)> {
    if buf.len() <= FIXED_HEADER_SIZE {
        return None;
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let rec_type = buf[4];
    let timestamp = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);

    let mut index = FIXED_HEADER_SIZE;
    let (key_size, n) = read_varint(&buf[index..])?;
    index += n;
    let (value_size, n) = read_varint(&buf[index..])?;
    index += n;

    Some((
        LogRecordHeader {
            crc,
            rec_type,
            timestamp,
            key_size: u32::try_from(key_size).ok()?,
            value_size: u32::try_from(value_size).ok()?,
        },
        index,
    ))
}

/// Decode one record from the front of `buf`
///
/// - `Err(EndOfLog)`: `buf` ends before the record does, or holds zeroed space
/// - `Err(CorruptRecord)`: the CRC does not match
pub fn decode_log_record(buf: &[u8]) -> Result<(LogRecord, u64)> {
    let (header, header_size) = decode_log_record_header(buf).ok_or(CaskError::EndOfLog)?;

    // Zero-filled space past the write frontier
    if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
        return Err(CaskError::EndOfLog);
    }

    let key_size = header.key_size as usize;
    let value_size = header.value_size as usize;
    let total = header_size + key_size + value_size;
    if buf.len() < total {
        return Err(CaskError::EndOfLog);
    }

    let key = &buf[header_size..header_size + key_size];
    let value = &buf[header_size + key_size..total];

    let actual = log_record_crc(&buf[CRC_SIZE..header_size], key, value);
    if actual != header.crc {
        return Err(CaskError::CorruptRecord(format!(
            "crc mismatch: stored {:#010x}, computed {:#010x}",
            header.crc, actual
        )));
    }

    let rec_type = LogRecordType::from_u8(header.rec_type).ok_or_else(|| {
        CaskError::CorruptRecord(format!("unknown record type {}", header.rec_type))
    })?;

    Ok((
        LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            rec_type,
        },
        total as u64,
    ))
}

/// CRC over the header (minus the CRC field), key and value
pub fn log_record_crc(header_without_crc: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_without_crc);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

// =============================================================================
// Sequence-number key prefix
// =============================================================================

/// Prefix a user key with its batch sequence number
pub fn log_record_key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(MAX_VARINT64_LEN + key.len());
    put_varint(&mut buf, seq_no);
    buf.put_slice(key);
    buf.to_vec()
}

/// Split a stored key into the user key and its sequence number
pub fn parse_log_record_key(key: &[u8]) -> Result<(Vec<u8>, u64)> {
    let (seq_no, n) = read_varint(key).ok_or_else(|| {
        CaskError::CorruptRecord("key is missing its sequence prefix".to_string())
    })?;
    Ok((key[n..].to_vec(), seq_no))
}

// =============================================================================
// Position encoding
// =============================================================================

/// Encode a position for hint records and the durable index
pub fn encode_record_pos(pos: &RecordPos) -> Result<Vec<u8>> {
    Ok(bincode::serialize(pos)?)
}

/// Decode a position written by [`encode_record_pos`]
pub fn decode_record_pos(buf: &[u8]) -> Result<RecordPos> {
    Ok(bincode::deserialize(buf)?)
}

// =============================================================================
// Helpers
// =============================================================================

/// Append an unsigned LEB128 varint
pub fn put_varint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read an unsigned LEB128 varint, returning the value and bytes consumed
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT64_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Wall-clock milliseconds truncated to 32 bits (informational only)
fn timestamp_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}
