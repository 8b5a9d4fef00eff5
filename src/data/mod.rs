//! Data Module
//!
//! The on-disk record format and the append-only files that hold it.
//!
//! ## Record Format
//! ```text
//! ┌─────────┬──────────┬───────────────┬────────────────┬──────────────────┬─────┬───────┐
//! │ CRC (4) │ Type (1) │ Timestamp (4) │ KeyLen(varint) │ ValueLen(varint) │ Key │ Value │
//! └─────────┴──────────┴───────────────┴────────────────┴──────────────────┴─────┴───────┘
//!            └──────────────────────── covered by CRC ────────────────────────────────┘
//! ```
//!
//! Every stored key carries a varint sequence-number prefix:
//! `0` for standalone writes, the batch sequence number otherwise.

mod data_file;
mod record;

pub use data_file::{
    data_file_name, parse_data_file_id, DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME,
    MERGE_FINISHED_FILE_NAME, MERGE_FINISHED_KEY, SEQ_NO_FILE_NAME, SEQ_NO_KEY,
};
pub use record::{
    decode_log_record, decode_log_record_header, decode_record_pos, encode_log_record,
    encode_record_pos, log_record_crc, log_record_key_with_seq, parse_log_record_key, put_varint,
    read_varint, LogRecord, LogRecordHeader, LogRecordType, RecordPos, CRC_SIZE, MAX_HEADER_SIZE,
    NON_TXN_SEQ, TXN_FIN_KEY,
};
