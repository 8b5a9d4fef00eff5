//! # ShardCask
//!
//! An embeddable Bitcask-style key-value storage engine with:
//! - Append-only, checksummed segment files
//! - In-memory or disk-resident key index, split into shards by a hash ring
//! - Atomic write batches with crash-safe recovery
//! - Online merge that rewrites live data and retires dead segments
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Engine  (put / get / delete / batch)            │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ append                        │ route(key)
//!                ▼                               ▼
//!   ┌─────────────────────────┐      ┌──────────────────────────┐
//!   │      Segment files      │      │        Hash ring         │
//!   │ 000000000.data (sealed) │      └─────┬──────┬──────┬──────┘
//!   │ 000000001.data (sealed) │            ▼      ▼      ▼
//!   │ 000000002.data (active) │         shard0 shard1 shard2 ...
//!   └────────────┬────────────┘         (BTree | ART | sled)
//!                │ merge
//!                ▼
//!   ┌─────────────────────────┐
//!   │ <dir>-merge + hint-index│
//!   └─────────────────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use shardcask::{Config, Engine};
//!
//! let engine = Engine::open(Config::builder().dir_path("/tmp/shardcask-demo").build())?;
//! engine.put(b"hello", b"world")?;
//! assert_eq!(engine.get(b"hello")?, b"world".to_vec());
//! # Ok::<(), shardcask::CaskError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod batch;
pub mod data;
pub mod engine;
pub mod fio;
pub mod index;
pub mod iterator;
pub mod util;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use batch::WriteBatch;
pub use config::{Config, IndexType, IteratorOptions, WriteBatchOptions};
pub use engine::{Engine, Stat};
pub use error::{CaskError, Result};
pub use iterator::DbIterator;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ShardCask
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
