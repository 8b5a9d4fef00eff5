//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations
//! - Recovery after reopen, including torn and corrupt tails
//! - Segment rotation
//! - Directory locking
//! - Every index backend behind the same API
//! - Stat, backup and concurrent access

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use shardcask::data::{data_file_name, encode_log_record, log_record_key_with_seq, LogRecord};
use shardcask::util::copy_dir;
use shardcask::{CaskError, Config, Engine, IndexType, IteratorOptions, WriteBatchOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn db_dir(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("db")
}

fn config(dir: &Path) -> Config {
    Config::builder()
        .dir_path(dir)
        .mmap_at_startup(false)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config(&db_dir(&temp_dir))).unwrap();
    (temp_dir, engine)
}

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("nested").join("db");

    let _engine = Engine::open(config(&dir)).unwrap();

    assert!(dir.exists());
    assert!(data_file_name(&dir, 0).exists());
    assert!(dir.join("flock").exists());
}

#[test]
fn test_put_and_get() {
    let (_temp_dir, engine) = setup_temp_engine();

    engine.put(b"key1", b"value1").unwrap();
    engine.put(b"key2", b"value2").unwrap();

    assert_eq!(engine.get(b"key1").unwrap(), b"value1");
    assert_eq!(engine.get(b"key2").unwrap(), b"value2");
}

#[test]
fn test_overwrite_returns_latest_value() {
    let (_temp_dir, engine) = setup_temp_engine();

    engine.put(b"key", b"v1").unwrap();
    engine.put(b"key", b"v2").unwrap();
    engine.put(b"key", b"v3").unwrap();

    assert_eq!(engine.get(b"key").unwrap(), b"v3");
    assert_eq!(engine.stat().unwrap().key_num, 1);
}

#[test]
fn test_empty_value_is_stored() {
    let (_temp_dir, engine) = setup_temp_engine();
    engine.put(b"key", b"").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Vec::<u8>::new());
}

#[test]
fn test_empty_key_is_rejected() {
    let (_temp_dir, engine) = setup_temp_engine();

    assert!(matches!(engine.put(b"", b"v"), Err(CaskError::KeyIsEmpty)));
    assert!(matches!(engine.get(b""), Err(CaskError::KeyIsEmpty)));
    assert!(matches!(engine.delete(b""), Err(CaskError::KeyIsEmpty)));
}

#[test]
fn test_missing_key_is_not_found() {
    let (_temp_dir, engine) = setup_temp_engine();
    assert!(matches!(engine.get(b"nope"), Err(CaskError::KeyNotFound)));
}

#[test]
fn test_delete() {
    let (_temp_dir, engine) = setup_temp_engine();

    engine.put(b"key", b"value").unwrap();
    engine.delete(b"key").unwrap();

    assert!(matches!(engine.get(b"key"), Err(CaskError::KeyNotFound)));
}

#[test]
fn test_delete_absent_key_is_noop() {
    let (_temp_dir, engine) = setup_temp_engine();

    let before = engine.stat().unwrap();
    engine.delete(b"never-written").unwrap();
    engine.sync().unwrap();
    let after = engine.stat().unwrap();

    assert_eq!(before.disk_size, after.disk_size);
    assert_eq!(after.reclaimable_size, 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();

    let zero_size = Config::builder()
        .dir_path(db_dir(&temp_dir))
        .data_file_size(0)
        .build();
    assert!(matches!(Engine::open(zero_size), Err(CaskError::Config(_))));

    let bad_ratio = Config::builder()
        .dir_path(db_dir(&temp_dir))
        .merge_ratio(1.5)
        .build();
    assert!(matches!(Engine::open(bad_ratio), Err(CaskError::Config(_))));

    let no_shards = Config::builder()
        .dir_path(db_dir(&temp_dir))
        .index_shards(0)
        .build();
    assert!(matches!(Engine::open(no_shards), Err(CaskError::Config(_))));
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_reopen_after_put_and_delete() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);

    {
        let engine = Engine::open(config(&dir)).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        engine.put(b"k2", b"v2").unwrap();
        engine.delete(b"k1").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(config(&dir)).unwrap();
    assert!(matches!(engine.get(b"k1"), Err(CaskError::KeyNotFound)));
    assert_eq!(engine.get(b"k2").unwrap(), b"v2");
    assert_eq!(
        engine.list_keys(IteratorOptions::default()).unwrap(),
        vec![b"k2".to_vec()]
    );
}

#[test]
fn test_reopen_without_close() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);

    {
        let engine = Engine::open(config(&dir)).unwrap();
        for i in 0..100 {
            engine
                .put(format!("key-{}", i).as_bytes(), format!("value-{}", i).as_bytes())
                .unwrap();
        }
        // Dropped, not closed
    }

    let engine = Engine::open(config(&dir)).unwrap();
    for i in 0..100 {
        assert_eq!(
            engine.get(format!("key-{}", i).as_bytes()).unwrap(),
            format!("value-{}", i).into_bytes()
        );
    }
}

#[test]
fn test_reopen_with_mmap_startup() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let mmap_config = || {
        Config::builder()
            .dir_path(&dir)
            .data_file_size(256)
            .mmap_at_startup(true)
            .build()
    };

    {
        let engine = Engine::open(mmap_config()).unwrap();
        for i in 0..50 {
            engine.put(format!("k{:02}", i).as_bytes(), b"some value").unwrap();
        }
    }

    let engine = Engine::open(mmap_config()).unwrap();
    assert_eq!(engine.stat().unwrap().key_num, 50);

    // The active segment must be writable again after the mmap scan
    engine.put(b"after", b"reopen").unwrap();
    assert_eq!(engine.get(b"after").unwrap(), b"reopen");
}

#[test]
fn test_torn_tail_is_truncated() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);

    let valid_len = {
        let engine = Engine::open(config(&dir)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.close().unwrap();
        fs::metadata(data_file_name(&dir, 0)).unwrap().len()
    };

    // Half of a record, as if the process died mid-write
    let record = LogRecord::normal(log_record_key_with_seq(b"c", 0), b"3".to_vec());
    let (buf, _) = encode_log_record(&record);
    append_raw(&data_file_name(&dir, 0), &buf[..buf.len() / 2]);

    {
        let engine = Engine::open(config(&dir)).unwrap();
        assert_eq!(fs::metadata(data_file_name(&dir, 0)).unwrap().len(), valid_len);
        assert_eq!(engine.get(b"a").unwrap(), b"1");
        assert!(matches!(engine.get(b"c"), Err(CaskError::KeyNotFound)));

        engine.put(b"c", b"3").unwrap();
    }

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.get(b"b").unwrap(), b"2");
    assert_eq!(engine.get(b"c").unwrap(), b"3");
}

#[test]
fn test_corrupt_tail_of_active_segment_is_dropped() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);

    {
        let engine = Engine::open(config(&dir)).unwrap();
        engine.put(b"good", b"record").unwrap();
    }

    let record = LogRecord::normal(log_record_key_with_seq(b"bad", 0), b"record".to_vec());
    let (mut buf, _) = encode_log_record(&record);
    let last = buf.len() - 1;
    buf[last] ^= 0xFF;
    append_raw(&data_file_name(&dir, 0), &buf);

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.get(b"good").unwrap(), b"record");
    assert!(matches!(engine.get(b"bad"), Err(CaskError::KeyNotFound)));
    engine.put(b"next", b"write").unwrap();
    assert_eq!(engine.get(b"next").unwrap(), b"write");
}

#[test]
fn test_corrupt_sealed_segment_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let small = || {
        Config::builder()
            .dir_path(&dir)
            .data_file_size(64)
            .mmap_at_startup(false)
            .build()
    };

    {
        let engine = Engine::open(small()).unwrap();
        for i in 0..10 {
            engine
                .put(format!("key-{}", i).as_bytes(), b"0123456789abcdef")
                .unwrap();
        }
        assert!(engine.stat().unwrap().data_file_num > 1);
    }

    // Flip the last value byte of the first record in segment 0
    let path = data_file_name(&dir, 0);
    let mut bytes = fs::read(&path).unwrap();
    let first_len = 4 + 1 + 4 + 1 + 1 + 6 + 16;
    bytes[first_len - 1] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    assert!(matches!(
        Engine::open(small()),
        Err(CaskError::CorruptRecord(_))
    ));
}

#[test]
fn test_truncated_sealed_segment_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let small = || {
        Config::builder()
            .dir_path(&dir)
            .data_file_size(128)
            .mmap_at_startup(false)
            .build()
    };

    {
        let engine = Engine::open(small()).unwrap();
        for i in 0..10 {
            engine
                .put(format!("key-{}", i).as_bytes(), b"0123456789abcdef")
                .unwrap();
        }
        assert!(engine.stat().unwrap().data_file_num > 1);
    }

    // Segment 0 holds three records; cut the last one short
    let path = data_file_name(&dir, 0);
    let len = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 5)
        .unwrap();

    assert!(matches!(
        Engine::open(small()),
        Err(CaskError::CorruptRecord(_))
    ));
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_rotation_creates_sealed_segments() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let small = || {
        Config::builder()
            .dir_path(&dir)
            .data_file_size(128)
            .mmap_at_startup(false)
            .build()
    };

    {
        let engine = Engine::open(small()).unwrap();
        for i in 0..10 {
            // 11-byte header + 6-byte key + 15-byte value = 32 bytes on disk
            engine
                .put(format!("key-{}", i).as_bytes(), b"value-123456789")
                .unwrap();
        }

        let stat = engine.stat().unwrap();
        assert!(stat.data_file_num >= 3, "got {} files", stat.data_file_num);
        for i in 0..10 {
            assert_eq!(
                engine.get(format!("key-{}", i).as_bytes()).unwrap(),
                b"value-123456789"
            );
        }
    }

    for id in 0..3 {
        let len = fs::metadata(data_file_name(&dir, id)).unwrap().len();
        assert!(len <= 128);
    }

    let engine = Engine::open(small()).unwrap();
    for i in 0..10 {
        assert_eq!(
            engine.get(format!("key-{}", i).as_bytes()).unwrap(),
            b"value-123456789"
        );
    }
}

#[test]
fn test_oversized_record_gets_its_own_segment() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let engine = Engine::open(
        Config::builder()
            .dir_path(&dir)
            .data_file_size(64)
            .build(),
    )
    .unwrap();

    let big = vec![7u8; 500];
    engine.put(b"small", b"x").unwrap();
    engine.put(b"big", &big).unwrap();
    engine.put(b"after", b"y").unwrap();

    assert_eq!(engine.get(b"big").unwrap(), big);
    assert_eq!(engine.get(b"after").unwrap(), b"y");
    assert_eq!(engine.stat().unwrap().data_file_num, 3);
}

// =============================================================================
// Locking Tests
// =============================================================================

#[test]
fn test_second_open_fails_fast() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);

    let engine = Engine::open(config(&dir)).unwrap();
    assert!(matches!(
        Engine::open(config(&dir)),
        Err(CaskError::DatabaseInUse)
    ));

    engine.close().unwrap();
    drop(engine);
    assert!(Engine::open(config(&dir)).is_ok());
}

// =============================================================================
// Index Backend Tests
// =============================================================================

#[test]
fn test_every_backend_recovers() {
    for index_type in [IndexType::BTree, IndexType::Art, IndexType::BPlusTree] {
        let temp_dir = TempDir::new().unwrap();
        let dir = db_dir(&temp_dir);
        let cfg = || {
            Config::builder()
                .dir_path(&dir)
                .index_type(index_type)
                .index_shards(3)
                .build()
        };

        {
            let engine = Engine::open(cfg()).unwrap();
            for i in 0..200 {
                engine
                    .put(format!("user:{:03}", i).as_bytes(), format!("{}", i).as_bytes())
                    .unwrap();
            }
            for i in (0..200).step_by(2) {
                engine.delete(format!("user:{:03}", i).as_bytes()).unwrap();
            }
            engine.close().unwrap();
        }

        let engine = Engine::open(cfg()).unwrap();
        assert_eq!(engine.stat().unwrap().key_num, 100, "{:?}", index_type);
        assert_eq!(engine.get(b"user:001").unwrap(), b"1", "{:?}", index_type);
        assert!(
            matches!(engine.get(b"user:002"), Err(CaskError::KeyNotFound)),
            "{:?}",
            index_type
        );
    }
}

#[test]
fn test_synced_durable_index_survives_crash_image() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let image = temp_dir.path().join("image");
    let cfg = |dir: &Path| {
        Config::builder()
            .dir_path(dir)
            .index_type(IndexType::BPlusTree)
            .index_shards(2)
            .sync_writes(true)
            .mmap_at_startup(false)
            .build()
    };

    let engine = Engine::open(cfg(&dir)).unwrap();
    for i in 0..50 {
        engine
            .put(format!("k{:02}", i).as_bytes(), format!("v{}", i).as_bytes())
            .unwrap();
    }
    engine.delete(b"k00").unwrap();

    // Snapshot the directory as a crash would leave it: no close, no flush
    copy_dir(&dir, &image, &["flock"]).unwrap();

    let recovered = Engine::open(cfg(&image)).unwrap();
    assert_eq!(recovered.stat().unwrap().key_num, 49);
    assert_eq!(recovered.get(b"k49").unwrap(), b"v49");
    assert!(matches!(recovered.get(b"k00"), Err(CaskError::KeyNotFound)));
    drop(engine);
}

#[test]
fn test_durable_index_open_truncates_torn_tail() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let cfg = || Config {
        index_type: IndexType::BPlusTree,
        merge_ratio: 0.0,
        ..config(&dir)
    };

    let clean_len = {
        let engine = Engine::open(cfg()).unwrap();
        engine.put(b"before", b"crash").unwrap();
        engine.close().unwrap();
        fs::metadata(data_file_name(&dir, 0)).unwrap().len()
    };

    let record = LogRecord::normal(log_record_key_with_seq(b"torn", 0), b"write".to_vec());
    let (buf, _) = encode_log_record(&record);
    append_raw(&data_file_name(&dir, 0), &buf[..buf.len() / 2]);

    {
        let engine = Engine::open(cfg()).unwrap();
        assert_eq!(
            fs::metadata(data_file_name(&dir, 0)).unwrap().len(),
            clean_len
        );
        engine.put(b"after", b"crash").unwrap();
    }

    // Records behind the repaired tail stay scannable
    let engine = Engine::open(cfg()).unwrap();
    engine.merge(true).unwrap();
    assert_eq!(engine.get(b"before").unwrap(), b"crash");
    assert_eq!(engine.get(b"after").unwrap(), b"crash");
}

#[test]
fn test_durable_index_requires_seq_checkpoint_for_batches() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let cfg = || {
        Config::builder()
            .dir_path(&dir)
            .index_type(IndexType::BPlusTree)
            .build()
    };

    {
        let engine = Engine::open(cfg()).unwrap();
        // Fresh directory: batches allowed
        let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put(b"k", b"v").unwrap();
        batch.commit().unwrap();
        engine.close().unwrap();
    }
    assert!(dir.join("seq-no").exists());

    {
        let engine = Engine::open(cfg()).unwrap();
        assert!(!dir.join("seq-no").exists());
        assert_eq!(engine.seq_no(), 1);
        assert!(engine.new_write_batch(WriteBatchOptions::default()).is_ok());
        engine.close().unwrap();
    }

    // A crash leaves no checkpoint behind
    fs::remove_file(dir.join("seq-no")).unwrap();
    let engine = Engine::open(cfg()).unwrap();
    assert!(matches!(
        engine.new_write_batch(WriteBatchOptions::default()),
        Err(CaskError::BatchUnavailable)
    ));
    assert_eq!(engine.get(b"k").unwrap(), b"v");
}

// =============================================================================
// Stat and Backup Tests
// =============================================================================

#[test]
fn test_stat_tracks_reclaimable_bytes() {
    let (_temp_dir, engine) = setup_temp_engine();

    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    assert_eq!(engine.stat().unwrap().reclaimable_size, 0);

    engine.put(b"a", b"3").unwrap();
    let after_overwrite = engine.stat().unwrap().reclaimable_size;
    assert!(after_overwrite > 0);

    engine.delete(b"b").unwrap();
    let stat = engine.stat().unwrap();
    assert!(stat.reclaimable_size > after_overwrite);
    assert_eq!(stat.key_num, 1);
    assert_eq!(stat.data_file_num, 1);
    assert!(stat.disk_size > 0);
}

#[test]
fn test_reclaimable_bytes_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);

    let before = {
        let engine = Engine::open(config(&dir)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"a", b"2").unwrap();
        engine.delete(b"a").unwrap();
        engine.stat().unwrap().reclaimable_size
    };

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.stat().unwrap().reclaimable_size, before);
}

#[test]
fn test_backup_copies_everything_but_the_lock() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let dest = temp_dir.path().join("backup");

    let engine = Engine::open(config(&dir)).unwrap();
    for i in 0..20 {
        engine.put(format!("k{}", i).as_bytes(), b"v").unwrap();
    }
    engine.backup(&dest).unwrap();
    assert!(!dest.join("flock").exists());
    assert!(data_file_name(&dest, 0).exists());

    // The copy opens while the original is still locked
    let restored = Engine::open(config(&dest)).unwrap();
    assert_eq!(restored.stat().unwrap().key_num, 20);
    assert_eq!(restored.get(b"k7").unwrap(), b"v");
}

#[test]
fn test_backup_of_durable_index_keeps_engine_usable() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let dest = temp_dir.path().join("backup");
    let cfg = |dir: &Path| Config {
        index_type: IndexType::BPlusTree,
        index_shards: 2,
        ..config(dir)
    };

    let engine = Engine::open(cfg(&dir)).unwrap();
    for i in 0..20 {
        engine.put(format!("k{}", i).as_bytes(), b"v").unwrap();
    }
    engine.backup(&dest).unwrap();

    // The live index keeps taking writes after the backup
    engine.put(b"after", b"backup").unwrap();
    engine.delete(b"k3").unwrap();
    assert_eq!(engine.get(b"after").unwrap(), b"backup");
    assert_eq!(engine.stat().unwrap().key_num, 20);

    let restored = Engine::open(cfg(&dest)).unwrap();
    assert_eq!(restored.stat().unwrap().key_num, 20);
    assert_eq!(restored.get(b"k3").unwrap(), b"v");
    assert!(matches!(restored.get(b"after"), Err(CaskError::KeyNotFound)));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let (_temp_dir, engine) = setup_temp_engine();
    let engine = Arc::new(engine);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..250 {
                    let key = format!("t{}-k{}", t, i);
                    engine.put(key.as_bytes(), key.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..500 {
                match engine.get(b"t0-k0") {
                    Ok(value) => assert_eq!(value, b"t0-k0"),
                    Err(CaskError::KeyNotFound) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        })
    };

    for handle in writers {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(engine.stat().unwrap().key_num, 1000);
    for t in 0..4 {
        for i in 0..250 {
            let key = format!("t{}-k{}", t, i);
            assert_eq!(engine.get(key.as_bytes()).unwrap(), key.into_bytes());
        }
    }
}

#[test]
fn test_sync_policies() {
    let policies: [fn(&Path) -> Config; 2] = [
        |dir| Config::builder().dir_path(dir).sync_writes(true).build(),
        |dir| Config::builder().dir_path(dir).bytes_per_sync(64).build(),
    ];
    for cfg in policies {
        let temp_dir = TempDir::new().unwrap();
        let dir = db_dir(&temp_dir);
        {
            let engine = Engine::open(cfg(&dir)).unwrap();
            for i in 0..20 {
                engine.put(format!("k{}", i).as_bytes(), b"durable").unwrap();
            }
        }
        let engine = Engine::open(cfg(&dir)).unwrap();
        assert_eq!(engine.get(b"k19").unwrap(), b"durable");
    }
}
