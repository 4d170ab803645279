//! LMDB-backed distributed store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that every process on the host can open at the same path.
//! That makes it a real shared tier: coordinators in different processes see
//! each other's writes and contend on the same locks.
//!
//! # Record layout
//!
//! Each value is stored as `[expires_at: 8 bytes LE epoch ms][utf8 payload]`.
//! An `expires_at` of 0 means the entry never expires. Expiry is wall-clock
//! based so it means the same thing to every process.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `mget`
//! - Write transactions for `set`, `del` and `purge_expired`
//! - Set-if-absent checks and writes inside one write transaction

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use larder_core::{duration_to_ms, now_epoch_ms, EpochMillis, LarderResult, StorageError};

use super::traits::{DistributedStore, StoreStats, StoreStatsSnapshot, WriteOptions};

const HEADER_LEN: usize = 8;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored record is shorter than its header or not UTF-8.
    #[error("Malformed record under {key}: {reason}")]
    Malformed { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for larder_core::LarderError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Malformed { key, reason } => {
                StorageError::Corrupted { key, reason }.into()
            }
            other => StorageError::backend("lmdb", other).into(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Shared store backed by an LMDB environment on local disk.
///
/// # Example
///
/// ```ignore
/// use larder_storage::{DistributedStore, LmdbStore, WriteOptions};
/// use std::time::Duration;
///
/// let store = LmdbStore::open("/var/lib/larder", 64)?;
/// store.set("greeting", "\"hello\"", WriteOptions::expiring(Duration::from_secs(5))).await?;
/// ```
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: std::sync::Arc<StoreStats>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore").finish_non_exhaustive()
    }
}

impl LmdbStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per process per path; the
        // memory map is never resized or truncated behind heed's back.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            stats: Default::default(),
        })
    }

    /// Command counters issued through this handle.
    pub fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }

    /// Delete every expired record. Returns how many were removed.
    ///
    /// Reads already treat expired records as absent; this only reclaims space.
    pub fn purge_expired(&self) -> Result<u64, LmdbStoreError> {
        let now = now_epoch_ms();
        let expired = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let mut keys = Vec::new();
            for result in self.db.iter(&rtxn).map_err(txn_err)? {
                let (key, bytes) = result.map_err(txn_err)?;
                if matches!(expires_at(bytes), Some(at) if is_expired(at, now)) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(deleted, "purged expired lmdb records");
        Ok(deleted)
    }

    fn read_live(
        &self,
        rtxn: &RoTxn<'_>,
        key: &str,
        now: EpochMillis,
    ) -> Result<Option<String>, LmdbStoreError> {
        let Some(bytes) = self.db.get(rtxn, key.as_bytes()).map_err(txn_err)? else {
            return Ok(None);
        };
        decode_record(key, bytes, now)
    }
}

fn expires_at(bytes: &[u8]) -> Option<EpochMillis> {
    let header: [u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
    Some(u64::from_le_bytes(header))
}

fn is_expired(expires_at: EpochMillis, now: EpochMillis) -> bool {
    expires_at != 0 && expires_at <= now
}

fn decode_record(
    key: &str,
    bytes: &[u8],
    now: EpochMillis,
) -> Result<Option<String>, LmdbStoreError> {
    let at = expires_at(bytes).ok_or_else(|| LmdbStoreError::Malformed {
        key: key.to_string(),
        reason: format!("record is {} bytes, shorter than its header", bytes.len()),
    })?;
    if is_expired(at, now) {
        return Ok(None);
    }
    let payload =
        std::str::from_utf8(&bytes[HEADER_LEN..]).map_err(|e| LmdbStoreError::Malformed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Some(payload.to_string()))
}

fn encode_record(value: &str, expires_at: EpochMillis) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.extend_from_slice(value.as_bytes());
    bytes
}

#[async_trait]
impl DistributedStore for LmdbStore {
    async fn get(&self, key: &str) -> LarderResult<Option<String>> {
        self.stats.record_get();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.read_live(&rtxn, key, now_epoch_ms())?)
    }

    async fn mget(&self, keys: &[String]) -> LarderResult<Vec<Option<String>>> {
        self.stats.record_mget();
        let now = now_epoch_ms();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.read_live(&rtxn, key, now)?);
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str, options: WriteOptions) -> LarderResult<bool> {
        self.stats.record_set();
        let now = now_epoch_ms();
        let expires_at = options
            .ttl
            .map(|ttl| now.saturating_add(duration_to_ms(ttl)))
            .unwrap_or(0);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        if options.only_if_absent {
            let occupied = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
                Some(bytes) => expires_at_or_live(bytes, now),
                None => false,
            };
            if occupied {
                wtxn.abort();
                return Ok(false);
            }
        }

        self.db
            .put(&mut wtxn, key.as_bytes(), &encode_record(value, expires_at))
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn del(&self, key: &str) -> LarderResult<()> {
        self.stats.record_del();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }
}

/// A record blocks set-if-absent unless it has expired. Malformed records
/// count as live so they are never silently overwritten by a lock.
fn expires_at_or_live(bytes: &[u8], now: EpochMillis) -> bool {
    expires_at(bytes).map_or(true, |at| !is_expired(at, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("user:1", "{\"name\":\"ada\"}", WriteOptions::persistent())
            .await
            .expect("set should succeed");
        let value = store.get("user:1").await.expect("get should succeed");
        assert_eq!(value.as_deref(), Some("{\"name\":\"ada\"}"));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.get("nope").await.expect("get should succeed").is_none());
    }

    #[tokio::test]
    async fn test_expired_record_reads_absent() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("short", "1", WriteOptions::expiring(Duration::from_millis(20)))
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("short").await.expect("get should succeed").is_none());
    }

    #[tokio::test]
    async fn test_set_if_absent_respects_live_and_expired_holders() {
        let (store, _temp_dir) = create_test_store();
        let opts = WriteOptions::expiring(Duration::from_millis(30)).if_absent();

        assert!(store.set("lock:a", "1", opts).await.expect("set should succeed"));
        assert!(!store.set("lock:a", "1", opts).await.expect("set should succeed"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.set("lock:a", "1", opts).await.expect("set should succeed"));
    }

    #[tokio::test]
    async fn test_mget_and_del() {
        let (store, _temp_dir) = create_test_store();
        store.set("a", "1", WriteOptions::persistent()).await.expect("set should succeed");
        store.set("b", "2", WriteOptions::persistent()).await.expect("set should succeed");
        store.del("a").await.expect("del should succeed");

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = store.mget(&keys).await.expect("mget should succeed");
        assert_eq!(values, vec![None, Some("2".to_string()), None]);

        let stats = store.stats();
        assert_eq!(stats.sets, 2);
        assert_eq!(stats.dels, 1);
        assert_eq!(stats.mgets, 1);
    }

    #[tokio::test]
    async fn test_reopen_sees_previous_writes() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbStore::open(temp_dir.path(), 10).expect("open should succeed");
            store
                .set("durable", "true", WriteOptions::persistent())
                .await
                .expect("set should succeed");
        }
        let store = LmdbStore::open(temp_dir.path(), 10).expect("reopen should succeed");
        assert_eq!(
            store.get("durable").await.expect("get should succeed").as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("gone", "1", WriteOptions::expiring(Duration::from_millis(10)))
            .await
            .expect("set should succeed");
        store
            .set("kept", "2", WriteOptions::persistent())
            .await
            .expect("set should succeed");
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired().expect("purge should succeed"), 1);
        assert_eq!(store.purge_expired().expect("purge should succeed"), 0);
        assert!(store.get("kept").await.expect("get should succeed").is_some());
    }

    #[test]
    fn test_decode_record_rejects_short_header() {
        let err = decode_record("k", &[1, 2, 3], 0).unwrap_err();
        assert!(matches!(err, LmdbStoreError::Malformed { .. }));
    }
}
