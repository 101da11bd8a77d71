use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ManagerConfig, RecoveryMode};
use crate::error::{Error, Result};
use crate::record::{unix_now, IndexKey, TtlRecord};
use crate::store::KvStore;

/// Invoked from the sweep task, under the manager's lock, for every record
/// that expires. Keep it quick: it holds up eviction of everything behind
/// it. The record must not be mutated through interior means.
pub type ExpiredCallback = Box<dyn Fn(&TtlRecord) + Send + Sync>;

struct ManagerInner {
    db: KvStore,
    /// The expiration index, ordered by `(expired_time, key)`. This mutex is
    /// the manager's single exclusive lock: every index or record-store
    /// mutation happens under it, so the sweep and foreground calls never
    /// interleave mid-update.
    index: Mutex<BTreeMap<IndexKey, TtlRecord>>,
    callback: ExpiredCallback,
    shutdown_tx: watch::Sender<bool>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        // Stop the sweep task even if close() was never called.
        let _ = self.shutdown_tx.send(true);
    }
}

/// Tracks per-key TTLs and evicts expired keys on a periodic sweep.
///
/// Owns a dedicated [`KvStore`] holding one serialized [`TtlRecord`] per
/// managed key, plus an in-memory index over those records ordered by
/// `(expired_time, key)`. On open the index is rebuilt from the store, so
/// expiration state survives restarts; only then does the sweep task start,
/// which means a crash-restart sees no missed or duplicate expirations.
///
/// Each sweep pass walks the index from the earliest-expiring entry and
/// invokes the expiration callback for every record whose expiry lies in
/// the past, stopping at the first one that does not — the index ordering
/// guarantees everything after it is also unexpired. The callback fires
/// *before* the record is removed from index and store: if the process
/// dies mid-eviction, the record survives and is re-evicted after restart.
///
/// A key past its expiry but not yet swept is still present; expiration is
/// enforced by the sweep, not checked on read. The lag is bounded by the
/// sweep interval.
///
/// # Example
///
/// ```rust,no_run
/// use ttlkv::TtlManager;
///
/// # #[tokio::main]
/// # async fn main() -> ttlkv::Result<()> {
/// let manager = TtlManager::open("/tmp/ttl.db", |record| {
///     println!("expired: {:?}", record.key);
/// })?;
///
/// manager.set_ttl(b"session:42", 1_700_000_000, 60)?;
/// manager.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct TtlManager {
    inner: Arc<ManagerInner>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl TtlManager {
    /// Opens a manager at `path` with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context. The manager
    /// requires a runtime to spawn its background sweep task.
    pub fn open<P, F>(path: P, callback: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&TtlRecord) + Send + Sync + 'static,
    {
        Self::open_with_config(path, ManagerConfig::default(), callback)
    }

    /// Opens a manager with a custom [`ManagerConfig`].
    ///
    /// Recovery runs to completion before the sweep task is spawned.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub fn open_with_config<P, F>(path: P, config: ManagerConfig, callback: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&TtlRecord) + Send + Sync + 'static,
    {
        if tokio::runtime::Handle::try_current().is_err() {
            panic!(
                "ttlkv::TtlManager requires a Tokio runtime. \
                 Ensure you are calling TtlManager::open from within a \
                 #[tokio::main] or #[tokio::test] context, or from code \
                 running on a Tokio runtime."
            );
        }

        let db = KvStore::open(path)?;
        let index = Self::load_index(&db, config.recovery)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(ManagerInner {
            db,
            index: Mutex::new(index),
            callback: Box::new(callback),
            shutdown_tx,
        });

        let sweep_inner = Arc::clone(&inner);
        let handle = tokio::spawn(Self::sweep_loop(
            sweep_inner,
            config.sweep_interval,
            shutdown_rx,
        ));

        Ok(Self {
            inner,
            sweep_task: Mutex::new(Some(handle)),
        })
    }

    /// Rebuilds the expiration index from every persisted record.
    fn load_index(
        db: &KvStore,
        recovery: RecoveryMode,
    ) -> Result<BTreeMap<IndexKey, TtlRecord>> {
        let key_count = db.count();
        let keys = db.next(&[], key_count as usize);

        let mut index = BTreeMap::new();
        for key in keys {
            match db.get(&key).and_then(|value| TtlRecord::decode(&value)) {
                Ok(record) => {
                    index.insert(record.index_key(), record);
                }
                Err(err) => match recovery {
                    RecoveryMode::SkipCorrupt => {
                        tracing::warn!(key = ?key, error = %err, "skipping unreadable ttl record");
                    }
                    RecoveryMode::FailOnCorrupt => return Err(err),
                },
            }
        }

        tracing::info!(key_count, indexed = index.len(), "ttl index recovery finished");
        Ok(index)
    }

    async fn sweep_loop(
        inner: Arc<ManagerInner>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; the first pass runs a full
        // interval after open.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    Self::sweep_pass(&inner);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("ttl sweep loop stopped");
    }

    /// One sweep pass; shared by the timer and [`Self::sweep`].
    fn sweep_pass(inner: &ManagerInner) -> usize {
        let mut index = inner.index.lock();
        let now = unix_now();
        let mut evicted = 0;

        while let Some((_, record)) = index.first_key_value() {
            if !record.is_expired(now) {
                // Everything behind this entry expires later still.
                break;
            }
            let record = record.clone();

            // Callback before removal: if the process dies here, the record
            // survives and the eviction is replayed after restart.
            (inner.callback)(&record);

            index.remove(&record.index_key());
            if let Err(err) = inner.db.delete(&record.key) {
                tracing::warn!(key = ?record.key, error = %err, "failed to delete expired ttl record");
            }
            evicted += 1;
        }

        if evicted > 0 {
            tracing::debug!(evicted, "sweep pass finished");
        }
        evicted
    }

    /// Runs one sweep pass immediately, bypassing the timer.
    ///
    /// Returns the number of records evicted. The periodic task runs the
    /// same pass; this is mainly useful in tests and for callers that want
    /// eviction now rather than at the next tick.
    pub fn sweep(&self) -> usize {
        Self::sweep_pass(&self.inner)
    }

    /// Sets or refreshes the TTL for `key`.
    ///
    /// Setting an identical `(create_time, ttl)` pair on an active record
    /// is a no-op. Otherwise any prior record is dropped from the index and
    /// the new one replaces it in both index and store, so a key's TTL is
    /// always replaceable and never stacks.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] unless `create_time > 0` and `ttl > 0`;
    /// otherwise storage or serialization errors.
    pub fn set_ttl(&self, key: &[u8], create_time: i64, ttl: i64) -> Result<()> {
        if create_time <= 0 || ttl <= 0 {
            return Err(Error::InvalidArgument(format!(
                "create_time [{create_time}] or ttl [{ttl}] must be positive"
            )));
        }

        let mut index = self.inner.index.lock();

        if let Ok(existing) = self.get_info(key) {
            if existing.create_time == create_time && existing.ttl == ttl {
                return Ok(());
            }
            index.remove(&existing.index_key());
        }

        let record = TtlRecord::new(key.to_vec(), create_time, ttl);
        self.inner.db.put(key, &record.encode()?)?;
        index.insert(record.index_key(), record);
        Ok(())
    }

    /// Removes the TTL record for `key` from both index and store.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no record exists.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut index = self.inner.index.lock();
        let record = self.get_info(key)?;
        index.remove(&record.index_key());
        self.inner.db.delete(key)?;
        Ok(())
    }

    /// Reads and decodes the persisted record for `key`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if absent, [`Error::Serialization`] if the
    /// stored bytes are unreadable.
    pub fn get_info(&self, key: &[u8]) -> Result<TtlRecord> {
        let value = self.inner.db.get(key)?;
        TtlRecord::decode(&value)
    }

    /// Number of keys with an active TTL record.
    pub fn key_count(&self) -> u64 {
        self.inner.db.count()
    }

    /// Stops the sweep task and flushes the record store.
    ///
    /// Blocks until the sweep loop has observably exited; no sweep pass
    /// starts after this returns. Call it once — the manager is not usable
    /// afterwards.
    pub async fn close(&self) -> Result<()> {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = self.sweep_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.db.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// A long enough interval that the background task never interferes
    /// with tests driving the sweep manually.
    fn manual_sweep_config() -> ManagerConfig {
        ManagerConfig::default().with_sweep_interval(Duration::from_secs(3600))
    }

    fn open_quiet(dir: &TempDir) -> TtlManager {
        TtlManager::open_with_config(dir.path().join("ttl.db"), manual_sweep_config(), |_| {})
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_ttl_validation() {
        let dir = TempDir::new().unwrap();
        let manager = open_quiet(&dir);

        assert!(matches!(
            manager.set_ttl(b"k", 0, 10),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.set_ttl(b"k", 100, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.set_ttl(b"k", -1, -1),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(manager.key_count(), 0);
    }

    #[tokio::test]
    async fn test_get_info_invariant() {
        let dir = TempDir::new().unwrap();
        let manager = open_quiet(&dir);

        assert!(manager.get_info(b"missing").unwrap_err().is_not_found());

        manager.set_ttl(b"key", 1000, 30).unwrap();
        let info = manager.get_info(b"key").unwrap();
        assert_eq!(info.key, b"key");
        assert_eq!(info.create_time, 1000);
        assert_eq!(info.ttl, 30);
        assert_eq!(info.expired_time, info.create_time + info.ttl);
    }

    #[tokio::test]
    async fn test_set_ttl_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = open_quiet(&dir);

        manager.set_ttl(b"key", 1000, 30).unwrap();
        let before = manager.get_info(b"key").unwrap();

        manager.set_ttl(b"key", 1000, 30).unwrap();
        assert_eq!(manager.key_count(), 1);
        assert_eq!(manager.get_info(b"key").unwrap(), before);
    }

    #[tokio::test]
    async fn test_set_ttl_replaces() {
        let dir = TempDir::new().unwrap();
        let manager = open_quiet(&dir);

        manager.set_ttl(b"key", 1000, 5).unwrap();
        manager.set_ttl(b"key", 1000, 10).unwrap();

        assert_eq!(manager.key_count(), 1);
        let info = manager.get_info(b"key").unwrap();
        assert_eq!(info.ttl, 10);
        assert_eq!(info.expired_time, 1010);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let manager = open_quiet(&dir);

        assert!(manager.delete(b"missing").unwrap_err().is_not_found());

        manager.set_ttl(b"key", 1000, 30).unwrap();
        manager.delete(b"key").unwrap();
        assert_eq!(manager.key_count(), 0);
        assert!(manager.get_info(b"key").unwrap_err().is_not_found());
        // No resurrection: the record stays gone until a new set_ttl.
        assert_eq!(manager.sweep(), 0);
    }

    #[tokio::test]
    async fn test_eviction_order_with_collisions() {
        let dir = TempDir::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&order);
        let manager = TtlManager::open_with_config(
            dir.path().join("ttl.db"),
            manual_sweep_config(),
            move |record: &TtlRecord| {
                seen.lock().push(record.key.clone());
            },
        )
        .unwrap();

        // All in the past so a single manual pass evicts everything.
        // Two pairs collide on expired_time to force the key tie-break.
        let base = unix_now() - 100;
        manager.set_ttl(b"6", base, 4).unwrap();
        manager.set_ttl(b"1", base, 6).unwrap();
        manager.set_ttl(b"3", base, 5).unwrap();
        manager.set_ttl(b"5", base, 1).unwrap();
        manager.set_ttl(b"2", base, 4).unwrap();
        manager.set_ttl(b"4", base, 6).unwrap();

        assert_eq!(manager.sweep(), 6);

        // Ascending (expired_time, key): 1s → "5"; 4s → "2","6"; 5s → "3";
        // 6s → "1","4".
        let expect: Vec<Vec<u8>> = [b"5", b"2", b"6", b"3", b"1", b"4"]
            .iter()
            .map(|k| k.to_vec())
            .collect();
        assert_eq!(*order.lock(), expect);
        assert_eq!(manager.key_count(), 0);
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_stops_at_first_unexpired() {
        let dir = TempDir::new().unwrap();
        let manager = open_quiet(&dir);

        let now = unix_now();
        manager.set_ttl(b"old", now - 100, 1).unwrap();
        manager.set_ttl(b"live", now, 3600).unwrap();

        assert_eq!(manager.sweep(), 1);
        assert_eq!(manager.key_count(), 1);
        assert!(manager.get_info(b"live").is_ok());
    }

    #[tokio::test]
    async fn test_background_sweep() {
        let dir = TempDir::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let manager = TtlManager::open_with_config(
            dir.path().join("ttl.db"),
            ManagerConfig::default().with_sweep_interval(Duration::from_millis(50)),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        // Already expired; the next tick must pick it up.
        manager.set_ttl(b"key", unix_now() - 100, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(manager.key_count(), 0);
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_stops_sweep() {
        let dir = TempDir::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let manager = TtlManager::open_with_config(
            dir.path().join("ttl.db"),
            ManagerConfig::default().with_sweep_interval(Duration::from_millis(500)),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        // Already expired, but close lands before the first tick.
        manager.set_ttl(b"key", unix_now() - 100, 1).unwrap();
        manager.close().await.unwrap();

        // No sweep pass starts after close returns.
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(manager.key_count(), 1);
    }

    #[tokio::test]
    async fn test_recovery_rebuilds_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ttl.db");
        let now = unix_now();

        let manager =
            TtlManager::open_with_config(&path, manual_sweep_config(), |_| {}).unwrap();
        manager.set_ttl(b"a", now, 3600).unwrap();
        manager.set_ttl(b"b", now, 7200).unwrap();
        manager.set_ttl(b"c", now - 50, 10_000).unwrap();
        let expected: Vec<TtlRecord> = [b"a", b"b", b"c"]
            .iter()
            .map(|k| manager.get_info(*k).unwrap())
            .collect();
        manager.close().await.unwrap();
        // Release the engine's path lock before reopening.
        drop(manager);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let reopened = TtlManager::open_with_config(
            &path,
            ManagerConfig::default().with_sweep_interval(Duration::from_millis(50)),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        assert_eq!(reopened.key_count(), 3);
        for record in &expected {
            assert_eq!(reopened.get_info(&record.key).unwrap(), *record);
        }

        // Nothing is due yet, so no spurious expirations after recovery.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_recovery_with_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ttl.db");

        // Seed one valid record and one blob that cannot decode.
        {
            let db = KvStore::open(&path).unwrap();
            let record = TtlRecord::new(b"good".to_vec(), unix_now() - 100, 1);
            db.put(b"good", &record.encode().unwrap()).unwrap();
            db.put(b"junk", b"definitely not a record").unwrap();
            db.flush().unwrap();
        }

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let manager = TtlManager::open_with_config(
            &path,
            manual_sweep_config(),
            move |record: &TtlRecord| {
                assert_eq!(record.key, b"good");
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        // Only the decodable record made it into the index.
        assert_eq!(manager.sweep(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        manager.close().await.unwrap();
        drop(manager);

        // Strict mode refuses to open while the junk record remains.
        let result = TtlManager::open_with_config(
            &path,
            manual_sweep_config().with_recovery(RecoveryMode::FailOnCorrupt),
            |_| {},
        );
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
