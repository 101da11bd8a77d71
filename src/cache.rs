use std::path::Path;
use std::sync::Arc;

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::manager::TtlManager;
use crate::record::{unix_now, TtlRecord};
use crate::store::KvStore;

/// A persistent key-value cache with per-key TTL expiration.
///
/// Composes a value store with a [`TtlManager`] whose expiration callback
/// deletes the corresponding value, so an entry's value and its TTL record
/// live and die together: created by [`put`](Self::put), refreshed by a
/// `put` on the same key, destroyed by [`delete`](Self::delete) or by the
/// background sweep.
///
/// The two stores are not joined by a transaction. If the TTL registration
/// fails after the value write succeeded, the value stays behind without a
/// TTL — callers that care should retry the `put` or `delete` the key.
/// Likewise, reads between a key's logical expiry and the next sweep tick
/// may still see the stale value; expiration is enforced by the sweep, not
/// checked per read.
///
/// # Example
///
/// ```rust,no_run
/// use ttlkv::TtlCache;
///
/// # #[tokio::main]
/// # async fn main() -> ttlkv::Result<()> {
/// let cache = TtlCache::open("/tmp/data.db", "/tmp/ttl.db")?;
///
/// cache.put(b"greeting", b"hello", 60)?;
/// assert_eq!(cache.get(b"greeting")?, b"hello");
///
/// cache.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct TtlCache {
    data: Arc<KvStore>,
    manager: TtlManager,
}

impl TtlCache {
    /// Opens the value store at `data_path` and the TTL record store at
    /// `ttl_path`. The two paths must be distinct.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context (see
    /// [`TtlManager::open`]).
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(data_path: P, ttl_path: Q) -> Result<Self> {
        Self::open_with_config(data_path, ttl_path, ManagerConfig::default())
    }

    /// Opens a cache with a custom [`ManagerConfig`] for the sweep.
    pub fn open_with_config<P: AsRef<Path>, Q: AsRef<Path>>(
        data_path: P,
        ttl_path: Q,
        config: ManagerConfig,
    ) -> Result<Self> {
        let data = Arc::new(KvStore::open(data_path)?);

        let expired_data = Arc::clone(&data);
        let manager = TtlManager::open_with_config(
            ttl_path,
            config,
            move |record: &TtlRecord| {
                if let Err(err) = expired_data.delete(&record.key) {
                    tracing::warn!(key = ?record.key, error = %err, "failed to delete expired value");
                }
            },
        )?;

        Ok(Self { data, manager })
    }

    /// Stores `value` under `key` with a TTL of `ttl_seconds`.
    ///
    /// Putting to an existing key overwrites the value and replaces its
    /// TTL; TTLs never stack. The value write and the TTL registration are
    /// two separate durable writes — see the type-level docs for the
    /// partial-failure window.
    pub fn put(&self, key: &[u8], value: &[u8], ttl_seconds: i64) -> Result<()> {
        self.data.put(key, value)?;
        self.manager.set_ttl(key, unix_now(), ttl_seconds)
    }

    /// Returns the value for `key`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) if the key was never
    /// stored, was deleted, or has been swept after expiry.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.data.get(key)
    }

    /// Removes `key`'s value and TTL record together.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) if the value is absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.delete(key)?;
        match self.manager.delete(key) {
            // A value without a TTL record can exist after a partial put.
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Number of live keys in the value store.
    pub fn count(&self) -> u64 {
        self.data.count()
    }

    /// Stops the TTL manager's sweep and flushes both stores.
    pub async fn close(&self) -> Result<()> {
        self.manager.close().await?;
        self.data.flush()
    }
}
