use std::ops::Bound;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Default sentinel key holding the number of non-reserved keys.
///
/// The engine has no cheap key-count query, so the store maintains one
/// itself under this key, updated in the same atomic batch as the data
/// mutation it accompanies.
pub const COUNT_KEY: &[u8] = b"__key_for_count__";

/// Default sentinel key holding the last issued sequence value.
pub const SEQUENCE_KEY: &[u8] = b"__key_for_sequence__";

/// An ordered durable key-value store.
///
/// Wraps a [`sled`] tree and adds three things on top of the raw engine:
///
/// - a reserved-key namespace: two sentinel keys (count and sequence) that
///   the data-facing API refuses to touch and range queries never return;
/// - an atomically-maintained key count, kept in lockstep with data
///   mutations via batched writes;
/// - a persistent, monotonically increasing sequence counter.
///
/// The engine handle itself is safe for concurrent use; the extra lock here
/// only guards the count and sequence values, whose derive-and-persist
/// update is a read-modify-write the engine cannot make atomic on its own.
///
/// # Example
///
/// ```rust,no_run
/// use ttlkv::KvStore;
///
/// # fn main() -> ttlkv::Result<()> {
/// let store = KvStore::open("/tmp/data.db")?;
/// store.put(b"user:1", b"alice")?;
/// assert_eq!(store.get(b"user:1")?, b"alice");
/// assert_eq!(store.count(), 1);
/// # Ok(())
/// # }
/// ```
pub struct KvStore {
    db: sled::Db,
    path: PathBuf,
    count_key: Vec<u8>,
    sequence_key: Vec<u8>,
    /// Guards the count and sequence read-modify-writes.
    meta: RwLock<()>,
}

impl KvStore {
    /// Opens (or creates) a store at `path` with the default sentinel keys.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_sentinels(path, COUNT_KEY, SEQUENCE_KEY)
    }

    /// Opens a store with custom sentinel keys.
    ///
    /// The reserved set is fixed per instance at construction; there is no
    /// process-wide registry. Mostly useful in tests that need to prove
    /// reserved-key behavior with their own sentinels.
    pub fn open_with_sentinels<P: AsRef<Path>>(
        path: P,
        count_key: &[u8],
        sequence_key: &[u8],
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        tracing::info!(path = %path.display(), "kv store opened");
        Ok(Self {
            db,
            path,
            count_key: count_key.to_vec(),
            sequence_key: sequence_key.to_vec(),
            meta: RwLock::new(()),
        })
    }

    /// The filesystem path this store was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_reserved(&self, key: &[u8]) -> bool {
        key == self.count_key.as_slice() || key == self.sequence_key.as_slice()
    }

    /// Stores `value` under `key`.
    ///
    /// A new key and the count increment are applied in one atomic batch;
    /// overwriting an existing key leaves the count untouched.
    ///
    /// # Errors
    ///
    /// [`Error::ReservedKey`] if `key` is a sentinel, or the engine's write
    /// error.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.is_reserved(key) {
            return Err(Error::ReservedKey);
        }

        let _guard = self.meta.write();

        if self.db.contains_key(key)? {
            self.db.insert(key, value)?;
            return Ok(());
        }

        let count = self.read_count() + 1;
        let mut batch = sled::Batch::default();
        batch.insert(key, value);
        batch.insert(self.count_key.as_slice(), count.to_string().into_bytes());
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Returns a copy of the value stored under `key`.
    ///
    /// The returned buffer is owned by the caller; storage-internal buffers
    /// are never handed out.
    ///
    /// # Errors
    ///
    /// [`Error::ReservedKey`] for sentinels, [`Error::NotFound`] if absent.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if self.is_reserved(key) {
            return Err(Error::ReservedKey);
        }
        match self.db.get(key)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(Error::NotFound),
        }
    }

    /// Removes `key`, decrementing the count in the same atomic batch.
    ///
    /// # Errors
    ///
    /// [`Error::ReservedKey`] for sentinels, [`Error::NotFound`] if absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if self.is_reserved(key) {
            return Err(Error::ReservedKey);
        }

        let _guard = self.meta.write();

        if !self.db.contains_key(key)? {
            return Err(Error::NotFound);
        }

        let count = self.read_count().saturating_sub(1);
        let mut batch = sled::Batch::default();
        batch.remove(key);
        batch.insert(self.count_key.as_slice(), count.to_string().into_bytes());
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Checks whether `key` exists. Never errors; a failed lookup counts as
    /// absence.
    pub fn has(&self, key: &[u8]) -> bool {
        self.db.contains_key(key).unwrap_or(false)
    }

    /// Returns up to `n` keys strictly greater than `key`, in ascending
    /// lexicographic order, excluding reserved keys.
    ///
    /// An empty `key` means "from the beginning". The anchor key itself is
    /// never returned, whether or not it exists. A fresh cursor is opened
    /// per call and released before returning.
    pub fn next(&self, key: &[u8], n: usize) -> Vec<Vec<u8>> {
        let iter = if key.is_empty() {
            self.db.iter()
        } else {
            self.db
                .range::<&[u8], _>((Bound::Excluded(key), Bound::Unbounded))
        };
        iter.keys()
            .filter_map(|k| k.ok())
            .filter(|k| !self.is_reserved(k))
            .take(n)
            .map(|k| k.to_vec())
            .collect()
    }

    /// Returns up to `n` keys strictly less than `key`, in descending
    /// lexicographic order, excluding reserved keys.
    ///
    /// An empty `key` means "from the end". Symmetric to [`Self::next`].
    pub fn prev(&self, key: &[u8], n: usize) -> Vec<Vec<u8>> {
        let iter = if key.is_empty() {
            self.db.iter()
        } else {
            self.db
                .range::<&[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
        };
        iter.keys()
            .rev()
            .filter_map(|k| k.ok())
            .filter(|k| !self.is_reserved(k))
            .take(n)
            .map(|k| k.to_vec())
            .collect()
    }

    /// Returns the number of non-reserved keys currently stored.
    pub fn count(&self) -> u64 {
        let _guard = self.meta.read();
        self.read_count()
    }

    /// Returns the last issued sequence value, or 0 if none was ever issued.
    pub fn current_sequence(&self) -> u64 {
        let _guard = self.meta.read();
        self.read_u64(&self.sequence_key)
    }

    /// Atomically increments, persists, and returns the sequence counter.
    ///
    /// # Errors
    ///
    /// Only on an engine write failure.
    pub fn next_sequence(&self) -> Result<u64> {
        let _guard = self.meta.write();
        let sequence = self.read_u64(&self.sequence_key) + 1;
        self.db
            .insert(self.sequence_key.as_slice(), sequence.to_string().into_bytes())?;
        Ok(sequence)
    }

    /// Forces buffered writes to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn read_count(&self) -> u64 {
        self.read_u64(&self.count_key)
    }

    // Counters persist as ASCII decimal; anything unreadable reads as 0.
    fn read_u64(&self, key: &[u8]) -> u64 {
        self.db
            .get(key)
            .ok()
            .flatten()
            .and_then(|v| std::str::from_utf8(&v).ok().and_then(|s| s.parse().ok()))
            .unwrap_or(0)
    }
}
