//! # ttlkv
//!
//! A persistent key-value cache with per-key TTL (time-to-live)
//! expiration, backed by [`sled`].
//!
//! ## Features
//!
//! - Durable ordered key-value storage with an atomically-maintained key
//!   count and a persistent monotonic sequence counter
//! - Per-key absolute-time TTLs with an in-memory expiration index,
//!   rebuilt from disk on open so expiration state survives restarts
//! - A background sweep that evicts expired keys in deterministic
//!   `(expiry, key)` order and notifies a caller-supplied callback before
//!   each removal
//! - Cursor-style `next`/`prev` range queries that skip internal keys
//!
//! ## Example
//!
//! ```rust,no_run
//! use ttlkv::TtlCache;
//!
//! #[tokio::main]
//! async fn main() -> ttlkv::Result<()> {
//!     // Values and TTL records live in two separate stores.
//!     let cache = TtlCache::open("/tmp/data.db", "/tmp/ttl.db")?;
//!
//!     // Keep "session:42" for five minutes.
//!     cache.put(b"session:42", b"alice", 300)?;
//!
//!     if let Ok(value) = cache.get(b"session:42") {
//!         println!("hit: {} bytes", value.len());
//!     }
//!
//!     // Stops the sweep task and flushes both stores.
//!     cache.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! The lower layers are public too: [`KvStore`] for the raw ordered store
//! and [`TtlManager`] for TTL tracking over arbitrary keys.

mod cache;
mod config;
mod error;
mod manager;
mod record;
mod store;

pub use cache::TtlCache;
pub use config::{ManagerConfig, RecoveryMode};
pub use error::{Error, Result};
pub use manager::{ExpiredCallback, TtlManager};
pub use record::TtlRecord;
pub use store::{KvStore, COUNT_KEY, SEQUENCE_KEY};
