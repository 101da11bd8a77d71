//! Error types for the cache.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the store, the TTL manager, and the cache façade.
#[derive(Error, Debug)]
pub enum Error {
    /// The key is one of the store's internal sentinel keys and cannot be
    /// accessed through the data-facing API.
    #[error("key is reserved for internal use")]
    ReservedKey,

    /// The key (or its TTL record) does not exist.
    #[error("key not found")]
    NotFound,

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A persisted TTL record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error from the underlying storage engine.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
}

impl Error {
    /// Returns `true` if this error means the key was simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}
