use std::time::Duration;

/// How the TTL manager treats a persisted record it cannot decode while
/// rebuilding its expiration index on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Log a warning and leave the record out of the index. The record
    /// stays in the store but will never be swept.
    SkipCorrupt,
    /// Abort the open with the decode error.
    FailOnCorrupt,
}

/// Configuration for a [`TtlManager`](crate::TtlManager).
///
/// # Example
///
/// ```rust
/// use ttlkv::{ManagerConfig, RecoveryMode};
/// use std::time::Duration;
///
/// let config = ManagerConfig::default()
///     .with_sweep_interval(Duration::from_millis(500))
///     .with_recovery(RecoveryMode::FailOnCorrupt);
/// ```
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval between background sweep passes (default: 1 second)
    pub sweep_interval: Duration,
    /// Treatment of undecodable records during index recovery
    /// (default: [`RecoveryMode::SkipCorrupt`])
    pub recovery: RecoveryMode,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(1),
            recovery: RecoveryMode::SkipCorrupt,
        }
    }
}

impl ManagerConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval between background sweep passes.
    ///
    /// Expiration is enforced by the sweep, not checked on read, so this
    /// bounds how long a logically expired value can remain readable.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the recovery behavior for corrupt persisted records.
    pub fn with_recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }
}
