use derive_more::Display;
use serde::Deserialize;
use time::Duration;

/// When an entry's expiry is decided.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpiryMode {
    /// Use the `expires` timestamp persisted with the entry. A TTL change
    /// only affects entries written afterwards.
    #[default]
    #[display("on-write")]
    OnWrite,
    /// Ignore the persisted `expires` and use `created + ttl` with the TTL
    /// configured now.
    #[display("on-read")]
    OnRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// Serve fresh entries from the store. When off, every lookup goes
    /// upstream.
    pub read: bool,
    /// Persist fresh upstream responses to the store.
    pub write: bool,
    pub expiry: ExpiryMode,
}

impl CachePolicy {
    pub fn with_minutes(mut self, minutes: i64) -> Self {
        self.ttl = Duration::minutes(minutes);
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(60),
            read: true,
            write: true,
            expiry: ExpiryMode::default(),
        }
    }
}
