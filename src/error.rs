use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Failures produced by the storage core and its backends.
///
/// None of these ever reach callers of [`Store::save()`](crate::Store::save) or
/// [`Store::load()`](crate::Store::load); they are logged and, where a repair took place, reflected in
/// [`BootstrapStatus::warnings`](crate::types::BootstrapStatus::warnings).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The durable engine refused a write for lack of space.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A durable record holds something that isn't valid JSON.
    #[error("stored value of '{key}' cannot be parsed: {source}")]
    HydrationParse {
        key:    String,
        #[source]
        source: serde_json::Error,
    },

    /// A single legacy entry is corrupt.
    #[error("legacy value of '{key}' cannot be parsed: {source}")]
    LegacyParse {
        key:    String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage I/O failure: {0}")]
    Io(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    #[inline]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }

    pub fn io<S: ToString>(msg: S) -> Self {
        Self::Io(msg.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => Self::QuotaExceeded(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        let msg = err.to_string();
        // SQLITE_FULL is reported as "database or disk is full" with the primary result code 13.
        if msg.contains("database or disk is full") || msg.contains("(code: 13)") {
            Self::QuotaExceeded(msg)
        }
        else {
            Self::Io(msg)
        }
    }
}
