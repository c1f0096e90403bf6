use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// The durable unit kept by a [`RecordStore`](crate::traits::RecordStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub key:        String,
    /// JSON text of the value.
    pub value:      String,
    /// Milliseconds since the Unix epoch. Advisory only, the last write always wins.
    pub updated_at: i64,
}

impl StorageRecord {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V, updated_at: i64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            updated_at,
        }
    }

    pub fn parse(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.value)
    }
}

/// What the application may want to tell the user about the state of their data.
///
/// Warnings are distinct and only ever appended. `recovered` latches once any repair took place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapStatus {
    pub recovered: bool,
    pub warnings:  Vec<String>,
}

impl BootstrapStatus {
    /// Record a repair. Returns `false` if the same warning has already been recorded.
    pub(crate) fn note_recovery<S: Into<String>>(&mut self, warning: S) -> bool {
        self.recovered = true;
        let warning = warning.into();
        if self.warnings.contains(&warning) {
            false
        }
        else {
            self.warnings.push(warning);
            true
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    NotStarted,
    InFlight,
    Done,
}

/// Outcome of a single pass through the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value went to the durable store.
    Written,
    /// The serialized value matched the last committed one; nothing was written.
    Unchanged,
    /// The first attempt hit the storage quota; the store was reset and the retry succeeded.
    WrittenAfterReset,
}
