use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::error::StoreError;
use crate::traits::RecordStore;
use crate::types::StorageRecord;

/// Record store living entirely in process memory.
///
/// Nothing survives a restart, which makes it the natural choice for degraded operation and tests. An optional quota,
/// counted as the total length of keys and values, makes it behave like an engine that can run out of space.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, StorageRecord>>,
    quota:   Option<usize>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            quota:   Some(bytes),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.records.read().values().map(record_size).sum()
    }

    pub fn snapshot(&self) -> Vec<StorageRecord> {
        self.records.read().values().cloned().collect()
    }

    fn store_all(&self, incoming: Vec<StorageRecord>) -> Result<()> {
        let mut records = self.records.write();

        if let Some(quota) = self.quota {
            let mut used = records.values().map(record_size).sum::<usize>();
            for record in &incoming {
                used = used.saturating_sub(records.get(&record.key).map_or(0, record_size));
                used += record_size(record);
            }
            if used > quota {
                return Err(StoreError::QuotaExceeded(format!(
                    "{used} bytes requested, {quota} bytes available"
                )));
            }
        }

        for record in incoming {
            records.insert(record.key.clone(), record);
        }
        Ok(())
    }
}

#[inline]
fn record_size(record: &StorageRecord) -> usize {
    record.key.len() + record.value.len()
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<StorageRecord>> {
        Ok(self.snapshot())
    }

    async fn get(&self, key: &str) -> Result<Option<StorageRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str, updated_at: i64) -> Result<()> {
        self.store_all(vec![StorageRecord::new(key, value, updated_at)])
    }

    async fn bulk_put(&self, records: Vec<StorageRecord>) -> Result<()> {
        self.store_all(records)
    }

    async fn reset(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }
}
