use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Result;
use crate::types::StorageRecord;

/// The durable engine behind a [`Store`](crate::Store).
///
/// Values are opaque JSON text. Implementations must classify out-of-space conditions as
/// [`StoreError::QuotaExceeded`](crate::error::StoreError::QuotaExceeded) so the store can recover from them.
#[async_trait]
pub trait RecordStore: Debug + Send + Sync + 'static {
    /// Make the store ready for use. Must be safe to call any number of times.
    async fn open(&self) -> Result<()>;

    async fn get_all(&self) -> Result<Vec<StorageRecord>>;

    async fn get(&self, key: &str) -> Result<Option<StorageRecord>>;

    async fn put(&self, key: &str, value: &str, updated_at: i64) -> Result<()>;

    /// Commit all records as a single unit.
    async fn bulk_put(&self, records: Vec<StorageRecord>) -> Result<()>;

    /// Destroy everything and come back empty. Must work even if the store is currently failing.
    async fn reset(&self) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The flat key-value mechanism that predates the durable store. Only read and cleaned up during migration.
pub trait LegacyStore: Debug + Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}
