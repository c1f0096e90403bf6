use parking_lot::Mutex;
use parking_lot::MutexGuard;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::mem_cache::CachePair;
use crate::pending::PendingBuffer;
use crate::pending::PendingWrite;
use crate::sanitize::sanitize_with;
use crate::traits::LegacyStore;
use crate::traits::RecordStore;
use crate::types::BootstrapStatus;
use crate::types::WriteOutcome;

pub const WARN_QUOTA_RESET: &str = "Storage exceeded the available space and was reset.";

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) cache:   CachePair,
    pub(crate) pending: PendingBuffer,
}

#[derive(Debug)]
pub(crate) struct StoreInner {
    pub(crate) config:            StoreConfig,
    pub(crate) records:           Arc<dyn RecordStore>,
    pub(crate) legacy:            Arc<dyn LegacyStore>,
    pub(crate) state:             Mutex<State>,
    pub(crate) status:            Mutex<BootstrapStatus>,
    pub(crate) bootstrap:         OnceCell<()>,
    pub(crate) bootstrap_started: AtomicBool,
    pub(crate) unload_registered: AtomicBool,
    // Serializes durable writes of the same key so they land in the order they were requested.
    key_locks:                    Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_seq:                     AtomicU64,
}

/// The write-back store.
///
/// A `Store` is a cheap handle; clones share the same caches, pending writes, and bootstrap state. Build one at the
/// application's composition root and pass it wherever persisted state is needed.
///
/// Reads never wait for durable I/O: they are answered from the pending buffer, then from the in-memory cache, then
/// by the caller's fallback. Writes are visible to reads immediately and reach the durable store after the key has
/// been quiet for [`StoreConfig::debounce_interval()`].
///
/// ```ignore
/// let store = Store::new(config, Arc::new(SqliteRecordStore::new(path)), Arc::new(legacy));
/// let status = store.initialize().await;
/// if status.recovered {
///     show_repair_notice(&status.warnings);
/// }
///
/// let mut clients: Vec<Client> = store.load("clients", Vec::new());
/// clients.push(new_client);
/// store.save("clients", &clients);
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    pub fn new(config: StoreConfig, records: Arc<dyn RecordStore>, legacy: Arc<dyn LegacyStore>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                records,
                legacy,
                state: Mutex::new(State::default()),
                status: Mutex::new(BootstrapStatus::default()),
                bootstrap: OnceCell::new(),
                bootstrap_started: AtomicBool::new(false),
                unload_registered: AtomicBool::new(false),
                key_locks: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn record_store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.inner.records)
    }

    /// Snapshot of the current bootstrap status, including warnings added by later quota recoveries.
    pub fn status(&self) -> BootstrapStatus {
        self.inner.status.lock().clone()
    }

    /// The freshest known value of `key`, if any. Triggers bootstrap in the background if it hasn't started yet.
    pub fn load_value(&self, key: &str) -> Option<Value> {
        self.trigger_bootstrap();
        let state = self.state();
        state
            .pending
            .get(key)
            .map(|w| w.value.clone())
            .or_else(|| state.cache.read_parsed(key).cloned())
    }

    /// Typed read. A stored value that doesn't deserialize into `T` is treated as missing.
    pub fn load<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        match self.load_value(key) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
                warn!("Value of '{key}' doesn't match the requested type: {err}");
                fallback
            }),
            None => fallback,
        }
    }

    /// Request a debounced write.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Some(value) = Self::to_value(key, value) {
            self.request_write(key, value, false);
        }
    }

    /// Request a write that starts right away instead of waiting for the debounce interval. The caller doesn't wait
    /// for it to complete.
    pub fn save_immediate<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Some(value) = Self::to_value(key, value) {
            let write = self.request_write(key, value, true);
            let store = self.clone();
            let key = key.to_string();
            spawn(async move {
                let _ = store.write_path(&key, write).await;
            });
        }
    }

    /// Immediate write that waits for the durable store and reports how it went. Reads observe the new value even if
    /// this returns an error.
    pub async fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<WriteOutcome> {
        let value = serde_json::to_value(value)?;
        let write = self.request_write(key, value, true);
        self.write_path(key, write).await
    }

    /// Write out every pending value now. Returns the number of keys that were pending.
    pub async fn flush(&self) -> usize {
        let writes = self.state().pending.drain();
        let count = writes.len();
        if count > 0 {
            debug!("Flushing {count} pending writes");
        }

        for (key, write) in writes {
            if let Err(err) = self.write_path(&key, write).await {
                debug!("Pending write of '{key}' stays in memory: {err}");
            }
        }

        count
    }

    /// Flush and release the durable store.
    pub async fn close(&self) {
        self.flush().await;
        if let Err(err) = self.inner.records.close().await {
            warn!("Error closing record store: {err}");
        }
    }

    /// Number of keys whose latest value hasn't reached the durable store yet.
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// True while a debounce timer for `key` is still waiting.
    pub fn is_scheduled(&self, key: &str) -> bool {
        self.state().pending.has_timer(key)
    }

    #[inline]
    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock()
    }

    pub(crate) fn note_recovery<S: Into<String>>(&self, warning: S) {
        let warning = warning.into();
        if self.inner.status.lock().note_recovery(warning.clone()) {
            warn!("Storage repaired: {warning}");
        }
    }

    fn to_value<T: Serialize + ?Sized>(key: &str, value: &T) -> Option<Value> {
        serde_json::to_value(value)
            .inspect_err(|err| error!("Value of '{key}' cannot be serialized, not saving: {err}"))
            .ok()
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.inner.key_locks.lock().entry(key.to_string()).or_default())
    }

    // Stage the value so reads see it right away, cancel the key's timer, and, unless immediate, start a new one.
    pub(crate) fn request_write(&self, key: &str, value: Value, immediate: bool) -> PendingWrite {
        let write = PendingWrite {
            value,
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1,
        };

        let mut state = self.state();
        state.pending.stage(key, write.clone());
        state.pending.cancel_timer(key);

        if !immediate {
            let store = self.clone();
            let timer_key = key.to_string();
            let seq = write.seq;
            let delay = self.inner.config.debounce_interval();
            // The timer can't fire before it's registered: fire_timer needs the state lock we're holding.
            if let Some(handle) = spawn(async move {
                tokio::time::sleep(delay).await;
                store.fire_timer(timer_key, seq).await;
            }) {
                state.pending.set_timer(key, seq, handle);
            }
        }

        write
    }

    async fn fire_timer(&self, key: String, seq: u64) {
        let write = {
            let mut state = self.state();
            if !state.pending.disarm_timer(&key, seq) {
                return;
            }
            state.pending.get_seq(&key, seq)
        };

        if let Some(write) = write {
            let _ = self.write_path(&key, write).await;
        }
    }

    pub(crate) async fn write_path(&self, key: &str, write: PendingWrite) -> Result<WriteOutcome> {
        // Never race hydration: committed state must not be overwritten by what's read back from the durable store.
        self.initialize().await;

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if self.state().pending.is_superseded(key, write.seq) {
            debug!("Write #{} of '{key}' superseded by a newer one", write.seq);
            return Ok(WriteOutcome::Unchanged);
        }

        let config = &self.inner.config;
        let sanitized = sanitize_with(&write.value, config.sanitize_depth(), config.inline_image_limit());
        let serialized = serde_json::to_string(&sanitized)
            .inspect_err(|err| error!("Value of '{key}' cannot be serialized: {err}"))?;

        {
            let mut state = self.state();
            if state.cache.read_serialized(key) == Some(serialized.as_str()) {
                state.pending.settle(key, write.seq);
                debug!("'{key}' unchanged, skipping durable write");
                return Ok(WriteOutcome::Unchanged);
            }
        }

        match self.inner.records.put(key, &serialized, now_millis()).await {
            Ok(()) => {
                self.commit(key, write.seq, serialized, sanitized);
                Ok(WriteOutcome::Written)
            }
            Err(err) if err.is_quota_exceeded() => {
                warn!("Writing '{key}' exceeded the storage quota: {err}");
                self.recover_from_quota().await;

                match self.inner.records.put(key, &serialized, now_millis()).await {
                    Ok(()) => {
                        self.commit(key, write.seq, serialized, sanitized);
                        Ok(WriteOutcome::WrittenAfterReset)
                    }
                    Err(err) => {
                        error!("Writing '{key}' failed again after storage reset: {err}");
                        Err(err)
                    }
                }
            }
            Err(err) => {
                error!("Writing '{key}' failed: {err}");
                Err(err)
            }
        }
    }

    fn commit(&self, key: &str, seq: u64, serialized: String, sanitized: Value) {
        let mut state = self.state();
        state.cache.record_commit(key, serialized, sanitized);
        state.pending.settle(key, seq);
        debug!("'{key}' committed (write #{seq})");
    }

    /// Reset the durable store and the committed cache after the store ran out of space. The caller retries its own
    /// write.
    ///
    /// Pending writes and their debounce timers are left alone: none of them has reached the durable store, so they
    /// are exactly what must land once it has room again. Reads keep seeing them in the meantime.
    async fn recover_from_quota(&self) {
        self.note_recovery(WARN_QUOTA_RESET);
        self.state().cache.clear_all();
        if let Err(err) = self.inner.records.reset().await {
            error!("Storage reset failed: {err}");
        }
    }
}

/// Spawn on the current runtime if there is one.
pub(crate) fn spawn<F>(future: F) -> Option<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            warn!("No async runtime available, background task not started");
            None
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
