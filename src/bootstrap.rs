//! One-time start-up of a [`Store`]: hydrate the in-memory cache from the durable store, then move legacy entries
//! over.
//!
//! Every step is allowed to fail. Whatever goes wrong ends up as a warning in [`BootstrapStatus`]; the store keeps
//! working, in memory only if it must.
use serde_json::Value;
use std::sync::atomic::Ordering;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::Result;
use crate::error::StoreError;
use crate::sanitize::sanitize_with;
use crate::store::now_millis;
use crate::store::spawn;
use crate::store::Store;
use crate::types::BootstrapPhase;
use crate::types::BootstrapStatus;
use crate::types::StorageRecord;

pub const WARN_DATA_RESET: &str = "Saved data could not be read and was reset after a storage problem.";
pub const WARN_DEGRADED: &str = "Durable storage is unavailable; changes are kept in memory for this session only.";

pub fn legacy_skip_warning(key: &str) -> String {
    format!("Saved data for '{key}' could not be read and was skipped.")
}

impl Store {
    /// Run the bootstrap, or wait for the one already running, and return the resulting status.
    ///
    /// Never fails: storage problems degrade the store rather than the application.
    pub async fn initialize(&self) -> BootstrapStatus {
        self.inner.bootstrap_started.store(true, Ordering::Release);
        self.inner.bootstrap.get_or_init(|| self.run_bootstrap()).await;
        self.status()
    }

    pub fn bootstrap_phase(&self) -> BootstrapPhase {
        if self.inner.bootstrap.initialized() {
            BootstrapPhase::Done
        }
        else if self.inner.bootstrap_started.load(Ordering::Acquire) {
            BootstrapPhase::InFlight
        }
        else {
            BootstrapPhase::NotStarted
        }
    }

    /// Start the bootstrap in the background unless it's already running or done.
    pub(crate) fn trigger_bootstrap(&self) {
        if self.inner.bootstrap_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let store = self.clone();
        if spawn(async move {
            store.initialize().await;
        })
        .is_none()
        {
            // Let the next caller try again from within a runtime.
            self.inner.bootstrap_started.store(false, Ordering::Release);
        }
    }

    async fn run_bootstrap(&self) {
        info!("Bootstrapping storage");

        let durable = match self.hydrate().await {
            Ok(count) => {
                debug!("Hydrated {count} records");
                true
            }
            Err(err) => {
                warn!("Hydration failed, resetting durable storage: {err}");
                self.state().cache.clear_all();
                self.note_recovery(WARN_DATA_RESET);

                match self.rehydrate().await {
                    Ok(count) => {
                        debug!("Hydrated {count} records after reset");
                        true
                    }
                    Err(err) => {
                        error!("Durable storage unavailable, continuing in memory: {err}");
                        self.state().cache.clear_all();
                        self.note_recovery(WARN_DEGRADED);
                        false
                    }
                }
            }
        };

        self.migrate_legacy(durable).await;

        let status = self.status();
        info!(
            "Storage ready (durable: {durable}, recovered: {}, warnings: {})",
            status.recovered,
            status.warnings.len()
        );
    }

    // All records are parsed before any of them gets into the cache: it's either everything or nothing.
    async fn hydrate(&self) -> Result<usize> {
        let records = &self.inner.records;
        records.open().await?;

        let mut parsed = Vec::new();
        for record in records.get_all().await? {
            let value = record.parse().map_err(|source| StoreError::HydrationParse {
                key: record.key.clone(),
                source,
            })?;
            parsed.push((record.key, record.value, value));
        }

        let count = parsed.len();
        let mut state = self.state();
        for (key, serialized, value) in parsed {
            state.cache.record_commit(&key, serialized, value);
        }
        Ok(count)
    }

    async fn rehydrate(&self) -> Result<usize> {
        self.inner.records.reset().await?;
        self.hydrate().await
    }

    async fn migrate_legacy(&self, durable: bool) {
        let legacy = &self.inner.legacy;
        let config = &self.inner.config;
        let updated_at = now_millis();
        let mut adopted: Vec<(StorageRecord, Value)> = Vec::new();

        for key in config.key_space() {
            let raw = match legacy.get(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warn!("Cannot read legacy entry '{key}': {err}");
                    continue;
                }
            };

            let parsed = serde_json::from_str::<Value>(&raw);
            // Without a durable store to move into, a readable legacy copy is the only one that survives a restart.
            // Unreadable ones go regardless.
            let drop_legacy = durable || parsed.is_err();

            match parsed {
                Ok(value) => {
                    let value = sanitize_with(&value, config.sanitize_depth(), config.inline_image_limit());
                    let serialized = value.to_string();
                    let mut state = self.state();
                    if state.cache.contains(key) {
                        debug!("Legacy entry '{key}' is older than the durable record, dropping it");
                    }
                    else {
                        state.cache.record_commit(key, serialized.clone(), value.clone());
                        adopted.push((StorageRecord::new(key.as_str(), serialized, updated_at), value));
                    }
                }
                Err(source) => {
                    let err = StoreError::LegacyParse {
                        key: key.clone(),
                        source,
                    };
                    warn!("Skipping legacy entry: {err}");
                    self.note_recovery(legacy_skip_warning(key));
                }
            }

            if drop_legacy {
                if let Err(err) = legacy.remove(key) {
                    warn!("Cannot remove legacy entry '{key}': {err}");
                }
            }
        }

        if adopted.is_empty() {
            return;
        }

        if !durable {
            info!("Adopted {} legacy entries in memory only", adopted.len());
            return;
        }

        let records = adopted.iter().map(|(record, _)| record.clone()).collect::<Vec<_>>();
        match self.inner.records.bulk_put(records).await {
            Ok(()) => info!("Migrated {} legacy entries", adopted.len()),
            Err(err) => {
                warn!("Committing migrated legacy entries failed, retrying them one by one: {err}");
                for (record, value) in adopted {
                    // Out of the cache so the write path doesn't take them for already committed.
                    self.state().cache.forget(&record.key);
                    self.request_write(&record.key, value, false);
                }
            }
        }
    }
}
