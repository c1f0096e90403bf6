//! # wb-store
//!
//! Durable client-side key-value cache with debounced write-back and self-healing recovery.
//!
//! Think of it as the place where an interactive application keeps its state between runs: client lists, rate
//! sheets, chat history, drafts. Every screen reads and writes through it, so it must never make them wait.
//!
//! # The Basics
//!
//! The crate is designed around the following guarantees:
//!
//! - Reads are synchronous and never touch durable storage. They are served from the pending write buffer, then from
//!   the in-memory cache, then by the caller-supplied fallback.
//! - A write is visible to every later read the moment it's requested, long before it reaches the disk.
//! - Bursts of writes to the same key are coalesced: only the last value written within the debounce interval is
//!   committed. Writing an unchanged value costs nothing.
//! - Storage problems don't crash the application. A corrupt durable store is reset, running out of space resets
//!   it and retries the write, and an unusable store leaves the application running in memory. Every repair is
//!   reported through [`BootstrapStatus`](types::BootstrapStatus) so the user can be told about it.
//! - Data from the legacy flat key-value storage is migrated once, transparently.
//!
//! # Components
//!
//! - [`RecordStore`](traits::RecordStore): the durable engine. [`SqliteRecordStore`](backend::SqliteRecordStore)
//!   (feature `sqlite`) and [`MemoryRecordStore`](backend::MemoryRecordStore) are provided.
//! - [`LegacyStore`](traits::LegacyStore): the storage being phased out; see the [`legacy`] module.
//! - [`Store`]: the context object tying caches, pending writes, debounce timers, bootstrap, and recovery
//!   together.
//! - [`UnloadGuard`](unload::UnloadGuard): flushes pending writes on teardown.
//!
//! Concurrency is cooperative from the store's point of view: in-memory state sits behind a single lock that is
//! never held across an `.await`, and durable writes of the same key are serialized in request order.

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod legacy;
pub mod mem_cache;
pub(crate) mod pending;
pub mod sanitize;
pub mod store;
pub mod traits;
pub mod types;
pub mod unload;

#[doc(inline)]
pub use config::StoreConfig;
#[doc(inline)]
pub use error::StoreError;
#[doc(inline)]
pub use store::Store;

pub mod prelude {
    pub use crate::backend::MemoryRecordStore;
    #[cfg(feature = "sqlite")]
    pub use crate::backend::SqliteRecordStore;
    pub use crate::config::StoreConfig;
    pub use crate::error::StoreError;
    pub use crate::legacy::JsonFileLegacyStore;
    pub use crate::legacy::MemoryLegacyStore;
    pub use crate::store::Store;
    pub use crate::traits::LegacyStore;
    pub use crate::traits::RecordStore;
    pub use crate::types::*;
    pub use crate::unload::UnloadGuard;
}
