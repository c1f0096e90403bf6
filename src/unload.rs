use std::future::Future;
use std::io;
use std::sync::atomic::Ordering;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use crate::store::spawn;
use crate::store::Store;

/// Exit status after a teardown requested with Ctrl+C: 128 + SIGINT, as the shell reports a process killed by it.
pub const TEARDOWN_EXIT_CODE: i32 = 130;

/// Best-effort flush of pending writes on teardown.
///
/// While alive, the guard listens for Ctrl+C. Listening takes the signal over from its default handler, so once it
/// arrives the guard flushes and then ends the process with [`TEARDOWN_EXIT_CODE`] itself. Dropping the guard fires
/// one more flush, which may or may not complete before the runtime goes away.
#[derive(Debug)]
pub struct UnloadGuard {
    store:    Store,
    listener: Option<JoinHandle<()>>,
}

impl Store {
    /// Install the unload guard. Only the first call for a store gets one, any later call returns `None`.
    pub fn register_unload_guard(&self) -> Option<UnloadGuard> {
        self.register_unload_guard_with(signal::ctrl_c(), |code| std::process::exit(code))
    }

    /// Like [`register_unload_guard()`](Self::register_unload_guard), but teardown is announced by `teardown`
    /// resolving, and `exit` is called with [`TEARDOWN_EXIT_CODE`] after the flush instead of ending the process.
    pub fn register_unload_guard_with<S, E>(&self, teardown: S, exit: E) -> Option<UnloadGuard>
    where
        S: Future<Output = io::Result<()>> + Send + 'static,
        E: FnOnce(i32) + Send + 'static,
    {
        if self.inner.unload_registered.swap(true, Ordering::AcqRel) {
            return None;
        }

        let store = self.clone();
        let listener = spawn(async move {
            match teardown.await {
                Ok(()) => {
                    let count = store.flush().await;
                    info!("Teardown requested, flushed {count} pending writes");
                    exit(TEARDOWN_EXIT_CODE);
                }
                Err(err) => warn!("Cannot listen for teardown signal: {err}"),
            }
        });

        Some(UnloadGuard {
            store: self.clone(),
            listener,
        })
    }
}

impl UnloadGuard {
    /// Flush in the background. The handle yields the number of flushed keys for whoever cares to wait.
    pub fn fire(&self) -> Option<JoinHandle<usize>> {
        let store = self.store.clone();
        spawn(async move { store.flush().await })
    }
}

impl Drop for UnloadGuard {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if self.store.pending_count() > 0 {
            let _ = self.fire();
        }
    }
}
