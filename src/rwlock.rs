//! Acquisition façade over the lock table.
//!
//! Four operations, each combining a table transition, execution of a
//! caller-supplied transaction, and guaranteed release. Release is performed
//! by an RAII guard constructed before the transaction runs, so it happens
//! exactly once on every exit path: normal return, an `Err` inside the
//! caller's own output type, a panic unwinding through the transaction, or
//! cancellation of the façade future mid-await.

use std::fmt;
use std::future::Future;
use std::hash::Hash;

use tracing::trace;

use crate::table::{Claim, LockTable};

/// Per-key asynchronous reader-writer lock.
///
/// Each key locks independently. A transaction is any `FnOnce` producing a
/// future; it is invoked only after the key is acquired and its output is
/// returned unchanged — fallible callers return `Result` from the
/// transaction and the error propagates after release.
///
/// Waiters parked on a key all wake together when it frees and race to
/// re-acquire (thundering herd); there is no arrival-order fairness. See the
/// crate docs for the full semantics.
pub struct KeyRwLock<K> {
    table: LockTable<K>,
}

impl<K: Eq + Hash + Clone + fmt::Debug> KeyRwLock<K> {
    pub fn new() -> Self {
        KeyRwLock {
            table: LockTable::new(),
        }
    }

    /// Run `txn` under a read lock on `key`, unless a writer holds the key.
    ///
    /// Returns `None` without invoking `txn` when the key is write-held.
    /// `None` is a skipped-due-to-contention signal, not an error: no side
    /// effect of `txn` has occurred.
    pub async fn try_read<F, Fut>(&self, key: K, txn: F) -> Option<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        if !self.table.try_claim_shared(&key) {
            trace!(?key, "read skipped, key is write-held");
            return None;
        }
        let _release = ReleaseOnDrop::shared(&self.table, key);
        Some(txn().await)
    }

    /// Run `txn` under the write lock on `key`, unless the key has any
    /// holder.
    ///
    /// Returns `None` without invoking `txn` when the key is held, shared or
    /// exclusive.
    pub async fn try_write<F, Fut>(&self, key: K, txn: F) -> Option<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        if !self.table.try_claim_exclusive(&key) {
            trace!(?key, "write skipped, key is held");
            return None;
        }
        let _release = ReleaseOnDrop::exclusive(&self.table, key);
        Some(txn().await)
    }

    /// Run `txn` under a read lock on `key`, waiting for any writer to
    /// release first.
    ///
    /// Cannot fail due to contention; only the transaction's own output is
    /// returned. Waits indefinitely — there is no deadline.
    pub async fn read<F, Fut>(&self, key: K, txn: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        loop {
            match self.table.claim_shared(&key) {
                Claim::Granted => break,
                Claim::Parked(parked) => parked.wait().await,
            }
        }
        let _release = ReleaseOnDrop::shared(&self.table, key);
        txn().await
    }

    /// Run `txn` under the write lock on `key`, waiting for all holders to
    /// release first.
    pub async fn write<F, Fut>(&self, key: K, txn: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        loop {
            match self.table.claim_exclusive(&key) {
                Claim::Granted => break,
                Claim::Parked(parked) => parked.wait().await,
            }
        }
        let _release = ReleaseOnDrop::exclusive(&self.table, key);
        txn().await
    }

    /// Whether `key` currently has no holder.
    pub fn is_free(&self, key: &K) -> bool {
        self.table.is_free(key)
    }

    /// Number of live readers on `key`; zero when absent or write-held.
    pub fn reader_count(&self, key: &K) -> usize {
        self.table.reader_count(key)
    }

    /// Whether a writer currently holds `key`.
    pub fn is_write_locked(&self, key: &K) -> bool {
        self.table.is_write_locked(key)
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> Default for KeyRwLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> fmt::Debug for KeyRwLock<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRwLock")
            .field("held_keys", &self.table.len())
            .finish()
    }
}

enum HolderKind {
    Shared,
    Exclusive,
}

/// Releases one acquisition when dropped.
struct ReleaseOnDrop<'a, K: Eq + Hash + Clone + fmt::Debug> {
    table: &'a LockTable<K>,
    key: K,
    kind: HolderKind,
}

impl<'a, K: Eq + Hash + Clone + fmt::Debug> ReleaseOnDrop<'a, K> {
    fn shared(table: &'a LockTable<K>, key: K) -> Self {
        ReleaseOnDrop {
            table,
            key,
            kind: HolderKind::Shared,
        }
    }

    fn exclusive(table: &'a LockTable<K>, key: K) -> Self {
        ReleaseOnDrop {
            table,
            key,
            kind: HolderKind::Exclusive,
        }
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> Drop for ReleaseOnDrop<'_, K> {
    fn drop(&mut self) {
        match self.kind {
            HolderKind::Shared => self.table.release_shared(&self.key),
            HolderKind::Exclusive => self.table.release_exclusive(&self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;

    use super::*;

    #[tokio::test]
    async fn try_write_runs_transaction_and_releases() {
        let lock = KeyRwLock::new();
        let result = lock.try_write("k", || async { 7 }).await;
        assert_eq!(result, Some(7));
        assert!(lock.is_free(&"k"));
    }

    #[tokio::test]
    async fn try_read_runs_transaction_and_releases() {
        let lock = KeyRwLock::new();
        let result = lock.try_read("k", || async { "hi" }).await;
        assert_eq!(result, Some("hi"));
        assert!(lock.is_free(&"k"));
    }

    #[test]
    fn blocking_forms_complete_synchronously_on_free_key() {
        // Absent key grants in one step; no spurious park on the fast path.
        let lock = KeyRwLock::new();
        assert_eq!(lock.read("k", || async { 1 }).now_or_never(), Some(1));
        assert_eq!(lock.write("k", || async { 2 }).now_or_never(), Some(2));
        assert!(lock.is_free(&"k"));
    }

    #[tokio::test]
    async fn transaction_holds_the_lock_while_running() {
        let lock = KeyRwLock::new();
        let l = &lock;
        l.write("k", move || async move {
            assert!(l.is_write_locked(&"k"));
            // Reentrant attempts are contention, not deadlock.
            assert!(l.try_write("k", || async {}).await.is_none());
            assert!(l.try_read("k", || async {}).await.is_none());
        })
        .await;
        assert!(lock.is_free(&"k"));

        l.read("k", move || async move {
            assert_eq!(l.reader_count(&"k"), 1);
            assert!(l.try_write("k", || async {}).await.is_none());
            // A second reader is admitted alongside.
            let readers = l
                .try_read("k", move || async move { l.reader_count(&"k") })
                .await;
            assert_eq!(readers, Some(2));
        })
        .await;
        assert!(lock.is_free(&"k"));
    }

    #[tokio::test]
    async fn failing_transaction_releases_before_propagating() {
        let lock = KeyRwLock::new();
        let result: Option<Result<(), &str>> =
            lock.try_write("k", || async { Err("boom") }).await;
        assert_eq!(result, Some(Err("boom")));
        assert!(lock.is_free(&"k"));

        let result: Result<(), &str> = lock.read("k", || async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));
        assert!(lock.is_free(&"k"));
    }

    #[tokio::test]
    async fn cancelled_acquisition_releases() {
        let lock = KeyRwLock::new();
        // Poll once (transaction pending), then drop the façade future.
        let mut held = Box::pin(lock.write("k", || std::future::pending::<()>()));
        assert!((&mut held).now_or_never().is_none());
        assert!(lock.is_write_locked(&"k"));
        drop(held);
        assert!(lock.is_free(&"k"));
    }

    #[tokio::test]
    async fn debug_shows_held_key_count() {
        let lock = KeyRwLock::new();
        let l = &lock;
        l.read("k", move || async move {
            assert_eq!(format!("{l:?}"), "KeyRwLock { held_keys: 1 }");
        })
        .await;
        assert_eq!(format!("{lock:?}"), "KeyRwLock { held_keys: 0 }");
    }
}
