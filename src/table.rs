//! Per-key lock state machine.
//!
//! `LockTable` maps each key to at most one [`KeyState`]: absent (no entry),
//! shared by `readers >= 1` concurrent readers, or held by exactly one
//! writer. Every entry owns one [`Notifier`]; the last release of an entry
//! removes it and fires the notifier, waking all waiters parked on that key
//! at once. Waiters re-check the table after every wake, so there is no
//! ordered hand-off.
//!
//! The table mutex guards short critical sections only and is never held
//! across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Mutex;

use tracing::trace;

use crate::notifier::{Notifier, Parked};

#[derive(Debug)]
enum KeyState {
    Shared { readers: usize, notifier: Notifier },
    Exclusive { notifier: Notifier },
}

/// Outcome of a blocking claim attempt.
pub(crate) enum Claim {
    Granted,
    /// Key is busy; the subscription was taken under the same mutex guard
    /// that observed the busy state.
    Parked(Parked),
}

pub(crate) struct LockTable<K> {
    entries: Mutex<HashMap<K, KeyState>>,
}

impl<K: Eq + Hash + Clone + fmt::Debug> LockTable<K> {
    pub(crate) fn new() -> Self {
        LockTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a reader unless a writer holds the key.
    pub(crate) fn try_claim_shared(&self, key: &K) -> bool {
        let mut entries = self.guard();
        match entries.get_mut(key) {
            None => {
                entries.insert(
                    key.clone(),
                    KeyState::Shared {
                        readers: 1,
                        notifier: Notifier::new(),
                    },
                );
                trace!(?key, readers = 1, "read claim granted");
                true
            }
            Some(KeyState::Shared { readers, .. }) => {
                *readers += 1;
                trace!(?key, readers = *readers, "read claim granted");
                true
            }
            Some(KeyState::Exclusive { .. }) => false,
        }
    }

    /// Admit a writer only when the key is absent.
    pub(crate) fn try_claim_exclusive(&self, key: &K) -> bool {
        let mut entries = self.guard();
        match entries.get_mut(key) {
            None => {
                entries.insert(
                    key.clone(),
                    KeyState::Exclusive {
                        notifier: Notifier::new(),
                    },
                );
                trace!(?key, "write claim granted");
                true
            }
            Some(_) => false,
        }
    }

    /// Like [`try_claim_shared`](Self::try_claim_shared), but a busy key
    /// yields a parked subscription instead of failure.
    pub(crate) fn claim_shared(&self, key: &K) -> Claim {
        let mut entries = self.guard();
        match entries.get_mut(key) {
            None => {
                entries.insert(
                    key.clone(),
                    KeyState::Shared {
                        readers: 1,
                        notifier: Notifier::new(),
                    },
                );
                trace!(?key, readers = 1, "read claim granted");
                Claim::Granted
            }
            Some(KeyState::Shared { readers, .. }) => {
                *readers += 1;
                trace!(?key, readers = *readers, "read claim granted");
                Claim::Granted
            }
            Some(KeyState::Exclusive { notifier }) => {
                trace!(?key, "reader parked behind writer");
                Claim::Parked(notifier.parked())
            }
        }
    }

    /// Like [`try_claim_exclusive`](Self::try_claim_exclusive), but a busy
    /// key yields a parked subscription instead of failure.
    pub(crate) fn claim_exclusive(&self, key: &K) -> Claim {
        let mut entries = self.guard();
        match entries.get_mut(key) {
            None => {
                entries.insert(
                    key.clone(),
                    KeyState::Exclusive {
                        notifier: Notifier::new(),
                    },
                );
                trace!(?key, "write claim granted");
                Claim::Granted
            }
            Some(KeyState::Shared { notifier, .. }) | Some(KeyState::Exclusive { notifier }) => {
                trace!(?key, "writer parked");
                Claim::Parked(notifier.parked())
            }
        }
    }

    /// Release one reader. Removing the last reader fires the entry's
    /// notifier.
    ///
    /// Panics when the key is not read-held: that is a bookkeeping bug in the
    /// caller, never a runtime condition.
    pub(crate) fn release_shared(&self, key: &K) {
        let mut entries = self.guard();
        let remaining = match entries.get_mut(key) {
            Some(KeyState::Shared { readers, .. }) => {
                *readers -= 1;
                *readers
            }
            Some(KeyState::Exclusive { .. }) => {
                panic!("read release on write-held key {key:?}")
            }
            None => panic!("read release on unheld key {key:?}"),
        };
        if remaining > 0 {
            trace!(?key, readers = remaining, "reader released");
            return;
        }
        let Some(KeyState::Shared { notifier, .. }) = entries.remove(key) else {
            unreachable!()
        };
        drop(entries);
        trace!(?key, "last reader released, waking waiters");
        notifier.fire();
    }

    /// Release the writer, firing the entry's notifier.
    ///
    /// Panics when the key is not write-held, same policy as
    /// [`release_shared`](Self::release_shared).
    pub(crate) fn release_exclusive(&self, key: &K) {
        let mut entries = self.guard();
        let notifier = match entries.remove(key) {
            Some(KeyState::Exclusive { notifier }) => notifier,
            Some(KeyState::Shared { .. }) => {
                panic!("write release on read-held key {key:?}")
            }
            None => panic!("write release on unheld key {key:?}"),
        };
        drop(entries);
        trace!(?key, "writer released, waking waiters");
        notifier.fire();
    }

    pub(crate) fn is_free(&self, key: &K) -> bool {
        !self.guard().contains_key(key)
    }

    /// Live reader count; zero when the key is absent or write-held.
    pub(crate) fn reader_count(&self, key: &K) -> usize {
        match self.guard().get(key) {
            Some(KeyState::Shared { readers, .. }) => *readers,
            _ => 0,
        }
    }

    pub(crate) fn is_write_locked(&self, key: &K) -> bool {
        matches!(self.guard().get(key), Some(KeyState::Exclusive { .. }))
    }

    /// Number of currently held keys.
    pub(crate) fn len(&self) -> usize {
        self.guard().len()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<K, KeyState>> {
        // Poison means a release already panicked on corrupted state; keep
        // failing loudly rather than continue on it.
        self.entries.lock().expect("lock table mutex poisoned")
    }
}
