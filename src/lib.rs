//! turnlock — per-key asynchronous reader-writer locking.
//!
//! A [`KeyRwLock`] serializes concurrently arriving transactions that operate
//! on a shared external resource identified by an opaque key (a conversation
//! ID, a channel ID, a row key). Each key locks independently: any number of
//! readers may hold a key together, a writer holds it alone, and the four
//! acquisition operations decide whether a transaction runs immediately, is
//! skipped, or waits.
//!
//! ## Quick Start
//!
//! ```
//! use turnlock::KeyRwLock;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let lock = KeyRwLock::new();
//!
//! // Skip-if-busy work: returns None (transaction not invoked) on contention.
//! let posted = lock.try_write("channel-1", || async { "posted" }).await;
//! assert_eq!(posted, Some("posted"));
//!
//! // Must-eventually-happen work: waits for the key to free up.
//! let replied = lock.read("channel-1", || async { "replied" }).await;
//! assert_eq!(replied, "replied");
//! # });
//! ```
//!
//! ## Semantics
//!
//! - The transaction is an `FnOnce() -> Future`, invoked only after the key
//!   is acquired. Its output — including a caller's `Err` — passes through
//!   unchanged; the lock never inspects it. Release is guaranteed on every
//!   exit path before the output reaches the caller.
//! - `try_read`/`try_write` signal contention with `None`, never an error.
//! - `read`/`write` park until the key frees and cannot fail due to
//!   contention. There is no deadline: a transaction that never completes
//!   holds its key forever.
//! - When a key frees, **all** waiters parked on it wake together and race
//!   to re-acquire. A newly arrived caller or another reader may win ahead
//!   of a longer-parked writer; no arrival-order fairness is guaranteed,
//!   only progress whenever the key frees and some waiter retries.
//!
//! Callers that never need concurrent readers can use `write`/`try_write`
//! alone; that subset behaves as a plain per-key mutex.

mod notifier;
mod rwlock;
mod table;

pub use rwlock::KeyRwLock;
