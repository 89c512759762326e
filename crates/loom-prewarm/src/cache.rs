//! Prewarmed thread cache keyed by working directory.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::freshness::{Clock, SystemClock, is_fresh};
use crate::signature::Signature;

/// Identity of a single reservation.
///
/// A slot can be reserved many times over its life; the id tells a caller
/// whether the slot still holds the reservation it made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(Uuid);

impl EntryId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to an in-flight or finished thread start.
///
/// Cloning is cheap and every clone observes the same result.
pub struct PendingThread<T> {
    inner: Shared<BoxFuture<'static, Result<T>>>,
}

impl<T: Clone + Send + Sync + 'static> PendingThread<T> {
    /// Run `future` as a detached tokio task.
    ///
    /// The task makes progress whether or not anyone awaits the handle, and
    /// keeps running if the reservation holding it is replaced.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        Self::from_future(async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::TaskAborted(e.to_string())),
            }
        })
    }

    /// Wrap a future that is driven only while awaited.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// An already finished start.
    pub fn ready(result: Result<T>) -> Self {
        let pending = Self::from_future(futures::future::ready(result));
        // Store the output now so `is_resolved` sees it
        let _ = pending.inner.clone().now_or_never();
        pending
    }

    /// Wait for the start to finish.
    pub async fn wait(&self) -> Result<T> {
        self.inner.clone().await
    }

    /// Whether the start's result has been observed.
    ///
    /// Never polls the start, so it is safe to call under the cache lock. A
    /// start that finished but that nobody has awaited yet reads as unresolved.
    pub fn is_resolved(&self) -> bool {
        self.inner.peek().is_some()
    }
}

impl<T> Clone for PendingThread<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for PendingThread<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingThread").finish_non_exhaustive()
    }
}

/// Reservation stored for a working directory.
struct Slot<T> {
    id: EntryId,
    pending: PendingThread<T>,
    conversation_id: Option<String>,
    created_at_seconds: Option<i64>,
    signature: Signature,
}

/// Snapshot of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Reservation identity.
    pub id: EntryId,

    /// Working directory the entry is keyed by.
    pub cwd: String,

    /// Conversation id, once the thread has started.
    pub conversation_id: Option<String>,

    /// Thread creation time, once the thread has started.
    pub created_at_seconds: Option<i64>,

    /// Signature of the permissions the thread was started under.
    pub signature: Signature,

    /// Whether the underlying start's result has been observed.
    pub resolved: bool,
}

/// `None` from the caller accepts any entry.
fn signature_matches(entry: &Signature, requested: Option<&Signature>) -> bool {
    requested.is_none_or(|s| s == entry)
}

/// Cache of speculatively started conversation threads.
///
/// Holds at most one reservation per working directory. Every entry is
/// scoped to the permission [`Signature`] it was started under and expires
/// once the thread is older than the prewarm TTL. Consuming an entry always
/// removes it.
///
/// All map mutations happen under a single lock that is never held across an
/// await, so the cache can be shared freely between tasks.
pub struct PrewarmCache<T> {
    entries: Arc<Mutex<HashMap<String, Slot<T>>>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone + Send + Sync + 'static> PrewarmCache<T> {
    /// Create an empty cache using the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Create an empty cache with a custom clock.
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
        }
    }

    /// Install a reservation for `cwd`, replacing any previous one.
    ///
    /// A replaced reservation's start is neither awaited nor cancelled; its
    /// result is simply never observed.
    pub fn reserve(&self, cwd: &str, pending: PendingThread<T>, signature: Signature) -> EntryId {
        let id = EntryId::new();
        let slot = Slot {
            id,
            pending,
            conversation_id: None,
            created_at_seconds: None,
            signature,
        };

        let mut entries = self.entries.lock();
        if let Some(previous) = entries.insert(cwd.to_string(), slot) {
            debug!(
                cwd = %cwd,
                previous_entry = %previous.id,
                entry = %id,
                "Replacing prewarm reservation"
            );
        } else {
            trace!(cwd = %cwd, entry = %id, "Prewarm reservation installed");
        }

        id
    }

    /// Check whether `cwd` has a reservation usable under `signature`.
    ///
    /// A reservation that does not match a supplied signature, or that has
    /// gone stale, is evicted.
    pub fn has_valid(&self, cwd: &str, signature: Option<&Signature>) -> bool {
        let now = self.clock.now_seconds();
        let mut entries = self.entries.lock();

        let (matches, fresh) = match entries.get(cwd) {
            None => return false,
            Some(slot) => (
                signature_matches(&slot.signature, signature),
                is_fresh(slot.created_at_seconds, now),
            ),
        };

        if !matches {
            debug!(cwd = %cwd, "Prewarm signature mismatch, evicting");
            entries.remove(cwd);
            return false;
        }
        if !fresh {
            debug!(cwd = %cwd, "Prewarmed thread is stale, evicting");
            entries.remove(cwd);
            return false;
        }

        true
    }

    /// Record the started thread's id and creation time on the current reservation.
    ///
    /// Does nothing if `cwd` has no reservation.
    pub fn update_metadata(
        &self,
        cwd: &str,
        conversation_id: impl Into<String>,
        created_at_seconds: i64,
    ) {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get_mut(cwd) {
            slot.conversation_id = Some(conversation_id.into());
            slot.created_at_seconds = Some(created_at_seconds);
        }
    }

    /// Like [`update_metadata`](Self::update_metadata), but only if `cwd` still
    /// holds reservation `id`. Returns whether the reservation was updated.
    pub fn update_entry_metadata(
        &self,
        cwd: &str,
        id: EntryId,
        conversation_id: impl Into<String>,
        created_at_seconds: i64,
    ) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(cwd) {
            Some(slot) if slot.id == id => {
                slot.conversation_id = Some(conversation_id.into());
                slot.created_at_seconds = Some(created_at_seconds);
                true
            }
            _ => false,
        }
    }

    /// Take the prewarmed thread for `cwd` if it is usable under `signature`.
    ///
    /// The reservation is removed whatever the outcome. When the start is
    /// still running this waits for it, then re-validates: if the reservation
    /// was replaced, cleared or invalidated in the meantime the thread is not
    /// handed out. A failed start yields `None`.
    pub async fn consume(&self, cwd: &str, signature: Option<&Signature>) -> Option<T> {
        let now = self.clock.now_seconds();

        let (id, pending) = {
            let mut entries = self.entries.lock();
            let (id, pending, fresh, matches) = match entries.get(cwd) {
                None => return None,
                Some(slot) => (
                    slot.id,
                    slot.pending.clone(),
                    is_fresh(slot.created_at_seconds, now),
                    signature_matches(&slot.signature, signature),
                ),
            };

            if !fresh {
                debug!(cwd = %cwd, entry = %id, "Prewarmed thread is stale, discarding");
                entries.remove(cwd);
                return None;
            }
            if !matches {
                debug!(cwd = %cwd, entry = %id, "Prewarm signature mismatch, discarding");
                entries.remove(cwd);
                return None;
            }

            (id, pending)
        };

        let result = pending.wait().await;

        let mut entries = self.entries.lock();
        let matches = match entries.get(cwd) {
            Some(slot) if slot.id == id => signature_matches(&slot.signature, signature),
            _ => {
                debug!(
                    cwd = %cwd,
                    entry = %id,
                    "Prewarm reservation changed while waiting, discarding thread"
                );
                return None;
            }
        };
        entries.remove(cwd);
        drop(entries);

        if !matches {
            debug!(cwd = %cwd, entry = %id, "Prewarm signature mismatch after wait, discarding");
            return None;
        }

        match result {
            Ok(thread) => {
                trace!(cwd = %cwd, entry = %id, "Prewarmed thread consumed");
                Some(thread)
            }
            Err(e) => {
                debug!(cwd = %cwd, entry = %id, error = %e, "Prewarmed thread failed to start");
                None
            }
        }
    }

    /// Remove the reservation for `cwd`, whatever it is.
    pub fn clear(&self, cwd: &str) {
        if self.entries.lock().remove(cwd).is_some() {
            trace!(cwd = %cwd, "Prewarm reservation cleared");
        }
    }

    /// Remove the reservation for `cwd` only if it is still `id`.
    ///
    /// Returns whether anything was removed.
    pub fn clear_entry(&self, cwd: &str, id: EntryId) -> bool {
        let mut entries = self.entries.lock();
        if entries.get(cwd).is_some_and(|slot| slot.id == id) {
            entries.remove(cwd);
            trace!(cwd = %cwd, entry = %id, "Prewarm reservation cleared");
            true
        } else {
            false
        }
    }

    /// Whether `conversation_id` belongs to a thread currently held by the cache.
    pub fn is_tracked_conversation(&self, conversation_id: &str) -> bool {
        self.entries
            .lock()
            .values()
            .any(|slot| slot.conversation_id.as_deref() == Some(conversation_id))
    }

    /// Whether `cwd` has a reservation, valid or not.
    pub fn contains(&self, cwd: &str) -> bool {
        self.entries.lock().contains_key(cwd)
    }

    /// Snapshot of the reservation for `cwd` without validating it.
    pub fn peek_entry(&self, cwd: &str) -> Option<CacheEntry> {
        self.entries.lock().get(cwd).map(|slot| CacheEntry {
            id: slot.id,
            cwd: cwd.to_string(),
            conversation_id: slot.conversation_id.clone(),
            created_at_seconds: slot.created_at_seconds,
            signature: slot.signature.clone(),
            resolved: slot.pending.is_resolved(),
        })
    }

    /// Number of reservations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the cache has no reservations.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let now = self.clock.now_seconds();
        CacheStats {
            size: entries.len(),
            in_flight: entries
                .values()
                .filter(|slot| !slot.pending.is_resolved())
                .count(),
            stale: entries
                .values()
                .filter(|slot| !is_fresh(slot.created_at_seconds, now))
                .count(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for PrewarmCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PrewarmCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of reservations.
    pub size: usize,

    /// Reservations whose start result has not been observed yet.
    pub in_flight: usize,

    /// Reservations that would be discarded on their next read.
    pub stale: usize,
}
