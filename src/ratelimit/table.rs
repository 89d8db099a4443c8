//! Key to entry registry and the public limiter operations.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::entry::{instant_after, Decision, EntrySnapshot, LimitEntry, Quota};
use crate::error::{LimiterError, Result};

/// Registry of independent per-key rate limits.
///
/// The table lock guards only which keys exist. It is released before any
/// quota decision, so operations on different keys never contend beyond a
/// map lookup. Each entry serializes access to its own key. Entries are
/// never removed once created.
///
/// Construct one table and share it, typically as `Arc<LimiterTable>`.
pub struct LimiterTable<K = String> {
    /// Limit entries indexed by key
    entries: Mutex<HashMap<K, Arc<LimitEntry>>>,
}

impl<K: Eq + Hash> LimiterTable<K> {
    /// Create an empty table. Every key is unlimited until configured.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup<Q>(&self, key: &Q) -> Option<Arc<LimitEntry>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().get(key).cloned()
    }

    /// Set the quota for `key`.
    ///
    /// A new key starts with an already expired window, so its next use opens
    /// a fresh one. An existing key keeps its current uses and expiry; the
    /// new ceiling applies immediately and the new recovery from the next
    /// rollover. Values are not validated: `max_uses == 0` grants only the
    /// use that opens each window, and a zero `recovery` expires every window
    /// immediately.
    pub fn configure<Q>(&self, key: &Q, max_uses: u64, recovery: Duration)
    where
        K: Borrow<Q>,
        Q: ToOwned<Owned = K> + Hash + Eq + Debug + ?Sized,
    {
        let quota = Quota::new(max_uses, recovery);

        let existing = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) => Arc::clone(entry),
                None => {
                    entries.insert(key.to_owned(), Arc::new(LimitEntry::new(quota)));
                    debug!(
                        key = ?key,
                        max_uses = max_uses,
                        recovery = ?recovery,
                        "Creating new limit entry"
                    );
                    return;
                }
            }
        };

        existing.reconfigure(quota);
        debug!(
            key = ?key,
            max_uses = max_uses,
            recovery = ?recovery,
            "Reconfigured limit entry"
        );
    }

    /// Try to consume one use of `key` without blocking.
    ///
    /// Returns `true` for keys that were never configured.
    pub fn check_allowed<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let Some(entry) = self.lookup(key) else {
            trace!(key = ?key, "No limit configured");
            return true;
        };

        match entry.try_consume() {
            Decision::Allowed => {
                trace!(key = ?key, "Use allowed");
                true
            }
            Decision::Denied { retry_after } => {
                debug!(key = ?key, retry_after = ?retry_after, "Rate limit exceeded");
                false
            }
        }
    }

    /// Block the current thread until one use of `key` is consumed.
    ///
    /// Returns immediately for keys that were never configured. There is no
    /// way to abandon the wait; see [`Self::wait_until_allowed_deadline`].
    pub fn wait_until_allowed<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        if let Some(entry) = self.lookup(key) {
            wait_blocking(&entry, key);
        }
    }

    /// Consume one use of `key`, creating the key on first touch.
    ///
    /// An unknown key is created with `max_uses`/`recovery` and its first use
    /// already consumed, and the call returns at once. A known key behaves
    /// exactly like [`Self::wait_until_allowed`]; the arguments are ignored
    /// and the stored quota governs.
    pub fn wait_or_configure<Q>(&self, key: &Q, max_uses: u64, recovery: Duration)
    where
        K: Borrow<Q>,
        Q: ToOwned<Owned = K> + Hash + Eq + Debug + ?Sized,
    {
        if let Some(entry) = self.get_or_create_consumed(key, Quota::new(max_uses, recovery)) {
            wait_blocking(&entry, key);
        }
    }

    /// Like [`Self::wait_until_allowed`], but give up once the next window
    /// would open after `deadline`.
    ///
    /// The deadline is checked before sleeping, so a wait that cannot succeed
    /// in time fails without blocking.
    pub fn wait_until_allowed_deadline<Q>(&self, key: &Q, deadline: Instant) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let Some(entry) = self.lookup(key) else {
            return Ok(());
        };

        loop {
            match entry.try_consume() {
                Decision::Allowed => return Ok(()),
                Decision::Denied { retry_after } => {
                    match Instant::now().checked_add(retry_after) {
                        Some(wake) if wake <= deadline => {
                            trace!(key = ?key, retry_after = ?retry_after, "Waiting for window");
                            thread::sleep(retry_after);
                        }
                        _ => {
                            debug!(
                                key = ?key,
                                retry_after = ?retry_after,
                                "Wait deadline exceeded"
                            );
                            return Err(LimiterError::DeadlineExceeded { retry_after });
                        }
                    }
                }
            }
        }
    }

    /// [`Self::wait_until_allowed_deadline`] with a deadline `timeout` from now.
    pub fn wait_until_allowed_timeout<Q>(&self, key: &Q, timeout: Duration) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        self.wait_until_allowed_deadline(key, instant_after(Instant::now(), timeout))
    }

    /// Async form of [`Self::wait_until_allowed`] that sleeps on the tokio
    /// timer instead of blocking the thread.
    ///
    /// Dropping the future abandons the wait without consuming anything, so
    /// it composes with `tokio::time::timeout` and `tokio::select!`.
    pub async fn wait_until_allowed_async<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        if let Some(entry) = self.lookup(key) {
            wait_async(&entry, key).await;
        }
    }

    /// Async form of [`Self::wait_or_configure`].
    pub async fn wait_or_configure_async<Q>(&self, key: &Q, max_uses: u64, recovery: Duration)
    where
        K: Borrow<Q>,
        Q: ToOwned<Owned = K> + Hash + Eq + Debug + ?Sized,
    {
        if let Some(entry) = self.get_or_create_consumed(key, Quota::new(max_uses, recovery)) {
            wait_async(&entry, key).await;
        }
    }

    /// Return the existing entry, or create one with its first use consumed
    /// and return `None`.
    fn get_or_create_consumed<Q>(&self, key: &Q, quota: Quota) -> Option<Arc<LimitEntry>>
    where
        K: Borrow<Q>,
        Q: ToOwned<Owned = K> + Hash + Eq + Debug + ?Sized,
    {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            return Some(Arc::clone(entry));
        }

        entries.insert(key.to_owned(), Arc::new(LimitEntry::consumed(quota)));
        debug!(
            key = ?key,
            max_uses = quota.max_uses,
            recovery = ?quota.recovery,
            "Creating limit entry on first use"
        );
        None
    }

    /// Get the quota configured for `key`.
    pub fn quota<Q>(&self, key: &Q) -> Option<Quota>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lookup(key).map(|entry| entry.quota())
    }

    /// Describe the current window of `key` without consuming a use.
    ///
    /// Returns `None` if the key was never configured.
    pub fn snapshot<Q>(&self, key: &Q) -> Option<EntrySnapshot>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lookup(key).map(|entry| entry.snapshot())
    }

    /// Check whether `key` has an entry.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().contains_key(key)
    }

    /// Get the number of configured keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check whether no key has been configured yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: Eq + Hash> Default for LimiterTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `entry` until a use is consumed, sleeping out the window between
/// attempts. Neither lock is held while sleeping.
fn wait_blocking<Q: Debug + ?Sized>(entry: &LimitEntry, key: &Q) {
    while let Decision::Denied { retry_after } = entry.try_consume() {
        trace!(key = ?key, retry_after = ?retry_after, "Waiting for window");
        thread::sleep(retry_after);
    }
}

async fn wait_async<Q: Debug + ?Sized>(entry: &LimitEntry, key: &Q) {
    while let Decision::Denied { retry_after } = entry.try_consume() {
        trace!(key = ?key, retry_after = ?retry_after, "Waiting for window");
        tokio::time::sleep(retry_after).await;
    }
}
