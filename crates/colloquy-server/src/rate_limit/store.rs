use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::auth::UserId;

/// Counting window for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    /// Accepted requests inside the current window.
    pub count: u64,
    /// When the window expires and `count` starts over.
    pub reset_at: Instant,
}

impl RateWindow {
    /// An empty window starting at `now`.
    pub fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            reset_at: now + window,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// In-memory map of user id to [`RateWindow`].
///
/// Cloning is cheap and every clone sees the same entries. Keys are sharded
/// behind their own locks, so `update` is an atomic read-modify-write for a
/// single user while other users proceed in parallel.
#[derive(Clone, Default)]
pub struct WindowStore {
    windows: Arc<DashMap<UserId, RateWindow>>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, user: &UserId) -> Option<RateWindow> {
        self.windows.get(user).map(|entry| *entry)
    }

    #[cfg(test)]
    pub fn put(&self, user: UserId, window: RateWindow) {
        self.windows.insert(user, window);
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn delete(&self, user: &UserId) -> Option<RateWindow> {
        self.windows.remove(user).map(|(_, window)| window)
    }

    /// Run `f` against the user's window while holding its lock, creating
    /// the window with `init` if absent.
    pub fn update<T>(
        &self,
        user: &UserId,
        init: impl FnOnce() -> RateWindow,
        f: impl FnOnce(&mut RateWindow) -> T,
    ) -> T {
        let mut entry = self.windows.entry(user.clone()).or_insert_with(init);
        f(entry.value_mut())
    }

    /// Copy of every entry at the time of the call. Entries inserted while
    /// the copy is taken may or may not appear.
    pub fn snapshot(&self) -> Vec<(UserId, RateWindow)> {
        self.windows
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Delete every window that has expired at `now`. Returns the number of
    /// entries removed.
    ///
    /// Expiry is re-checked under the entry lock, so a window that was reset
    /// by a concurrent request after the snapshot is left alone.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for (user, window) in self.snapshot() {
            if !window.is_expired(now) {
                continue;
            }
            if self
                .windows
                .remove_if(&user, |_, window| window.is_expired(now))
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
