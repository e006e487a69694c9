//! Shared sliding-window and cooldown state for rule evaluation
//!
//! Windows and cooldowns run on different clocks: window eviction is
//! keyed to the snapshot timestamp being inserted, while cooldown
//! expiry is keyed to wall-clock time. Replayed or out-of-order
//! snapshots therefore throttle inconsistently between the two — this
//! mismatch is part of the observable behavior and is kept as is.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct ContextInner {
    /// Per-key ordered timestamps, bounded by the window size at insert
    windows: HashMap<String, Vec<f64>>,

    /// Per-key wall-clock expiry instants
    cooldowns: HashMap<String, Instant>,
}

/// Window and cooldown state keyed by rule + signal identity
///
/// All operations execute atomically relative to each other; concurrent
/// rule evaluations against the same key never interleave partially.
pub struct RuleContext {
    inner: Mutex<ContextInner>,
}

impl Default for RuleContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleContext {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ContextInner {
                windows: HashMap::new(),
                cooldowns: HashMap::new(),
            }),
        }
    }

    /// Append `timestamp` to the key's window and evict entries strictly
    /// older than `timestamp - window_secs`
    ///
    /// The eviction reference is the timestamp just inserted, not the
    /// current wall time.
    pub fn add_to_window(&self, key: &str, timestamp: f64, window_secs: f64) {
        let mut inner = self.lock();
        let window = inner.windows.entry(key.to_string()).or_default();
        window.push(timestamp);
        let cutoff = timestamp - window_secs;
        window.retain(|t| *t >= cutoff);
    }

    /// Number of timestamps currently in the key's window
    pub fn window_count(&self, key: &str) -> usize {
        self.lock().windows.get(key).map_or(0, |w| w.len())
    }

    /// Drop the key's window entirely
    pub fn clear_window(&self, key: &str) {
        self.lock().windows.remove(key);
    }

    /// Record a cooldown expiring `duration` from now (wall clock)
    pub fn set_cooldown(&self, key: &str, duration: Duration) {
        self.lock()
            .cooldowns
            .insert(key.to_string(), Instant::now() + duration);
    }

    /// Whether the key is still cooling down
    ///
    /// `duration` mirrors the `set_cooldown` call site; the stored
    /// expiry is authoritative. An expired record lazily self-clears.
    pub fn is_in_cooldown(&self, key: &str, _duration: Duration) -> bool {
        let mut inner = self.lock();
        match inner.cooldowns.get(key) {
            Some(expiry) if Instant::now() < *expiry => true,
            Some(_) => {
                inner.cooldowns.remove(key);
                false
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ContextInner> {
        // A poisoned lock still holds valid window data
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
