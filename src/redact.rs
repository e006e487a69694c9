//! Attribute redaction applied before persistence
//!
//! The policy is default-allow: a key on the allow-list always passes;
//! otherwise the lowercased key is dropped when it contains a denied
//! substring, and retained when it does not. Keys outside the
//! allow-list are NOT dropped by default.

use crate::types::{AttributeValue, Event};
use std::collections::HashMap;

/// Well-known telemetry keys that always pass through unchanged
pub const DEFAULT_ALLOWED_KEYS: &[&str] = &[
    "cpuLoad",
    "threshold",
    "consecutiveCount",
    "memoryUsed",
    "memoryAvailable",
    "memoryThreshold",
    "durationSeconds",
    "changeCount",
    "windowSeconds",
    "tlsFailureCount",
    "failureCount",
    "requestCount",
    "avgResponseMs",
    "destination",
    "hitCount",
    "interface",
    "connected",
    "expensive",
    "constrained",
];

/// Substrings that flag a key as sensitive (matched on the lowercased key)
pub const DENIED_SUBSTRINGS: &[&str] =
    &["password", "token", "secret", "key", "auth", "credential"];

/// Pure filter over event attribute maps
#[derive(Debug, Clone)]
pub struct Redactor {
    allowed: Vec<String>,
    denied: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            allowed: DEFAULT_ALLOWED_KEYS.iter().map(|s| s.to_string()).collect(),
            denied: DENIED_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Redactor {
    /// Build a redactor with custom allow/deny lists (deny entries are
    /// matched as lowercase substrings)
    pub fn new(allowed: Vec<String>, denied: Vec<String>) -> Self {
        Self {
            allowed,
            denied: denied.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Whether a single key survives redaction
    pub fn retains(&self, key: &str) -> bool {
        if self.allowed.iter().any(|a| a == key) {
            return true;
        }
        let lowered = key.to_lowercase();
        !self.denied.iter().any(|d| lowered.contains(d))
    }

    /// Filter an attribute map, dropping sensitive keys
    pub fn redact(
        &self,
        attributes: HashMap<String, AttributeValue>,
    ) -> HashMap<String, AttributeValue> {
        attributes
            .into_iter()
            .filter(|(key, _)| {
                let keep = self.retains(key);
                if !keep {
                    tracing::debug!(key = %key, "Attribute redacted");
                }
                keep
            })
            .collect()
    }

    /// Redact an event's attributes in place, returning the event
    pub fn redact_event(&self, mut event: Event) -> Event {
        event.attributes = self.redact(event.attributes);
        event
    }
}
