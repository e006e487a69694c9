//! The built-in detection rules

use super::context::RuleContext;
use super::Rule;
use crate::config::MonitorConfig;
use crate::types::{Category, Event, Severity, Snapshot};
use std::time::Duration;

/// Cooldown applied by every built-in rule after it fires
const RULE_COOLDOWN: Duration = Duration::from_secs(300);

/// Sustained high CPU load
///
/// Counts consecutive over-threshold samples in a 300 s window; a dip
/// below the threshold resets the streak.
pub struct HighCpuRule {
    pub threshold: f64,
    pub consecutive_limit: usize,
}

const HIGH_CPU_KEY: &str = "high_cpu";
const HIGH_CPU_WINDOW_SECS: f64 = 300.0;

impl HighCpuRule {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            threshold: config.cpu_threshold,
            consecutive_limit: config.cpu_consecutive_limit,
        }
    }
}

impl Default for HighCpuRule {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            consecutive_limit: 3,
        }
    }
}

impl Rule for HighCpuRule {
    fn name(&self) -> &'static str {
        "rule.high_cpu"
    }

    fn evaluate(
        &self,
        snapshot: &Snapshot,
        ctx: &RuleContext,
        device_id: &str,
        sequence: u64,
    ) -> Vec<Event> {
        if ctx.is_in_cooldown(HIGH_CPU_KEY, RULE_COOLDOWN) {
            return Vec::new();
        }

        if snapshot.cpu_load >= self.threshold {
            ctx.add_to_window(HIGH_CPU_KEY, snapshot.timestamp, HIGH_CPU_WINDOW_SECS);
            let count = ctx.window_count(HIGH_CPU_KEY);
            if count >= self.consecutive_limit {
                ctx.set_cooldown(HIGH_CPU_KEY, RULE_COOLDOWN);
                ctx.clear_window(HIGH_CPU_KEY);
                return vec![Event::new(
                    device_id,
                    Category::Performance,
                    Severity::Warning,
                    "High CPU Usage Detected",
                    self.name(),
                    sequence,
                )
                .at(snapshot.timestamp)
                .with_attribute("cpuLoad", snapshot.cpu_load)
                .with_attribute("threshold", self.threshold)
                .with_attribute("consecutiveCount", count as i32)];
            }
        } else {
            // Streak broken
            ctx.clear_window(HIGH_CPU_KEY);
        }
        Vec::new()
    }
}

/// Sustained memory pressure
///
/// Window count is converted to elapsed time using a fixed 30 s
/// cadence, independent of the configured sampling interval.
pub struct MemoryPressureRule {
    pub threshold_bytes: u64,
    pub duration_secs: f64,
}

const MEMORY_KEY: &str = "memory_pressure";
const ASSUMED_SAMPLE_INTERVAL_SECS: f64 = 30.0;

impl MemoryPressureRule {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            threshold_bytes: config.memory_threshold_bytes,
            duration_secs: config.memory_duration_secs,
        }
    }
}

impl Default for MemoryPressureRule {
    fn default() -> Self {
        Self {
            threshold_bytes: 1_000_000_000,
            duration_secs: 120.0,
        }
    }
}

impl Rule for MemoryPressureRule {
    fn name(&self) -> &'static str {
        "rule.memory_pressure"
    }

    fn evaluate(
        &self,
        snapshot: &Snapshot,
        ctx: &RuleContext,
        device_id: &str,
        sequence: u64,
    ) -> Vec<Event> {
        if ctx.is_in_cooldown(MEMORY_KEY, RULE_COOLDOWN) {
            return Vec::new();
        }

        if snapshot.memory_used >= self.threshold_bytes {
            ctx.add_to_window(MEMORY_KEY, snapshot.timestamp, self.duration_secs);
            let count = ctx.window_count(MEMORY_KEY);
            if count as f64 * ASSUMED_SAMPLE_INTERVAL_SECS >= self.duration_secs {
                ctx.set_cooldown(MEMORY_KEY, RULE_COOLDOWN);
                ctx.clear_window(MEMORY_KEY);
                return vec![Event::new(
                    device_id,
                    Category::Performance,
                    Severity::Warning,
                    "Sustained Memory Pressure",
                    self.name(),
                    sequence,
                )
                .at(snapshot.timestamp)
                .with_attribute("memoryUsed", snapshot.memory_used as i64)
                .with_attribute("memoryThreshold", self.threshold_bytes as i64)
                .with_attribute("durationSeconds", self.duration_secs)];
            }
        } else {
            ctx.clear_window(MEMORY_KEY);
        }
        Vec::new()
    }
}

/// Rapid connectivity changes
///
/// Each pass records the current connect/disconnect state into one of
/// two 60 s windows; the summed count across both windows triggers.
pub struct ConnectivityFlapRule {
    pub changes_per_minute: usize,
}

const FLAP_COOLDOWN_KEY: &str = "connectivity_flap";
const FLAP_CONNECTED_KEY: &str = "connectivity_flap:connected";
const FLAP_DISCONNECTED_KEY: &str = "connectivity_flap:disconnected";
const FLAP_WINDOW_SECS: f64 = 60.0;

impl ConnectivityFlapRule {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            changes_per_minute: config.flap_changes_per_minute,
        }
    }
}

impl Default for ConnectivityFlapRule {
    fn default() -> Self {
        Self {
            changes_per_minute: 5,
        }
    }
}

impl Rule for ConnectivityFlapRule {
    fn name(&self) -> &'static str {
        "rule.connectivity_flap"
    }

    fn evaluate(
        &self,
        snapshot: &Snapshot,
        ctx: &RuleContext,
        device_id: &str,
        sequence: u64,
    ) -> Vec<Event> {
        if ctx.is_in_cooldown(FLAP_COOLDOWN_KEY, RULE_COOLDOWN) {
            return Vec::new();
        }

        let state_key = if snapshot.connectivity.connected {
            FLAP_CONNECTED_KEY
        } else {
            FLAP_DISCONNECTED_KEY
        };
        ctx.add_to_window(state_key, snapshot.timestamp, FLAP_WINDOW_SECS);

        let total =
            ctx.window_count(FLAP_CONNECTED_KEY) + ctx.window_count(FLAP_DISCONNECTED_KEY);
        if total >= self.changes_per_minute {
            ctx.set_cooldown(FLAP_COOLDOWN_KEY, RULE_COOLDOWN);
            ctx.clear_window(FLAP_CONNECTED_KEY);
            ctx.clear_window(FLAP_DISCONNECTED_KEY);
            return vec![Event::new(
                device_id,
                Category::Connectivity,
                Severity::Warning,
                "Connectivity Flapping",
                self.name(),
                sequence,
            )
            .at(snapshot.timestamp)
            .with_attribute("changeCount", total as i32)
            .with_attribute("windowSeconds", FLAP_WINDOW_SECS)
            .with_attribute("connected", snapshot.connectivity.connected)];
        }
        Vec::new()
    }
}

/// Repeated TLS handshake/verification failures
pub struct TlsFailureRule {
    pub failure_count: usize,
    pub window_secs: f64,
}

const TLS_KEY: &str = "tls_failures";

impl TlsFailureRule {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            failure_count: config.tls_failure_count,
            window_secs: config.tls_failure_window_secs,
        }
    }
}

impl Default for TlsFailureRule {
    fn default() -> Self {
        Self {
            failure_count: 3,
            window_secs: 60.0,
        }
    }
}

impl Rule for TlsFailureRule {
    fn name(&self) -> &'static str {
        "rule.tls_failure"
    }

    fn evaluate(
        &self,
        snapshot: &Snapshot,
        ctx: &RuleContext,
        device_id: &str,
        sequence: u64,
    ) -> Vec<Event> {
        if ctx.is_in_cooldown(TLS_KEY, RULE_COOLDOWN) {
            return Vec::new();
        }

        let Some(network) = &snapshot.network else {
            return Vec::new();
        };
        if network.tls_failure_count == 0 {
            return Vec::new();
        }

        ctx.add_to_window(TLS_KEY, snapshot.timestamp, self.window_secs);
        let count = ctx.window_count(TLS_KEY);
        if count >= self.failure_count {
            ctx.set_cooldown(TLS_KEY, RULE_COOLDOWN);
            ctx.clear_window(TLS_KEY);
            return vec![Event::new(
                device_id,
                Category::Security,
                Severity::Error,
                "Repeated TLS Failures",
                self.name(),
                sequence,
            )
            .at(snapshot.timestamp)
            .with_attribute("failureCount", count as i32)
            .with_attribute("tlsFailureCount", network.tls_failure_count as i64)
            .with_attribute("windowSeconds", self.window_secs)];
        }
        Vec::new()
    }
}

/// Destinations outside the expected allowlist
///
/// Allow-list entries match exactly or as dot-separated suffixes
/// (`example.com` allows `api.example.com`). The first destination to
/// accumulate enough hits emits and ends the scan for this pass; one
/// cooldown is shared across all destinations.
pub struct DestinationAllowlistRule {
    pub allowed: Vec<String>,
    pub minimum_hits: usize,
}

const DEST_COOLDOWN_KEY: &str = "destination_allowlist";
const DEST_WINDOW_SECS: f64 = 300.0;

impl DestinationAllowlistRule {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            allowed: config.allowed_destinations.clone(),
            minimum_hits: 5,
        }
    }

    fn is_allowed(&self, destination: &str) -> bool {
        self.allowed.iter().any(|entry| {
            let entry = entry.trim_start_matches('.');
            destination == entry || destination.ends_with(&format!(".{}", entry))
        })
    }
}

impl Default for DestinationAllowlistRule {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            minimum_hits: 5,
        }
    }
}

impl Rule for DestinationAllowlistRule {
    fn name(&self) -> &'static str {
        "rule.destination_allowlist"
    }

    fn evaluate(
        &self,
        snapshot: &Snapshot,
        ctx: &RuleContext,
        device_id: &str,
        sequence: u64,
    ) -> Vec<Event> {
        if ctx.is_in_cooldown(DEST_COOLDOWN_KEY, RULE_COOLDOWN) {
            return Vec::new();
        }

        let Some(network) = &snapshot.network else {
            return Vec::new();
        };

        for destination in &network.recent_destinations {
            if self.is_allowed(destination) {
                continue;
            }
            let key = format!("destination:{}", destination);
            ctx.add_to_window(&key, snapshot.timestamp, DEST_WINDOW_SECS);
            let hits = ctx.window_count(&key);
            if hits >= self.minimum_hits {
                ctx.set_cooldown(DEST_COOLDOWN_KEY, RULE_COOLDOWN);
                return vec![Event::new(
                    device_id,
                    Category::Security,
                    Severity::Warning,
                    "Unexpected Network Destination",
                    self.name(),
                    sequence,
                )
                .at(snapshot.timestamp)
                .with_attribute("destination", destination.clone())
                .with_attribute("hitCount", hits as i32)];
            }
        }
        Vec::new()
    }
}
