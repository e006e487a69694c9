//! Rule engine: ordered evaluation with an owned sequence counter
//!
//! The engine owns the rule list, the shared [`RuleContext`], and a
//! strictly-increasing sequence counter — explicit state on the
//! instance, not a process-wide static.

use crate::config::MonitorConfig;
use crate::rules::{
    ConnectivityFlapRule, DestinationAllowlistRule, HighCpuRule, MemoryPressureRule, Rule,
    RuleContext, TlsFailureRule,
};
use crate::types::{Event, Snapshot};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Evaluates every registered rule against each snapshot
pub struct RuleEngine {
    device_id: String,
    rules: Vec<Box<dyn Rule>>,
    context: RuleContext,
    sequence: AtomicU64,
    quiet: AtomicBool,
}

impl RuleEngine {
    /// Create an engine with an explicit rule list
    pub fn new(device_id: impl Into<String>, rules: Vec<Box<dyn Rule>>) -> Self {
        Self {
            device_id: device_id.into(),
            rules,
            context: RuleContext::new(),
            sequence: AtomicU64::new(0),
            quiet: AtomicBool::new(false),
        }
    }

    /// Create an engine with the five built-in rules configured from
    /// `config`, in their canonical registration order
    pub fn with_default_rules(device_id: impl Into<String>, config: &MonitorConfig) -> Self {
        let rules: Vec<Box<dyn Rule>> = vec![
            Box::new(HighCpuRule::from_config(config)),
            Box::new(MemoryPressureRule::from_config(config)),
            Box::new(ConnectivityFlapRule::from_config(config)),
            Box::new(TlsFailureRule::from_config(config)),
            Box::new(DestinationAllowlistRule::from_config(config)),
        ];
        let engine = Self::new(device_id, rules);
        engine.set_quiet(config.quiet_mode);
        engine
    }

    /// Evaluate one snapshot against every rule in registration order
    ///
    /// Quiet mode returns no events without touching any rule or window
    /// state; previously accumulated windows and cooldowns are retained
    /// as they are, never cleared. Every rule invocation draws a fresh
    /// sequence number whether or not it emits; gaps relative to
    /// persisted events are expected.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<Event> {
        if self.quiet.load(Ordering::Relaxed) {
            return Vec::new();
        }

        let mut events = Vec::new();
        for rule in &self.rules {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let emitted = rule.evaluate(snapshot, &self.context, &self.device_id, sequence);
            if !emitted.is_empty() {
                tracing::info!(
                    rule = rule.name(),
                    count = emitted.len(),
                    seq = sequence,
                    "Rule emitted events"
                );
            }
            events.extend(emitted);
        }
        events
    }

    /// Toggle quiet mode; affects subsequent evaluations only
    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
    }

    /// Whether emission is currently suppressed
    pub fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }

    /// The shared window/cooldown state (exposed for diagnostics)
    pub fn context(&self) -> &RuleContext {
        &self.context
    }

    /// Sequence number the next rule invocation will receive
    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
