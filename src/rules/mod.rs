//! Rule evaluation: stateless policies over shared window state
//!
//! Rules consult the [`RuleContext`] and one snapshot to decide whether
//! to emit events. Every rule checks its cooldown gate first and emits
//! at most one candidate event per evaluation pass.

mod builtin;
mod context;

pub use builtin::{
    ConnectivityFlapRule, DestinationAllowlistRule, HighCpuRule, MemoryPressureRule,
    TlsFailureRule,
};
pub use context::RuleContext;

use crate::types::{Event, Snapshot};

/// A detection policy evaluated against every snapshot
///
/// `sequence` is drawn by the engine once per invocation, whether or
/// not the rule emits — gaps in persisted sequence numbers are
/// expected.
pub trait Rule: Send + Sync {
    /// Stable rule name, used as the event `source`
    fn name(&self) -> &'static str;

    /// Evaluate one snapshot, returning zero or one candidate events
    fn evaluate(
        &self,
        snapshot: &Snapshot,
        ctx: &RuleContext,
        device_id: &str,
        sequence: u64,
    ) -> Vec<Event>;
}
