//! Core telemetry and event types
//!
//! All types use camelCase JSON serialization for wire compatibility.
//! `Snapshot` is the read-only input to rule evaluation; `Event` is the
//! immutable record that flows through redaction, encryption, and the
//! evidence ledger.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event category, mirrored in clear in the ledger for indexed queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    System,
    Performance,
    Network,
    Security,
    Connectivity,
    Battery,
    Thermal,
}

impl Category {
    /// Stable lowercase name used in the ledger's `category` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::System => "system",
            Category::Performance => "performance",
            Category::Network => "network",
            Category::Security => "security",
            Category::Connectivity => "connectivity",
            Category::Battery => "battery",
            Category::Thermal => "thermal",
        }
    }
}

/// Event severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Stable lowercase name used in the ledger's `severity` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// Heterogeneous attribute value — an explicit sum type, not a
/// dynamically-typed dictionary
///
/// The `untagged` representation keeps the wire format plain JSON:
/// `{"cpuLoad": 0.93, "consecutiveCount": 3}`. Integers that fit in
/// 32 bits deserialize as `Int`; wider ones as `Int64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Str(String),
    Int(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
    Array(Vec<AttributeValue>),
    Map(HashMap<String, AttributeValue>),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int64(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// A single detected condition or observation
///
/// Immutable once created; only the ledger-side `uploaded` flag ever
/// changes after persistence, and that lives outside this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// Device this event was observed on
    pub device_id: String,

    /// Unix timestamp in seconds (fractional)
    pub timestamp: f64,

    /// Top-level category for grouping and indexed queries
    pub category: Category,

    /// Severity of the detected condition
    pub severity: Severity,

    /// Human-readable event name (e.g., "High CPU Usage Detected")
    pub name: String,

    /// Typed attribute map; redacted before persistence
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,

    /// Rule or collector that produced this event
    pub source: String,

    /// Per-engine monotonic sequence number, issued per rule invocation
    pub sequence_number: u64,
}

impl Event {
    /// Create a new event with an auto-generated id and the current
    /// wall-clock timestamp
    pub fn new(
        device_id: impl Into<String>,
        category: Category,
        severity: Severity,
        name: impl Into<String>,
        source: impl Into<String>,
        sequence_number: u64,
    ) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            device_id: device_id.into(),
            timestamp: now_secs(),
            category,
            severity,
            name: name.into(),
            attributes: HashMap::new(),
            source: source.into(),
            sequence_number,
        }
    }

    /// Override the timestamp (rules stamp events with the snapshot time)
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add an attribute entry
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Thermal pressure reading carried by a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// Battery charging state carried by a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryState {
    Unknown,
    Unplugged,
    Charging,
    Full,
}

/// Active network interface kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Wifi,
    Cellular,
    Wired,
    Loopback,
    Other,
}

/// Connectivity summary carried by a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    /// Whether the device currently has a usable path
    pub connected: bool,

    /// Metered/expensive path (e.g., cellular data)
    pub expensive: bool,

    /// Constrained path (e.g., Low Data Mode)
    pub constrained: bool,

    /// Interface serving the current path
    pub interface: InterfaceKind,

    /// Unix timestamp of the last connectivity change
    pub last_change: f64,
}

/// Aggregated network activity since the previous snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    /// Requests issued
    pub request_count: u64,

    /// Requests that completed successfully
    pub success_count: u64,

    /// Requests that failed
    pub failure_count: u64,

    /// Average response time in milliseconds
    pub avg_response_ms: f64,

    /// TLS handshake/verification failures observed
    pub tls_failure_count: u64,

    /// Hostnames recently contacted, most recent last
    #[serde(default)]
    pub recent_destinations: Vec<String>,
}

/// One point-in-time telemetry reading fed into rule evaluation
///
/// Produced externally, consumed read-only, discarded after one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Unix timestamp in seconds (fractional); also the reference time
    /// for sliding-window eviction
    pub timestamp: f64,

    /// Normalized CPU load in 0.0–1.0
    pub cpu_load: f64,

    /// Memory in use, bytes
    pub memory_used: u64,

    /// Memory still available, bytes (if the platform reports it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_available: Option<u64>,

    /// Thermal pressure
    pub thermal: ThermalState,

    /// Battery charging state
    pub battery: BatteryState,

    /// Connectivity summary
    pub connectivity: Connectivity,

    /// Network activity summary, when the network sampler ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSummary>,
}

impl Snapshot {
    /// Build a quiescent snapshot at the given time — connected wifi,
    /// idle CPU, no network summary. Rules and tests adjust from here.
    pub fn baseline(timestamp: f64) -> Self {
        Self {
            timestamp,
            cpu_load: 0.0,
            memory_used: 0,
            memory_available: None,
            thermal: ThermalState::Nominal,
            battery: BatteryState::Unknown,
            connectivity: Connectivity {
                connected: true,
                expensive: false,
                constrained: false,
                interface: InterfaceKind::Wifi,
                last_change: timestamp,
            },
            network: None,
        }
    }
}

/// Current time in Unix seconds
pub(crate) fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
