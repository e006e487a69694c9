//! # vigil
//!
//! On-device anomaly detection with a tamper-evident, encrypted
//! evidence ledger and batch upload.
//!
//! ## Overview
//!
//! `vigil` turns periodic device/network telemetry snapshots into
//! security-relevant, locally encrypted records and relays them to a
//! remote collector under backpressure and retry discipline:
//!
//! snapshot → rule engine (sliding windows + cooldowns) → redaction →
//! AES-256-GCM → evidence ledger (SQLite) → batch uploader.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil::{
//!     EvidenceLedger, EventCipher, HttpUploadClient, MonitorConfig, Redactor, RuleEngine,
//!     Snapshot, Uploader, UploaderConfig,
//! };
//!
//! # async fn example() -> vigil::Result<()> {
//! let config = MonitorConfig::default();
//! let cipher = EventCipher::open_default()?;
//! let ledger = Arc::new(EvidenceLedger::open(
//!     std::path::Path::new("evidence.db"),
//!     cipher,
//!     Redactor::default(),
//! )?);
//!
//! // Evaluate one snapshot and persist whatever fires
//! let engine = RuleEngine::with_default_rules("device-1", &config);
//! let snapshot = Snapshot::baseline(1_700_000_000.0);
//! for event in engine.evaluate(&snapshot) {
//!     ledger.append(&event).await?;
//! }
//!
//! // Relay pending evidence with backpressure and backoff
//! let client = Arc::new(HttpUploadClient::new("https://collector.example/v1/events", None));
//! let uploader = Uploader::new(ledger, client, UploaderConfig::from_config(&config));
//! uploader.start();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **RuleEngine** — ordered rule list, owned sequence counter, quiet mode
//! - **RuleContext** — shared sliding-window and cooldown state
//! - **Redactor** — attribute filter applied before persistence
//! - **EventCipher** — persistent key, authenticated encryption of whole events
//! - **EvidenceLedger** — serialized, indexed SQLite store with an operator read surface
//! - **Uploader** — periodic batch sender with backpressure and exponential backoff
//! - **Monitor** — the snapshot-evaluation loop over an external [`SnapshotSource`]
//!
//! The ledger is the only resource shared between the two periodic
//! loops; its internal serialization makes producer/consumer
//! interleaving safe without caller-side locking.

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod monitor;
pub mod redact;
pub mod rules;
pub mod types;
pub mod uploader;

// Re-export core types
pub use config::{ConfigStatus, MonitorConfig, SignedConfig};
pub use crypto::EventCipher;
pub use engine::RuleEngine;
pub use error::{Result, VigilError};
pub use ledger::{
    ColumnInfo, EventQuery, EvidenceLedger, QueryOutput, SeverityCategoryCount, StoredEvent,
};
pub use monitor::{Monitor, SnapshotSource};
pub use redact::{Redactor, DEFAULT_ALLOWED_KEYS, DENIED_SUBSTRINGS};
pub use rules::{
    ConnectivityFlapRule, DestinationAllowlistRule, HighCpuRule, MemoryPressureRule, Rule,
    RuleContext, TlsFailureRule,
};
pub use types::{
    AttributeValue, BatteryState, Category, Connectivity, Event, InterfaceKind, NetworkSummary,
    Severity, Snapshot, ThermalState,
};
pub use uploader::{HttpUploadClient, UploadClient, Uploader, UploaderConfig, SIGNATURE_HEADER};
