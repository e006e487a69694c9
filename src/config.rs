//! Monitor configuration consumed by the core pipeline
//!
//! Loading and layering (default/managed/remote) happen outside this
//! crate; these are the fields the core reads, with their documented
//! defaults. Remote configuration arrives signed and is applied only
//! after HMAC verification — see [`SignedConfig`].

use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Per-rule thresholds and pipeline tuning consumed by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Telemetry sampling interval, seconds
    pub sample_interval_secs: u64,

    /// Scheduled upload interval, seconds
    pub upload_interval_secs: u64,

    /// Backpressure ceiling: pending events beyond this fail the cycle
    pub max_pending_events: u64,

    /// Uploaded events older than this are pruned
    pub retention_days: u32,

    /// Normalized CPU load threshold (0.0–1.0)
    pub cpu_threshold: f64,

    /// Consecutive over-threshold samples before a CPU event
    pub cpu_consecutive_limit: usize,

    /// Memory-in-use threshold, bytes
    pub memory_threshold_bytes: u64,

    /// Sustained-pressure duration before a memory event, seconds
    pub memory_duration_secs: f64,

    /// Connectivity changes per minute before a flap event
    pub flap_changes_per_minute: usize,

    /// TLS failures within the window before an event
    pub tls_failure_count: usize,

    /// TLS failure window, seconds
    pub tls_failure_window_secs: f64,

    /// Destinations a device is expected to contact (exact or suffix)
    pub allowed_destinations: Vec<String>,

    /// Suppress event emission (evaluation state still accumulates)
    pub quiet_mode: bool,

    /// Remote collector endpoint; uploads are disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,

    /// HMAC-SHA256 secret for signing upload bodies and verifying
    /// signed configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            upload_interval_secs: 300,
            max_pending_events: 10_000,
            retention_days: 7,
            cpu_threshold: 0.8,
            cpu_consecutive_limit: 3,
            memory_threshold_bytes: 1_000_000_000,
            memory_duration_secs: 120.0,
            flap_changes_per_minute: 5,
            tls_failure_count: 3,
            tls_failure_window_secs: 60.0,
            allowed_destinations: Vec::new(),
            quiet_mode: false,
            upload_url: None,
            signing_secret: None,
        }
    }
}

/// Outcome of the most recent signed-configuration application attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum ConfigStatus {
    /// No signed configuration has been offered yet
    None,
    /// The last signed configuration verified and was applied
    Applied { at: f64 },
    /// The last signed configuration failed verification and was
    /// rejected wholesale; the previous configuration stayed active
    Rejected { at: f64, reason: String },
}

/// Signed remote configuration gate
///
/// Holds the active [`MonitorConfig`] and applies replacements only
/// when their HMAC-SHA256 signature (base64) verifies against the
/// shared secret. A failed verification leaves the active
/// configuration untouched and is observable via [`SignedConfig::status`].
pub struct SignedConfig {
    secret: String,
    inner: Mutex<SignedConfigInner>,
}

struct SignedConfigInner {
    active: MonitorConfig,
    status: ConfigStatus,
}

impl SignedConfig {
    /// Create a gate around an initial (locally trusted) configuration
    pub fn new(initial: MonitorConfig, secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            inner: Mutex::new(SignedConfigInner {
                active: initial,
                status: ConfigStatus::None,
            }),
        }
    }

    /// Verify and apply a signed configuration body
    ///
    /// `signature_b64` is base64(HMAC-SHA256(secret, body)). On any
    /// failure — bad encoding, bad signature, unparseable body — the
    /// previously active configuration remains in force and the
    /// rejection is recorded.
    pub fn apply_signed(&self, body: &[u8], signature_b64: &str) -> Result<()> {
        let result = self.verify_and_parse(body, signature_b64);
        let mut inner = lock_recover(&self.inner);
        match result {
            Ok(config) => {
                inner.active = config;
                inner.status = ConfigStatus::Applied {
                    at: crate::types::now_secs(),
                };
                tracing::info!("Signed configuration applied");
                Ok(())
            }
            Err(e) => {
                inner.status = ConfigStatus::Rejected {
                    at: crate::types::now_secs(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %e, "Signed configuration rejected");
                Err(e)
            }
        }
    }

    fn verify_and_parse(&self, body: &[u8], signature_b64: &str) -> Result<MonitorConfig> {
        use base64::Engine;

        let signature = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|e| VigilError::Signature(format!("invalid signature encoding: {}", e)))?;

        let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, self.secret.as_bytes());
        ring::hmac::verify(&key, body, &signature)
            .map_err(|_| VigilError::Signature("signature mismatch".to_string()))?;

        serde_json::from_slice(body)
            .map_err(|e| VigilError::Signature(format!("verified body failed to parse: {}", e)))
    }

    /// Current active configuration (a clone; the gate keeps ownership)
    pub fn active(&self) -> MonitorConfig {
        lock_recover(&self.inner).active.clone()
    }

    /// Outcome of the most recent application attempt
    pub fn status(&self) -> ConfigStatus {
        lock_recover(&self.inner).status.clone()
    }
}

/// Lock, recovering the guard on poison — the guarded state stays valid
/// across a panicked holder.
fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
