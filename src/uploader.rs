//! Batch uploader: periodic relay of pending evidence to a collector
//!
//! One upload cycle is shared by the scheduled loop and the manual
//! trigger: check backpressure, fetch the oldest pending batch, hand it
//! to the client, and mark the returned ids uploaded. The scheduled
//! loop absorbs failures into exponential backoff; `upload_now`
//! propagates them to the caller and never touches the loop's backoff.
//!
//! Delivery is at-least-once: events are keyed by stable ids and the
//! collector is expected to deduplicate re-delivery.

use crate::error::{Result, VigilError};
use crate::ledger::EvidenceLedger;
use crate::types::Event;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Events fetched per upload cycle
const UPLOAD_BATCH_SIZE: usize = 100;

/// Header carrying the base64 HMAC-SHA256 signature of the request body
pub const SIGNATURE_HEADER: &str = "x-vigil-signature";

/// Transport seam for batch delivery
///
/// The returned ids are what gets marked uploaded — the client's own
/// return value is authoritative, not the collector's response body.
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// Deliver one batch, returning the ids to mark uploaded
    async fn upload(&self, events: &[Event]) -> Result<Vec<String>>;
}

/// HTTP batch client: JSON array body, optional HMAC body signature,
/// any 2xx status is success
pub struct HttpUploadClient {
    client: reqwest::Client,
    endpoint: String,
    signing_secret: Option<String>,
}

impl HttpUploadClient {
    pub fn new(endpoint: impl Into<String>, signing_secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            signing_secret,
        }
    }
}

/// base64(HMAC-SHA256(secret, body))
fn sign_body(secret: &str, body: &[u8]) -> String {
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret.as_bytes());
    let tag = ring::hmac::sign(&key, body);
    BASE64.encode(tag.as_ref())
}

#[async_trait]
impl UploadClient for HttpUploadClient {
    async fn upload(&self, events: &[Event]) -> Result<Vec<String>> {
        let body = serde_json::to_vec(events)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.signing_secret {
            request = request.header(SIGNATURE_HEADER, sign_body(secret, &body));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| VigilError::Upload(format!("request to collector failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VigilError::Upload(format!(
                "collector returned {}",
                status
            )));
        }

        Ok(events.iter().map(|e| e.id.clone()).collect())
    }
}

/// Uploader pacing and backpressure limits
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Sleep between successful cycles
    pub upload_interval: Duration,

    /// Pending-event ceiling; cycles fail with backpressure beyond it
    pub max_pending_events: u64,

    /// First retry delay after a failed cycle
    pub base_backoff: Duration,

    /// Retry delay ceiling (retries are unbounded in count)
    pub max_backoff: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            upload_interval: Duration::from_secs(300),
            max_pending_events: 10_000,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl UploaderConfig {
    pub fn from_config(config: &crate::config::MonitorConfig) -> Self {
        Self {
            upload_interval: Duration::from_secs(config.upload_interval_secs),
            max_pending_events: config.max_pending_events,
            ..Default::default()
        }
    }
}

/// Periodic batch sender with backpressure and exponential backoff
pub struct Uploader {
    ledger: Arc<EvidenceLedger>,
    client: Arc<dyn UploadClient>,
    config: UploaderConfig,
    task: Mutex<UploaderTask>,
}

struct UploaderTask {
    handle: Option<JoinHandle<()>>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Uploader {
    pub fn new(
        ledger: Arc<EvidenceLedger>,
        client: Arc<dyn UploadClient>,
        config: UploaderConfig,
    ) -> Self {
        Self {
            ledger,
            client,
            config,
            task: Mutex::new(UploaderTask {
                handle: None,
                stop_tx: None,
            }),
        }
    }

    /// Start the scheduled loop; returns false (no-op) if it is already
    /// running. Backoff restarts from the base delay on every start.
    pub fn start(&self) -> bool {
        let mut task = lock_recover(&self.task);
        if task
            .handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
        {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let ledger = Arc::clone(&self.ledger);
        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        task.handle = Some(tokio::spawn(async move {
            run_loop(ledger, client, config, stop_rx).await;
        }));
        task.stop_tx = Some(stop_tx);
        tracing::info!("Uploader loop started");
        true
    }

    /// Cooperatively stop the loop, aborting any in-flight sleep
    pub fn stop(&self) {
        let mut task = lock_recover(&self.task);
        if let Some(stop_tx) = task.stop_tx.take() {
            let _ = stop_tx.send(true);
            tracing::info!("Uploader loop stopping");
        }
    }

    /// Run exactly one upload cycle, propagating any error directly
    ///
    /// Does not read or mutate the scheduled loop's backoff state.
    pub async fn upload_now(&self) -> Result<usize> {
        run_cycle(&self.ledger, self.client.as_ref(), &self.config).await
    }
}

async fn run_loop(
    ledger: Arc<EvidenceLedger>,
    client: Arc<dyn UploadClient>,
    config: UploaderConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut backoff = config.base_backoff;

    while !*stop_rx.borrow() {
        let delay = match run_cycle(&ledger, client.as_ref(), &config).await {
            Ok(uploaded) => {
                if uploaded > 0 {
                    tracing::info!(uploaded, "Upload cycle complete");
                }
                backoff = config.base_backoff;
                config.upload_interval
            }
            Err(e) => {
                match &e {
                    VigilError::Backpressure { pending } => {
                        tracing::warn!(pending, "Upload cycle hit backpressure");
                    }
                    other => {
                        tracing::warn!(error = %other, "Upload cycle failed");
                    }
                }
                let jitter = random_jitter(backoff);
                let delay = (backoff + jitter).min(config.max_backoff);
                backoff = (backoff * 2).min(config.max_backoff);
                delay
            }
        };

        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One shared cycle: backpressure check → fetch → send → mark
async fn run_cycle(
    ledger: &EvidenceLedger,
    client: &dyn UploadClient,
    config: &UploaderConfig,
) -> Result<usize> {
    let pending = ledger.count_pending().await?;
    if pending > config.max_pending_events {
        return Err(VigilError::Backpressure { pending });
    }

    let batch = ledger.fetch_batch(UPLOAD_BATCH_SIZE).await?;
    if batch.is_empty() {
        return Ok(0);
    }

    let ids = client.upload(&batch).await?;
    ledger.mark_uploaded(&ids).await?;
    Ok(ids.len())
}

/// Up to 25% of the current backoff, uniformly random
fn random_jitter(backoff: Duration) -> Duration {
    let ceiling = (backoff.as_millis() / 4) as u64;
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

fn lock_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EventCipher;
    use crate::types::{Category, Severity};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_ledger() -> Arc<EvidenceLedger> {
        Arc::new(
            EvidenceLedger::open_in_memory(EventCipher::from_key(&[0x42; 32]).unwrap()).unwrap(),
        )
    }

    fn test_event(seq: u64) -> Event {
        Event::new(
            "device-1",
            Category::Performance,
            Severity::Warning,
            "High CPU Usage Detected",
            "rule.high_cpu",
            seq,
        )
        .at(1_700_000_000.0 + seq as f64)
    }

    /// Mock client: counts calls and either acks everything, acks a
    /// prefix, or fails
    struct MockClient {
        calls: AtomicUsize,
        ack_limit: Option<usize>,
        fail: bool,
    }

    impl MockClient {
        fn acking() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                ack_limit: None,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                ack_limit: None,
                fail: true,
            })
        }

        fn partial(limit: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                ack_limit: Some(limit),
                fail: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UploadClient for MockClient {
        async fn upload(&self, events: &[Event]) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VigilError::Upload("collector returned 503".to_string()));
            }
            let limit = self.ack_limit.unwrap_or(events.len());
            Ok(events.iter().take(limit).map(|e| e.id.clone()).collect())
        }
    }

    #[tokio::test]
    async fn test_empty_ledger_skips_network() {
        let ledger = test_ledger();
        let client = MockClient::acking();
        let uploader = Uploader::new(ledger, client.clone(), UploaderConfig::default());

        assert_eq!(uploader.upload_now().await.unwrap(), 0);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_cycle_uploads_and_marks() {
        let ledger = test_ledger();
        for seq in 0..3 {
            ledger.append(&test_event(seq)).await.unwrap();
        }
        let client = MockClient::acking();
        let uploader = Uploader::new(ledger.clone(), client.clone(), UploaderConfig::default());

        assert_eq!(uploader.upload_now().await.unwrap(), 3);
        assert_eq!(client.calls(), 1);
        assert_eq!(ledger.count_pending().await.unwrap(), 0);

        // Nothing pending: the next cycle makes no network call
        assert_eq!(uploader.upload_now().await.unwrap(), 0);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_backpressure_blocks_before_network() {
        let ledger = test_ledger();
        for seq in 0..3 {
            ledger.append(&test_event(seq)).await.unwrap();
        }
        let client = MockClient::acking();
        let uploader = Uploader::new(
            ledger.clone(),
            client.clone(),
            UploaderConfig {
                max_pending_events: 2,
                ..Default::default()
            },
        );

        let err = uploader.upload_now().await.unwrap_err();
        match err {
            VigilError::Backpressure { pending } => assert_eq!(pending, 3),
            other => panic!("expected backpressure, got {:?}", other),
        }
        assert_eq!(client.calls(), 0);
        assert_eq!(ledger.count_pending().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_batch_capped_per_cycle() {
        let ledger = test_ledger();
        for seq in 0..120 {
            ledger.append(&test_event(seq)).await.unwrap();
        }
        let uploader = Uploader::new(
            ledger.clone(),
            MockClient::acking(),
            UploaderConfig::default(),
        );

        assert_eq!(uploader.upload_now().await.unwrap(), UPLOAD_BATCH_SIZE);
        assert_eq!(ledger.count_pending().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_only_client_returned_ids_marked() {
        let ledger = test_ledger();
        for seq in 0..4 {
            ledger.append(&test_event(seq)).await.unwrap();
        }
        let uploader = Uploader::new(
            ledger.clone(),
            MockClient::partial(1),
            UploaderConfig::default(),
        );

        assert_eq!(uploader.upload_now().await.unwrap(), 1);
        assert_eq!(ledger.count_pending().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_upload_now_propagates_client_errors() {
        let ledger = test_ledger();
        ledger.append(&test_event(0)).await.unwrap();
        let uploader = Uploader::new(
            ledger.clone(),
            MockClient::failing(),
            UploaderConfig::default(),
        );

        let err = uploader.upload_now().await.unwrap_err();
        assert!(matches!(err, VigilError::Upload(_)));
        assert_eq!(ledger.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop_and_stop_cancels() {
        let ledger = test_ledger();
        let uploader = Uploader::new(ledger, MockClient::acking(), UploaderConfig::default());

        assert!(uploader.start());
        assert!(!uploader.start());

        uploader.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Restart after a clean stop works
        assert!(uploader.start());
        uploader.stop();
    }

    #[tokio::test]
    async fn test_scheduled_loop_drains_pending() {
        let ledger = test_ledger();
        for seq in 0..5 {
            ledger.append(&test_event(seq)).await.unwrap();
        }
        let client = MockClient::acking();
        let uploader = Uploader::new(
            ledger.clone(),
            client.clone(),
            UploaderConfig {
                upload_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );

        uploader.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        uploader.stop();

        assert_eq!(ledger.count_pending().await.unwrap(), 0);
        assert!(client.calls() >= 1);
    }

    #[tokio::test]
    async fn test_scheduled_loop_survives_failures() {
        let ledger = test_ledger();
        ledger.append(&test_event(0)).await.unwrap();
        let client = MockClient::failing();
        let uploader = Uploader::new(
            ledger.clone(),
            client.clone(),
            UploaderConfig {
                upload_interval: Duration::from_millis(10),
                base_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(40),
                ..Default::default()
            },
        );

        uploader.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        uploader.stop();

        // The loop kept retrying (capped backoff) without crashing
        assert!(client.calls() >= 2, "calls: {}", client.calls());
        assert_eq!(ledger.count_pending().await.unwrap(), 1);
    }

    #[test]
    fn test_body_signature_is_stable_base64_hmac() {
        let sig = sign_body("shared-secret", b"[]");
        let again = sign_body("shared-secret", b"[]");
        assert_eq!(sig, again);
        assert!(BASE64.decode(&sig).unwrap().len() == 32);

        let other = sign_body("other-secret", b"[]");
        assert_ne!(sig, other);
    }

    #[test]
    fn test_jitter_bounded_by_quarter_backoff() {
        for _ in 0..50 {
            let jitter = random_jitter(Duration::from_millis(400));
            assert!(jitter <= Duration::from_millis(100));
        }
        assert_eq!(random_jitter(Duration::ZERO), Duration::ZERO);
    }
}
