#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use photoflow::assets::InMemoryAssetStore;
use photoflow::engine::{
    DownloadedAsset, EngineError, EngineState, EngineSubmission, GenerationEngine,
};
use photoflow::error::ExternalErrorKind;
use photoflow::idempotency::InMemoryIdempotencyStore;
use photoflow::jobs::pricing::Pricing;
use photoflow::jobs::retry::BackoffConfig;
use photoflow::jobs::{
    CompletionReconciler, GatewayConfig, GenerationGateway, InMemoryJobStore, JobRecord,
    JobRequest, JobStore, Limits, MediaUpload, PollerConfig, ReconcilePoller, ReconcilerConfig,
    TransformKind,
};
use photoflow::ledger::{CreditLedger, InMemoryCreditLedger, LedgerReference};
use photoflow::payments::{
    InMemoryPaymentStore, PaymentWebhookVerifier, VerifierConfig, WebhookSecret,
};

pub const ASSET_BASE: &str = "https://assets.test/media";
pub const WEBHOOK_SECRET: &str = "whsec_dGVzdC13ZWJob29rLXNlY3JldA==";

/// Connects to TEST_DATABASE_URL, migrates and truncates. Returns None when
/// the variable is unset so DB tests skip on machines without Postgres.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query(
        r#"
        TRUNCATE TABLE
            ledger_entries,
            credit_accounts,
            idempotency_keys,
            payments,
            jobs
        CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("truncate failed");

    Some(pool)
}

/// Engine fake driven by the test. Submissions succeed with a fresh
/// reference unless a failure was queued; downloads return a small PNG
/// unless scripted otherwise.
#[derive(Default)]
pub struct ScriptedEngine {
    submit_failures: Mutex<VecDeque<EngineError>>,
    statuses: Mutex<HashMap<String, Result<EngineState, EngineError>>>,
    downloads: Mutex<HashMap<String, Result<DownloadedAsset, EngineError>>>,
    submissions: Mutex<Vec<EngineSubmission>>,
    downloaded: Mutex<Vec<String>>,
    pub status_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn fail_next_submit(&self, kind: ExternalErrorKind) {
        self.submit_failures
            .lock()
            .unwrap()
            .push_back(EngineError::new(kind, "scripted submit failure"));
    }

    pub fn set_status(&self, external_ref: &str, state: Result<EngineState, EngineError>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(external_ref.to_string(), state);
    }

    pub fn set_download(&self, url: &str, result: Result<DownloadedAsset, EngineError>) {
        self.downloads
            .lock()
            .unwrap()
            .insert(url.to_string(), result);
    }

    pub fn submissions(&self) -> Vec<EngineSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn downloaded_urls(&self) -> Vec<String> {
        self.downloaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    async fn submit(&self, submission: &EngineSubmission) -> Result<String, EngineError> {
        self.submissions.lock().unwrap().push(submission.clone());
        if let Some(err) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(format!("ext-{}", Uuid::new_v4()))
    }

    async fn status(&self, external_job_ref: &str) -> Result<EngineState, EngineError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .get(external_job_ref)
            .cloned()
            .unwrap_or(Ok(EngineState::Pending))
    }

    async fn download(&self, output_url: &str) -> Result<DownloadedAsset, EngineError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.downloaded.lock().unwrap().push(output_url.to_string());
        self.downloads
            .lock()
            .unwrap()
            .get(output_url)
            .cloned()
            .unwrap_or_else(|| {
                Ok(DownloadedAsset {
                    bytes: b"\x89PNG result".to_vec(),
                    content_type: "image/png".to_string(),
                })
            })
    }
}

pub struct Harness {
    pub jobs: Arc<InMemoryJobStore>,
    pub ledger: Arc<InMemoryCreditLedger>,
    pub assets: Arc<InMemoryAssetStore>,
    pub engine: Arc<ScriptedEngine>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub payments: Arc<InMemoryPaymentStore>,
    pub gateway: Arc<GenerationGateway>,
    pub reconciler: Arc<CompletionReconciler>,
    pub verifier: Arc<PaymentWebhookVerifier>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HarnessOptions {
    pub refund_on_failure: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_refunds() -> Self {
        Self::with_options(HarnessOptions {
            refund_on_failure: true,
        })
    }

    pub fn with_options(opts: HarnessOptions) -> Self {
        Self::with_ledger(Arc::new(InMemoryCreditLedger::new()), opts)
    }

    pub fn with_ledger(ledger: Arc<InMemoryCreditLedger>, opts: HarnessOptions) -> Self {
        Self::build(ledger.clone(), ledger, opts)
    }

    /// `ledger` is what the components use; `inner` is kept for assertions.
    pub fn build(
        inner: Arc<InMemoryCreditLedger>,
        ledger: Arc<dyn CreditLedger>,
        opts: HarnessOptions,
    ) -> Self {
        let jobs = Arc::new(InMemoryJobStore::new());
        let assets = Arc::new(InMemoryAssetStore::new(ASSET_BASE));
        let engine = Arc::new(ScriptedEngine::default());
        let idempotency = Arc::new(InMemoryIdempotencyStore::new(60));
        let payments = Arc::new(InMemoryPaymentStore::new());

        let gateway = Arc::new(GenerationGateway::new(
            jobs.clone(),
            ledger.clone(),
            assets.clone(),
            engine.clone(),
            GatewayConfig {
                pricing: Pricing::default(),
                limits: Limits {
                    max_media_bytes: 1024,
                    max_extra_media: 3,
                },
                callback_base_url: Some("https://api.test".to_string()),
                first_poll_after_secs: 60,
                refund_on_failure: opts.refund_on_failure,
            },
        ));

        let reconciler = Arc::new(CompletionReconciler::new(
            jobs.clone(),
            ledger.clone(),
            assets.clone(),
            engine.clone(),
            ReconcilerConfig {
                refund_on_failure: opts.refund_on_failure,
                backoff: BackoffConfig {
                    base_seconds: 5,
                    max_seconds: 300,
                    jitter_pct: 0.0,
                },
            },
        ));

        let verifier = Arc::new(PaymentWebhookVerifier::new(
            WebhookSecret::from_config(WEBHOOK_SECRET).unwrap(),
            idempotency.clone(),
            payments.clone(),
            ledger,
            VerifierConfig {
                tolerance_secs: 300,
                worker_id: "test-worker".to_string(),
            },
        ));

        Self {
            jobs,
            ledger: inner,
            assets,
            engine,
            idempotency,
            payments,
            gateway,
            reconciler,
            verifier,
        }
    }

    pub fn poller(&self, generation_timeout_secs: i64) -> ReconcilePoller {
        ReconcilePoller::new(
            self.jobs.clone(),
            self.engine.clone(),
            self.reconciler.clone(),
            PollerConfig {
                worker_id: "poller-1".to_string(),
                batch_size: 10,
                lease_secs: 30,
                stale_after_secs: 0,
                generation_timeout_secs,
                interval: Duration::from_millis(10),
            },
        )
    }

    pub async fn fund(&self, owner: &str, credits: i64) {
        self.ledger
            .credit(owner, credits, &LedgerReference::grant(&Uuid::new_v4().to_string()))
            .await
            .unwrap();
    }

    pub async fn balance(&self, owner: &str) -> i64 {
        self.ledger.balance(owner).await.unwrap()
    }

    pub async fn job(&self, id: Uuid) -> JobRecord {
        self.jobs.get(id).await.unwrap().expect("job exists")
    }

    /// Submit a restore job for a funded user and return it (generating).
    pub async fn generating_job(&self, owner: &str) -> JobRecord {
        self.fund(owner, 10).await;
        self.gateway
            .submit(restore_request(owner))
            .await
            .expect("submission succeeds")
    }

    /// Pull the job's next poll into the past so the poller picks it up.
    pub fn make_due(&self, id: Uuid) {
        let past = Utc::now() - chrono::Duration::seconds(1);
        self.jobs.update_with(id, |j| {
            j.next_poll_at = Some(past);
            j.updated_at = past;
        });
    }
}

pub fn png(len: usize) -> MediaUpload {
    MediaUpload {
        bytes: vec![0xAB; len],
        content_type: "image/png".to_string(),
    }
}

pub fn restore_request(owner: &str) -> JobRequest {
    JobRequest {
        owner_id: owner.to_string(),
        kind: TransformKind::Restore,
        preset: "restore_v2".to_string(),
        prompt: None,
        aspect_ratio: None,
        media: png(32),
        extra_media: vec![],
    }
}

pub fn engine_error(kind: ExternalErrorKind) -> EngineError {
    EngineError::new(kind, "scripted")
}
