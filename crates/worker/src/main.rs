use std::sync::Arc;
use std::time::Duration;

use photoflow::api;
use photoflow::assets::{AssetStore, LocalAssetStore};
use photoflow::config;
use photoflow::db;
use photoflow::engine::{GenerationEngine, HttpGenerationEngine};
use photoflow::idempotency::PgIdempotencyStore;
use photoflow::jobs::retry::BackoffConfig;
use photoflow::jobs::{
    CompletionReconciler, GatewayConfig, GenerationGateway, JobStore, Limits, PgJobStore,
    PollerConfig, ReconcilePoller, ReconcilerConfig,
};
use photoflow::ledger::{CreditLedger, PgCreditLedger};
use photoflow::payments::{PaymentWebhookVerifier, PgPaymentStore, VerifierConfig, WebhookSecret};
use photoflow::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    telemetry::init(cfg.log_json);

    let api_display = cfg.api_addr.as_deref().unwrap_or("disabled");
    let auth = if cfg.api_token.is_some() {
        "enabled"
    } else {
        "disabled"
    };
    tracing::info!(
        worker_id = %cfg.worker_id,
        api = api_display,
        auth,
        engine = %cfg.engine_base_url,
        poll_interval_ms = cfg.poll_interval_ms,
        refund_on_failure = cfg.refund_on_failure,
        migrate_on_startup = cfg.migrate_on_startup,
        "photoflow starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let ledger: Arc<dyn CreditLedger> = Arc::new(PgCreditLedger::new(pool.clone()));
    let assets: Arc<dyn AssetStore> = Arc::new(LocalAssetStore::new(
        &cfg.asset_root,
        &cfg.asset_public_base_url,
    ));
    let engine: Arc<dyn GenerationEngine> = Arc::new(HttpGenerationEngine::new(
        &cfg.engine_base_url,
        cfg.engine_api_token.clone(),
        cfg.engine_timeout_ms,
    )?);

    let backoff = BackoffConfig::from_interval_ms(cfg.poll_interval_ms);

    let gateway = Arc::new(GenerationGateway::new(
        jobs.clone(),
        ledger.clone(),
        assets.clone(),
        engine.clone(),
        GatewayConfig {
            pricing: cfg.pricing,
            limits: Limits {
                max_media_bytes: cfg.max_media_bytes,
                max_extra_media: cfg.max_extra_media,
            },
            callback_base_url: cfg.public_base_url.clone(),
            first_poll_after_secs: cfg.poll_stale_after_secs,
            refund_on_failure: cfg.refund_on_failure,
        },
    ));

    let reconciler = Arc::new(CompletionReconciler::new(
        jobs.clone(),
        ledger.clone(),
        assets.clone(),
        engine.clone(),
        ReconcilerConfig {
            refund_on_failure: cfg.refund_on_failure,
            backoff,
        },
    ));

    let verifier = Arc::new(PaymentWebhookVerifier::new(
        WebhookSecret::from_config(&cfg.payment_webhook_secret)?,
        Arc::new(PgIdempotencyStore::new(
            pool.clone(),
            cfg.idempotency_claim_lease_secs,
        )),
        Arc::new(PgPaymentStore::new(pool.clone())),
        ledger.clone(),
        VerifierConfig {
            tolerance_secs: cfg.payment_webhook_tolerance_secs,
            worker_id: cfg.worker_id.clone(),
        },
    ));

    let poller = Arc::new(ReconcilePoller::new(
        jobs.clone(),
        engine.clone(),
        reconciler.clone(),
        PollerConfig {
            worker_id: cfg.worker_id.clone(),
            batch_size: cfg.poll_batch_size,
            lease_secs: cfg.poll_lease_secs,
            stale_after_secs: cfg.poll_stale_after_secs,
            generation_timeout_secs: cfg.generation_timeout_secs,
            interval: Duration::from_millis(cfg.poll_interval_ms),
        },
    ));

    // ---- API task ----
    let app = api::router(api::AppState {
        gateway,
        reconciler,
        verifier,
        jobs,
        ledger,
        api_token: cfg.api_token.clone(),
        max_request_bytes: cfg.max_request_bytes(),
    });
    let api_addr = cfg.api_addr.clone();

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "api listening");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Reconcile poller task ----
    let poller_handle = tokio::spawn(poller.run());

    tokio::select! {
        res = api_handle => res??,
        res = poller_handle => res??,
    }

    Ok(())
}
