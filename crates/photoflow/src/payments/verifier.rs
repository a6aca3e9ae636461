use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::error::AppError;
use crate::idempotency::{ClaimOutcome, IdempotencyStore};
use crate::ledger::{CreditLedger, LedgerError, LedgerReference};
use crate::payments::envelope::{parse_event, PaymentEvent, PaymentSucceeded, PAYMENT_SUCCEEDED};
use crate::payments::repo::{NewPayment, PaymentRecord, PaymentStore};
use crate::payments::signature::{SignatureError, WebhookSecret};

pub const IDEMPOTENCY_SCOPE: &str = "payment_webhook";

pub const HEADER_ID: &str = "webhook-id";
pub const HEADER_TIMESTAMP: &str = "webhook-timestamp";
pub const HEADER_SIGNATURE: &str = "webhook-signature";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Accepted {
    Applied {
        payment_id: String,
        owner_id: String,
        credits: i64,
        new_balance: i64,
    },
    AlreadyProcessed,
    Ignored {
        event_type: String,
    },
}

#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("missing header {0}")]
    MissingHeaders(&'static str),

    #[error("signature rejected: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("event is being processed by another delivery")]
    InFlight,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WebhookRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeaders(_) | Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::InFlight => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<WebhookRejection> for AppError {
    fn from(r: WebhookRejection) -> Self {
        match r {
            WebhookRejection::MissingHeaders(h) => AppError::validation(format!("missing header {h}")),
            WebhookRejection::InvalidSignature(e) => AppError::SignatureVerification(e.to_string()),
            WebhookRejection::Malformed(msg) => AppError::Validation(msg),
            WebhookRejection::InFlight => {
                AppError::Conflict("event is being processed, retry later".to_string())
            }
            WebhookRejection::Internal(e) => AppError::Internal(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub tolerance_secs: i64,
    /// Recorded as the idempotency claim holder.
    pub worker_id: String,
}

pub struct PaymentWebhookVerifier {
    secret: WebhookSecret,
    idempotency: Arc<dyn IdempotencyStore>,
    payments: Arc<dyn PaymentStore>,
    ledger: Arc<dyn CreditLedger>,
    cfg: VerifierConfig,
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookRejection> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(WebhookRejection::MissingHeaders(name))
}

impl PaymentWebhookVerifier {
    pub fn new(
        secret: WebhookSecret,
        idempotency: Arc<dyn IdempotencyStore>,
        payments: Arc<dyn PaymentStore>,
        ledger: Arc<dyn CreditLedger>,
        cfg: VerifierConfig,
    ) -> Self {
        Self {
            secret,
            idempotency,
            payments,
            ledger,
            cfg,
        }
    }

    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> Result<Accepted, WebhookRejection> {
        self.handle_at(headers, body, Utc::now().timestamp()).await
    }

    pub async fn handle_at(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now_unix: i64,
    ) -> Result<Accepted, WebhookRejection> {
        let event_id = header(headers, HEADER_ID)?;
        let timestamp = header(headers, HEADER_TIMESTAMP)?;
        let signature = header(headers, HEADER_SIGNATURE)?;

        if let Err(e) = self.secret.verify(
            event_id,
            timestamp,
            body,
            signature,
            now_unix,
            self.cfg.tolerance_secs,
        ) {
            tracing::warn!(event_id, error = %e, "payment webhook signature rejected");
            return Err(e.into());
        }

        let event = parse_event(body).map_err(|msg| {
            tracing::warn!(event_id, error = %msg, "payment webhook malformed");
            WebhookRejection::Malformed(msg)
        })?;

        match event {
            PaymentEvent::Other { event_type } => {
                tracing::info!(event_id, event_type = %event_type, "payment webhook ignored");
                Ok(Accepted::Ignored { event_type })
            }
            PaymentEvent::Succeeded(succeeded) => self.on_succeeded(event_id, succeeded).await,
        }
    }

    async fn on_succeeded(
        &self,
        event_id: &str,
        event: PaymentSucceeded,
    ) -> Result<Accepted, WebhookRejection> {
        let key = format!("payment_succeeded:{}", event.payment_id);

        match self
            .idempotency
            .claim(IDEMPOTENCY_SCOPE, &key, PAYMENT_SUCCEEDED, &self.cfg.worker_id)
            .await?
        {
            ClaimOutcome::AlreadyProcessed => {
                tracing::info!(event_id, payment_id = %event.payment_id, "payment already applied");
                return Ok(Accepted::AlreadyProcessed);
            }
            ClaimOutcome::InFlight => {
                tracing::info!(event_id, payment_id = %event.payment_id, "payment in flight elsewhere");
                return Err(WebhookRejection::InFlight);
            }
            ClaimOutcome::Claimed => {}
        }

        let result = match self.apply(&event).await {
            Ok(accepted) => self
                .idempotency
                .mark_processed(IDEMPOTENCY_SCOPE, &key)
                .await
                .map(|_| accepted)
                .map_err(WebhookRejection::from),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::error!(event_id, payment_id = %event.payment_id, error = %e, "payment webhook failed; releasing claim");
            if let Err(release_err) = self.idempotency.release(IDEMPOTENCY_SCOPE, &key).await {
                tracing::error!(event_id, error = %release_err, "claim release failed; it will expire");
            }
        }
        result
    }

    async fn apply(&self, event: &PaymentSucceeded) -> Result<Accepted, WebhookRejection> {
        let payment = self.resolve_payment(event).await?;

        match self
            .ledger
            .credit(
                &payment.owner_id,
                payment.credits,
                &LedgerReference::payment_credit(payment.id),
            )
            .await
        {
            Ok(new_balance) => {
                self.payments.mark_succeeded(payment.id).await?;
                tracing::info!(
                    payment_id = %payment.provider_payment_id,
                    user_id = %payment.owner_id,
                    credits = payment.credits,
                    new_balance,
                    "payment credited"
                );
                Ok(Accepted::Applied {
                    payment_id: payment.provider_payment_id,
                    owner_id: payment.owner_id,
                    credits: payment.credits,
                    new_balance,
                })
            }
            Err(LedgerError::DuplicateEntry { .. }) => {
                // Credited by an earlier delivery that died before marking
                // the key processed.
                self.payments.mark_succeeded(payment.id).await?;
                Ok(Accepted::AlreadyProcessed)
            }
            Err(e) => Err(WebhookRejection::Internal(e.into())),
        }
    }

    /// Pre-registered payment if one exists, otherwise one created from the
    /// event metadata.
    async fn resolve_payment(
        &self,
        event: &PaymentSucceeded,
    ) -> Result<PaymentRecord, WebhookRejection> {
        if let Some(existing) = self.payments.find_by_provider_id(&event.payment_id).await? {
            if let Some(meta) = &event.metadata {
                if meta.user_id != existing.owner_id || meta.credits != existing.credits {
                    tracing::warn!(
                        payment_id = %event.payment_id,
                        user_id = %existing.owner_id,
                        "event metadata differs from registered payment; using registered values"
                    );
                }
            }
            return Ok(existing);
        }

        let meta = event.metadata.as_ref().ok_or_else(|| {
            WebhookRejection::Malformed(format!(
                "payment {} is unknown and carries no metadata",
                event.payment_id
            ))
        })?;

        Ok(self
            .payments
            .register_pending(&NewPayment {
                provider_payment_id: event.payment_id.clone(),
                owner_id: meta.user_id.clone(),
                amount_cents: meta.amount_cents,
                credits: meta.credits,
            })
            .await?)
    }
}
