//! Inbound payment-provider events: signature check, then a single
//! idempotent credit per payment.

pub mod envelope;
pub mod repo;
pub mod signature;
pub mod verifier;

pub use envelope::{PaymentEvent, PaymentMetadata, PaymentSucceeded};
pub use repo::{InMemoryPaymentStore, NewPayment, PaymentRecord, PaymentStore, PgPaymentStore};
pub use signature::{SignatureError, WebhookSecret};
pub use verifier::{Accepted, PaymentWebhookVerifier, VerifierConfig, WebhookRejection};
