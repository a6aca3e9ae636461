pub mod error_codes;
pub mod gateway;
pub mod memory;
pub mod model;
pub mod poller;
pub mod pricing;
pub mod reconciler;
pub mod refund;
pub mod repo;
pub mod retry;
pub mod validate;

pub use gateway::{GatewayConfig, GatewayError, GenerationGateway};
pub use memory::InMemoryJobStore;
pub use model::{JobRecord, JobStatus, NewJob, TransformKind};
pub use poller::{PollSummary, PollerConfig, ReconcilePoller};
pub use reconciler::{CompletionReconciler, ReconcileError, ReconcilerConfig};
pub use repo::{JobStats, JobStore, PgJobStore};
pub use validate::{JobRequest, Limits, MediaUpload};
