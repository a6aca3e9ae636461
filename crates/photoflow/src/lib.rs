pub mod api;
pub mod assets;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod jobs;
pub mod ledger;
pub mod payments;
pub mod telemetry;
