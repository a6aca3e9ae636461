// Runtime configuration, loaded from the environment (and `.env` when present).
// Every key is read as PHOTOFLOW_<NAME> first, then the bare <NAME>.

use std::ops::RangeInclusive;

use crate::jobs::pricing::Pricing;

/// Upper bound for any seconds-valued window (one week).
const MAX_WINDOW_SECS: i64 = 7 * 24 * 3600;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub api_addr: Option<String>,
    pub api_token: Option<String>,
    pub public_base_url: Option<String>,
    pub migrate_on_startup: bool,
    pub log_json: bool,

    pub engine_base_url: String,
    pub engine_api_token: Option<String>,
    pub engine_timeout_ms: u64,

    pub asset_root: String,
    pub asset_public_base_url: String,
    pub max_media_bytes: usize,
    pub max_extra_media: usize,

    pub payment_webhook_secret: String,
    pub payment_webhook_tolerance_secs: i64,
    pub idempotency_claim_lease_secs: i64,

    pub poll_interval_ms: u64,
    pub poll_stale_after_secs: i64,
    pub poll_batch_size: i64,
    pub poll_lease_secs: i64,
    pub generation_timeout_secs: i64,

    pub refund_on_failure: bool,
    pub pricing: Pricing,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("PHOTOFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let api_addr = match env_or_fallback("PHOTOFLOW_API_ADDR", "API_ADDR") {
            Some(v) => normalize_optional_addr(&v),
            None => Some("0.0.0.0:8080".to_string()),
        };

        let payment_webhook_secret =
            env_or_fallback("PHOTOFLOW_PAYMENT_WEBHOOK_SECRET", "PAYMENT_WEBHOOK_SECRET")
                .ok_or_else(|| anyhow::anyhow!("PAYMENT_WEBHOOK_SECRET is missing"))?;

        let default_pricing = Pricing::default();
        let pricing = Pricing {
            restore: env_parse("PHOTOFLOW_COST_RESTORE", "COST_RESTORE")
                .unwrap_or(default_pricing.restore),
            animate: env_parse("PHOTOFLOW_COST_ANIMATE", "COST_ANIMATE")
                .unwrap_or(default_pricing.animate),
            compose: env_parse("PHOTOFLOW_COST_COMPOSE", "COST_COMPOSE")
                .unwrap_or(default_pricing.compose),
        };
        if !pricing.is_valid() {
            anyhow::bail!("COST_* values must be positive");
        }

        Ok(Self {
            database_url,
            worker_id,
            api_addr,
            api_token: env_or_fallback("PHOTOFLOW_API_TOKEN", "API_TOKEN"),
            public_base_url: env_or_fallback("PHOTOFLOW_PUBLIC_BASE_URL", "PUBLIC_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string()),
            migrate_on_startup: env_bool("PHOTOFLOW_MIGRATE_ON_STARTUP").unwrap_or(false),
            log_json: env_bool("PHOTOFLOW_LOG_JSON").unwrap_or(false),

            engine_base_url: env_or_fallback("PHOTOFLOW_ENGINE_BASE_URL", "ENGINE_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:9090".to_string()),
            engine_api_token: env_or_fallback("PHOTOFLOW_ENGINE_API_TOKEN", "ENGINE_API_TOKEN"),
            engine_timeout_ms: env_parse("PHOTOFLOW_ENGINE_TIMEOUT_MS", "ENGINE_TIMEOUT_MS")
                .unwrap_or(15_000),

            asset_root: env_or_fallback("PHOTOFLOW_ASSET_ROOT", "ASSET_ROOT")
                .unwrap_or_else(|| "./data/assets".to_string()),
            asset_public_base_url: env_or_fallback(
                "PHOTOFLOW_ASSET_PUBLIC_BASE_URL",
                "ASSET_PUBLIC_BASE_URL",
            )
            .unwrap_or_else(|| "http://127.0.0.1:8080/assets".to_string()),
            max_media_bytes: env_parse("PHOTOFLOW_MAX_MEDIA_BYTES", "MAX_MEDIA_BYTES")
                .unwrap_or(10 * 1024 * 1024),
            max_extra_media: env_parse("PHOTOFLOW_MAX_EXTRA_MEDIA", "MAX_EXTRA_MEDIA")
                .unwrap_or(3),

            payment_webhook_secret,
            payment_webhook_tolerance_secs: env_secs(
                "PHOTOFLOW_PAYMENT_WEBHOOK_TOLERANCE_SECS",
                "PAYMENT_WEBHOOK_TOLERANCE_SECS",
                300,
                1..=3_600,
            ),
            idempotency_claim_lease_secs: env_secs(
                "PHOTOFLOW_IDEMPOTENCY_CLAIM_LEASE_SECS",
                "IDEMPOTENCY_CLAIM_LEASE_SECS",
                60,
                1..=3_600,
            ),

            poll_interval_ms: env_parse("PHOTOFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
                .unwrap_or(5_000),
            poll_stale_after_secs: env_secs(
                "PHOTOFLOW_POLL_STALE_AFTER_SECS",
                "POLL_STALE_AFTER_SECS",
                60,
                0..=MAX_WINDOW_SECS,
            ),
            poll_batch_size: env_parse("PHOTOFLOW_POLL_BATCH_SIZE", "POLL_BATCH_SIZE")
                .unwrap_or(20)
                .clamp(1, 500),
            poll_lease_secs: env_secs(
                "PHOTOFLOW_POLL_LEASE_SECS",
                "POLL_LEASE_SECS",
                30,
                1..=3_600,
            ),
            generation_timeout_secs: env_secs(
                "PHOTOFLOW_GENERATION_TIMEOUT_SECS",
                "GENERATION_TIMEOUT_SECS",
                30 * 60,
                60..=MAX_WINDOW_SECS,
            ),

            refund_on_failure: env_bool("PHOTOFLOW_REFUND_ON_FAILURE").unwrap_or(false),
            pricing,
        })
    }

    /// Largest JSON body accepted by the submission endpoint: base64 inflates
    /// media by 4/3, plus room for the other fields.
    pub fn max_request_bytes(&self) -> usize {
        let per_media = self.max_media_bytes / 3 * 4 + 4;
        per_media * (1 + self.max_extra_media) + 64 * 1024
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(primary: &str, fallback: &str) -> Option<T> {
    env_or_fallback(primary, fallback).and_then(|s| s.trim().parse().ok())
}

fn env_secs(primary: &str, fallback: &str, default: i64, range: RangeInclusive<i64>) -> i64 {
    env_parse(primary, fallback)
        .unwrap_or(default)
        .clamp(*range.start(), *range.end())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| parse_bool(&v))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_addresses_normalize_to_none() {
        assert_eq!(normalize_optional_addr("off"), None);
        assert_eq!(normalize_optional_addr(" NONE "), None);
        assert_eq!(normalize_optional_addr(""), None);
        assert_eq!(
            normalize_optional_addr(" 127.0.0.1:8080 "),
            Some("127.0.0.1:8080".to_string())
        );
    }

    #[test]
    fn seconds_values_are_clamped() {
        std::env::set_var("PHOTOFLOW_CFGTEST_TIMEOUT_SECS", "9223372036854775807");
        std::env::set_var("PHOTOFLOW_CFGTEST_STALE_SECS", "-5");
        assert_eq!(
            env_secs("PHOTOFLOW_CFGTEST_TIMEOUT_SECS", "CFGTEST_TIMEOUT_SECS", 1_800, 60..=MAX_WINDOW_SECS),
            MAX_WINDOW_SECS
        );
        assert_eq!(
            env_secs("PHOTOFLOW_CFGTEST_STALE_SECS", "CFGTEST_STALE_SECS", 60, 0..=MAX_WINDOW_SECS),
            0
        );
        assert_eq!(
            env_secs("PHOTOFLOW_CFGTEST_UNSET_SECS", "CFGTEST_UNSET_SECS", 30, 1..=3_600),
            30
        );
    }

    #[test]
    fn lenient_bool_parsing() {
        assert!(parse_bool("YES"));
        assert!(parse_bool("on"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("no"));
        assert!(!parse_bool("garbage"));
    }
}
