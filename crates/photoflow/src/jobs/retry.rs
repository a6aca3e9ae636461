use rand::Rng;

/// Backoff between status polls of one generating job.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_seconds: 5,
            max_seconds: 5 * 60,
            jitter_pct: 0.20,
        }
    }
}

impl BackoffConfig {
    /// Base derived from the poll interval, capped at ten minutes.
    pub fn from_interval_ms(poll_interval_ms: u64) -> Self {
        let base = ((poll_interval_ms / 1000) as i64).max(1);
        Self {
            base_seconds: base,
            max_seconds: (base * 60).clamp(base, 10 * 60),
            ..Self::default()
        }
    }
}

/// `base * 2^(attempt-1)`, capped, then jittered by ±`jitter_pct`.
pub fn next_poll_delay_seconds(attempt: i32, cfg: &BackoffConfig, rng: &mut impl Rng) -> i64 {
    let exp = (attempt.max(1) as u32).saturating_sub(1);
    let pow2 = 1_i64.checked_shl(exp.min(62)).unwrap_or(i64::MAX);
    let delay = cfg.base_seconds.saturating_mul(pow2).min(cfg.max_seconds);

    let spread = delay as f64 * cfg.jitter_pct;
    let jitter = if spread > 0.0 {
        rng.gen_range(-spread..=spread)
    } else {
        0.0
    };
    ((delay as f64 + jitter).round() as i64).clamp(1, cfg.max_seconds.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn delay_grows_and_is_capped() {
        let cfg = BackoffConfig {
            base_seconds: 2,
            max_seconds: 60,
            jitter_pct: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(next_poll_delay_seconds(1, &cfg, &mut rng), 2);
        assert_eq!(next_poll_delay_seconds(2, &cfg, &mut rng), 4);
        assert_eq!(next_poll_delay_seconds(4, &cfg, &mut rng), 16);
        assert_eq!(next_poll_delay_seconds(30, &cfg, &mut rng), 60);
        assert_eq!(next_poll_delay_seconds(i32::MAX, &cfg, &mut rng), 60);
    }

    #[test]
    fn jitter_stays_in_band() {
        let cfg = BackoffConfig {
            base_seconds: 10,
            max_seconds: 1000,
            jitter_pct: 0.2,
        };
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let d = next_poll_delay_seconds(1, &cfg, &mut rng);
            assert!((8..=12).contains(&d), "delay {d} out of band");
        }
    }
}
