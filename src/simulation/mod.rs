//! Transaction and OS-metric generation.

pub mod audit;
pub mod identity;
pub mod os_metrics;
pub mod transaction;

use crate::config::ResponseTimeConfig;
use rand::Rng;

pub use os_metrics::MetricWorker;
pub use transaction::{Outcome, Stage, TransactionWorker};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Local wall-clock time as every log line prints it.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Synthetic response time in milliseconds: mostly fast, occasionally slow.
pub fn response_time<R: Rng + ?Sized>(rng: &mut R, config: &ResponseTimeConfig) -> u64 {
    if rng.random::<f64>() < config.slow_probability {
        config.slow_ms.sample(rng)
    } else {
        config.fast_ms.sample(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert_eq!(ts.len(), "2018-09-18 20:13:16,390".len());
        NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).unwrap();
    }

    #[test]
    fn test_response_time_is_bimodal() {
        let config = ResponseTimeConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let samples: Vec<u64> = (0..20_000).map(|_| response_time(&mut rng, &config)).collect();

        assert!(samples.iter().all(|ms| (5..=100).contains(ms) || (1000..=5000).contains(ms)));
        let slow = samples.iter().filter(|ms| **ms >= 1000).count() as f64 / samples.len() as f64;
        assert!((slow - 0.05).abs() < 0.01, "slow share {slow}");
    }
}
