//! Exponential backoff with optional full jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Nominal delay before `attempt` (0-indexed): `min(max, min_delay × factor^(attempt-1))`.
///
/// Attempt 0 has no delay. A factor below 1 (or not finite) counts as 1 so the
/// sequence never decreases.
pub fn nominal_delay(attempt: u32, config: &RetryConfig) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = if config.factor.is_finite() && config.factor >= 1.0 {
        config.factor
    } else {
        1.0
    };
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let delay_ms = (config.min_delay_ms as f64) * factor.powi(exponent);
    let capped_ms = delay_ms.min(config.max_delay_ms as f64);

    Duration::from_millis(capped_ms as u64)
}

/// Calculate the actual wait before `attempt`.
///
/// With `randomize` the wait is drawn uniformly from `[0, nominal]`, bounds included.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let nominal = nominal_delay(attempt, config);
    if !config.randomize || nominal.is_zero() {
        return nominal;
    }

    let nominal_ms = nominal.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=nominal_ms))
}
