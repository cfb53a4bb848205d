//! Retry backoff selection.

use std::time::Duration;

/// Delay before the retry that follows `attempt` (1-based): the configured
/// sequence indexed by attempt number, clamped to the last entry. An empty
/// sequence falls back to attempt-squared seconds.
pub fn backoff_delay(seconds: &[f64], attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let secs = if seconds.is_empty() {
        f64::from(attempt * attempt)
    } else {
        let index = ((attempt as usize) - 1).min(seconds.len() - 1);
        seconds[index]
    };
    Duration::from_secs_f64(secs.max(0.0))
}
