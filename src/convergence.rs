//! Bounded wait-for-convergence primitive shared by every suspending
//! operation. One poll loop, one timeout shape, no per-call-site variants.

use crate::config::ConvergenceConfig;
use crate::error::{ExchangeError, Result};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitOptions {
    pub fn from_config(config: &ConvergenceConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from_config(&ConvergenceConfig::default())
    }
}

/// Polls `probe` until it yields a value or the timeout elapses. The probe
/// is a cheap synchronous read over record state; nothing is retried or
/// cancelled on expiry, the underlying record is simply left as-is.
pub async fn await_converged<T, F>(what: &str, options: WaitOptions, mut probe: F) -> Result<T>
where
    F: FnMut() -> Option<T>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = probe() {
            return Ok(value);
        }
        if started.elapsed() >= options.timeout {
            return Err(ExchangeError::Timeout {
                what: what.to_string(),
                waited_ms: options.timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn resolves_once_probe_yields() {
        let mut remaining = 3;
        let result = await_converged("counter", fast(), || {
            if remaining == 0 {
                Some(42)
            } else {
                remaining -= 1;
                None
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn times_out_when_probe_never_yields() {
        let err = await_converged::<(), _>("connection abc", fast(), || None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 504);
        assert!(err.to_string().contains("connection abc"));
    }

    #[tokio::test]
    async fn immediate_value_does_not_sleep() {
        let started = std::time::Instant::now();
        await_converged("noop", fast(), || Some(())).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(20));
    }
}
