// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Generic linear-backoff retry, used by [`crate::key_epoch_coordinator`] to
//! publish a key-epoch upload to the key cache and pub/sub bus. Replaces the
//! original implementation's thread-local-timer/fiber-sleep retry loop with
//! a plain `tokio::time::sleep` and an explicit deadline, so retries can be
//! driven deterministically in tests.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Runs `op` up to `policy.max_attempts` times, sleeping `policy.backoff *
/// attempt` between tries (1-indexed), and gives up early once `deadline`
/// has passed. Returns the last error if every attempt fails or the deadline
/// is hit before a retry.
pub async fn retry_until<F, Fut, T, E>(
    policy: RetryPolicy,
    deadline: Instant,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || Instant::now() >= deadline {
                    return Err(err);
                }
                let wait = policy.backoff * attempt;
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(wait.min(remaining)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_within_deadline() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        let deadline = Instant::now() + Duration::from_secs(5);

        let result: Result<(), &'static str> = retry_until(policy, deadline, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let deadline = Instant::now() + Duration::from_secs(5);

        let result: Result<(), &'static str> =
            retry_until(policy, deadline, || async { Err("always fails") }).await;

        assert_eq!(result.unwrap_err(), "always fails");
    }
}
