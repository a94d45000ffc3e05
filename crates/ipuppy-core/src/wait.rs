//! Bounded waiting.
//!
//! Every suspension point that depends on the kernel (connection file
//! appearing, process exit, the next message, a reply) goes through these two
//! helpers so each wait carries an explicit deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// The deadline passed before the condition held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    /// How long the caller waited in total.
    pub waited: Duration,
}

/// Poll `probe` every `interval` until it yields a value or `timeout` passes.
///
/// The probe is always evaluated at least once, and once more right at the
/// deadline so a condition that becomes true during the last sleep is seen.
pub async fn poll_until<T, F>(timeout: Duration, interval: Duration, mut probe: F) -> Result<T, Elapsed>
where
    F: FnMut() -> Option<T>,
{
    let start = Instant::now();
    let deadline = start + timeout;

    loop {
        if let Some(value) = probe() {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Elapsed { waited: now - start });
        }

        tokio::time::sleep_until((now + interval).min(deadline)).await;
    }
}

/// Await `future` until `deadline`.
///
/// Dropping the future on expiry is the only cancellation; nothing is sent
/// to the other side.
pub async fn until_deadline<F: Future>(deadline: Instant, future: F) -> Result<F::Output, Elapsed> {
    let start = Instant::now();
    tokio::time::timeout_at(deadline, future)
        .await
        .map_err(|_| Elapsed { waited: start.elapsed() })
}

/// Await `future` for at most `timeout`, or less if `deadline` comes first.
pub async fn within<F: Future>(
    timeout: Duration,
    deadline: Instant,
    future: F,
) -> Result<F::Output, Elapsed> {
    until_deadline((Instant::now() + timeout).min(deadline), future).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_returns_first_value() {
        let mut calls = 0;
        let result = poll_until(Duration::from_secs(1), Duration::from_millis(100), || {
            calls += 1;
            (calls == 3).then_some(calls)
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let mut calls = 0;
        let result: Result<(), _> =
            poll_until(Duration::from_millis(500), Duration::from_millis(100), || {
                calls += 1;
                None
            })
            .await;
        let elapsed = result.unwrap_err();
        assert!(elapsed.waited >= Duration::from_millis(500));
        // Initial probe, four intermediate ones, and the one at the deadline.
        assert_eq!(calls, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_respects_earlier_deadline() {
        let deadline = Instant::now() + Duration::from_millis(200);
        let result = within(
            Duration::from_secs(5),
            deadline,
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;
        assert!(result.is_err());
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test]
    async fn test_until_deadline_passes_output_through() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let value = until_deadline(deadline, async { 7 }).await;
        assert_eq!(value, Ok(7));
    }
}
