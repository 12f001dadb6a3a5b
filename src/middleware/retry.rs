//! Bounded exponential-backoff retry stage.
//!
//! Each retry re-invokes the whole downstream chain. Waits between attempts
//! are cancelable: when the handler context is cancelled the wait is
//! abandoned and the last error returned. After the final attempt fails the
//! message is dropped with one critical log line and counted in
//! [`RetryStats::exhausted`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use backon::BackoffBuilder;
use tracing::{error, info, warn};

use super::{HandlerFn, Middleware};
use crate::context::Context;
use crate::errors;
use crate::message::Message;
use crate::utils::retry::RetryConfig;

/// Code logged when a message exhausts its attempts.
pub const MAX_RETRIES_REACHED_ERROR: &str = "MAX_RETRIES_REACHED_ERROR";

#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
    aborted: AtomicU64,
}

/// Monotonic retry counters, shared by every clone.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    counters: Arc<Counters>,
}

impl RetryStats {
    /// Downstream invocations, first attempts included.
    pub fn attempts(&self) -> u64 {
        self.counters.attempts.load(Ordering::SeqCst)
    }

    /// Completed backoff waits followed by a re-invocation.
    pub fn retries(&self) -> u64 {
        self.counters.retries.load(Ordering::SeqCst)
    }

    /// Messages dropped after the last attempt failed.
    pub fn exhausted(&self) -> u64 {
        self.counters.exhausted.load(Ordering::SeqCst)
    }

    /// Backoff waits cut short by cancellation.
    pub fn aborted(&self) -> u64 {
        self.counters.aborted.load(Ordering::SeqCst)
    }
}

/// Retry middleware.
#[derive(Debug, Clone, Default)]
pub struct Retry {
    config: RetryConfig,
    stats: RetryStats,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: RetryStats::default(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn stats(&self) -> RetryStats {
        self.stats.clone()
    }
}

impl Middleware for Retry {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        let config = self.config.clone();
        let stats = self.stats.clone();
        Arc::new(move |ctx: Context, msg: Message| {
            let next = next.clone();
            let config = config.clone();
            let counters = stats.counters.clone();
            Box::pin(async move {
                let mut delays = config.backoff().build();
                let mut attempt = 0u32;

                loop {
                    attempt += 1;
                    counters.attempts.fetch_add(1, Ordering::SeqCst);

                    let err = match next(ctx.clone(), msg.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(e) => e,
                    };

                    if !errors::is_retryable(&*err) {
                        return Err(err);
                    }

                    // backon bounds the attempts; waits come from `delay_for_attempt`.
                    if delays.next().is_none() {
                        counters.exhausted.fetch_add(1, Ordering::SeqCst);
                        error!(
                            severity = "CRITICAL",
                            code = MAX_RETRIES_REACHED_ERROR,
                            message_id = %msg.id(),
                            topic = %msg.topic(),
                            attempts = attempt,
                            error = %err,
                            "Max retries reached, dropping message"
                        );
                        return Ok(());
                    }

                    let delay = config.delay_for_attempt(attempt);
                    info!(
                        message_id = %msg.id(),
                        topic = %msg.topic(),
                        retry_num = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying message"
                    );

                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => {
                            counters.aborted.fetch_add(1, Ordering::SeqCst);
                            warn!(
                                message_id = %msg.id(),
                                retry_num = attempt,
                                "Retry aborted by cancellation"
                            );
                            return Err(err);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }

                    counters.retries.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{BoxError, CustomError};
    use crate::middleware::handler_fn;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::time::Instant;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial_interval_ms: 100,
            multiplier: 2.0,
            max_interval_ms: 1000,
            max_attempts,
        }
    }

    fn transient() -> BoxError {
        CustomError::new("transient").retryable().into()
    }

    /// Fails retryably `failures` times, then succeeds; records call times.
    fn flaky(failures: u32) -> (HandlerFn, Arc<AtomicU32>, Arc<std::sync::Mutex<Vec<Instant>>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let times = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (c, t) = (calls.clone(), times.clone());
        let handler = handler_fn(move |_ctx, _msg| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            t.lock().unwrap().push(Instant::now());
            async move {
                if n < failures {
                    Err(transient())
                } else {
                    Ok(())
                }
            }
        });
        (handler, calls, times)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success_with_backoff() {
        let retry = Retry::new(config(10));
        let (handler, calls, times) = flaky(3);

        retry.wrap(handler)(Context::new(), Message::new("x"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let times = times.lock().unwrap();
        for j in 1..times.len() {
            let gap = times[j] - times[j - 1];
            let expected = retry.config().delay_for_attempt(j as u32);
            assert!(gap >= expected, "gap {j}: {gap:?}");
            assert!(gap < expected + Duration::from_millis(5), "gap {j}: {gap:?}");
        }
        let stats = retry.stats();
        assert_eq!(stats.attempts(), 4);
        assert_eq!(stats.retries(), 3);
        assert_eq!(stats.exhausted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_drops_message() {
        let retry = Retry::new(config(5));
        let (handler, calls, _) = flaky(u32::MAX);

        let result = retry.wrap(handler)(Context::new(), Message::new("x")).await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(retry.stats().exhausted(), 1);
        assert_eq!(retry.stats().retries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_not_retried() {
        let retry = Retry::new(config(5));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let handler = handler_fn(move |_ctx, _msg| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(crate::errors::validation("bad input").into()) }
        });

        let err = retry.wrap(handler)(Context::new(), Message::new("x"))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(errors::kind(&*err), errors::ErrorKind::InvalidInput);
        assert_eq!(retry.stats().retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_backoff_wait() {
        let retry = Retry::new(RetryConfig {
            initial_interval_ms: 60_000,
            ..config(5)
        });
        let (handler, calls, _) = flaky(u32::MAX);
        let ctx = Context::new();

        let wrapped = retry.wrap(handler);
        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move { wrapped(ctx, Message::new("x")).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let cancelled_at = Instant::now();
        ctx.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "transient");
        assert!(Instant::now() - cancelled_at < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retry.stats().aborted(), 1);
        assert_eq!(retry.stats().exhausted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_stats() {
        let retry = Retry::new(config(2));
        let clone = retry.clone();
        let (handler, _, _) = flaky(0);

        clone.wrap(handler)(Context::new(), Message::new("x"))
            .await
            .unwrap();

        assert_eq!(retry.stats().attempts(), 1);
    }
}
