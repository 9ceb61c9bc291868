use crate::error::{ErrorKind, PlayerError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bounded exponential backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

/// Tracks retry attempts per `(ErrorKind, context)` so distinct failures back off independently
pub struct RetryTracker {
    policy: RetryPolicy,
    attempts: Mutex<HashMap<(ErrorKind, String), u32>>,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure and return how long to wait before retrying.
    ///
    /// Returns `None` for non-retryable kinds or once attempts are exhausted.
    pub fn next_delay(&self, kind: ErrorKind, context_id: &str) -> Option<Duration> {
        if !kind.is_retryable() {
            return None;
        }

        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts
            .entry((kind, context_id.to_string()))
            .or_insert(0);
        *count += 1;

        if *count > self.policy.max_attempts {
            warn!(
                "Giving up on {} after {} attempts ({})",
                context_id, self.policy.max_attempts, kind
            );
            return None;
        }

        Some(self.policy.delay_for(*count))
    }

    /// Forget all attempts recorded for a context
    pub fn reset(&self, context_id: &str) {
        self.attempts
            .lock()
            .unwrap()
            .retain(|(_, ctx), _| ctx != context_id);
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts for its error kind.
    pub async fn run<T, F, Fut>(&self, context_id: &str, mut operation: F) -> Result<T, PlayerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlayerError>>,
    {
        loop {
            match operation().await {
                Ok(value) => {
                    self.reset(context_id);
                    return Ok(value);
                }
                Err(e) => match self.next_delay(e.kind(), context_id) {
                    Some(delay) => {
                        debug!("Retrying {} in {:?} after: {}", context_id, delay, e);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Holds at most one delayed retry. Scheduling a new one or cancelling
/// aborts whatever was still waiting.
#[derive(Default)]
pub struct RetrySlot {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RetrySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` unless cancelled or replaced first.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });
        if let Some(previous) = self.pending.lock().unwrap().replace(task) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(pending) = self.pending.lock().unwrap().take() {
            if !pending.is_finished() {
                debug!("Cancelled pending retry");
            }
            pending.abort();
        }
    }
}
