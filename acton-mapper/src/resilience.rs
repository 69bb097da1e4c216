//! Retry pipeline for database calls
//!
//! Every repository call runs through a [`RetryPipeline`]. Transient failures
//! are retried with a constant, linear or exponential backoff; everything else
//! propagates immediately. Each retry is reported to a [`RetryObserver`],
//! which defaults to structured `tracing` events.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::RetrySettings;
use crate::error::{CancelReason, Error, Result};
use crate::repository::RepositoryOperation;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry
    Constant,
    /// Delay grows by the base delay each retry
    Linear,
    /// Delay doubles each retry
    #[default]
    Exponential,
}

/// Retry budget and backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub backoff: BackoffKind,
    /// Base delay
    pub delay: Duration,
    /// Retries after the first attempt
    pub max_retry_attempts: u32,
    /// Randomize each delay by up to 25% either way
    pub use_jitter: bool,
    /// Upper bound on a single delay
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::Exponential,
            delay: Duration::from_millis(200),
            max_retry_attempts: 3,
            use_jitter: true,
            max_delay: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retry_attempts: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.use_jitter = enabled;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `retry` (0-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let delay = match self.backoff {
            BackoffKind::Constant => self.delay,
            BackoffKind::Linear => self.delay.saturating_mul(retry.saturating_add(1)),
            BackoffKind::Exponential => self
                .delay
                .saturating_mul(2_u32.checked_pow(retry).unwrap_or(u32::MAX)),
        };
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.base_delay(retry);
        if !self.use_jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.75..1.25);
        let jittered = Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay);
        match self.max_delay {
            Some(max) => jittered.min(max),
            None => jittered,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            backoff: settings.backoff,
            delay: Duration::from_millis(settings.delay_ms),
            max_retry_attempts: settings.max_retry_attempts,
            use_jitter: settings.use_jitter,
            max_delay: settings.max_delay_ms.map(Duration::from_millis),
        }
    }
}

/// Where a retried call originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub operation: RepositoryOperation,
    /// Mapped type the call is for
    pub entity: &'static str,
    /// Module that issued the call
    pub module: &'static str,
}

impl CallSite {
    pub fn new(operation: RepositoryOperation, entity: &'static str, module: &'static str) -> Self {
        Self {
            operation,
            entity,
            module,
        }
    }
}

/// A failed attempt that will be retried
#[derive(Debug)]
pub struct RetryEvent<'a> {
    pub site: &'a CallSite,
    /// 1-based number of the retry about to be scheduled
    pub attempt: u32,
    /// Time since the first attempt started
    pub elapsed: Duration,
    /// Delay before the next attempt
    pub delay: Duration,
    pub outcome: &'a Error,
}

/// A call that failed for good
#[derive(Debug)]
pub struct FailureEvent<'a> {
    pub site: &'a CallSite,
    /// Attempts made, including the first
    pub attempts: u32,
    pub elapsed: Duration,
    pub outcome: &'a Error,
}

/// Receives retry and terminal-failure notifications
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, event: &RetryEvent<'_>);

    fn on_failure(&self, event: &FailureEvent<'_>);
}

/// Observer that reports through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_retry(&self, event: &RetryEvent<'_>) {
        tracing::warn!(
            operation = %event.site.operation,
            entity = event.site.entity,
            module = event.site.module,
            attempt = event.attempt,
            elapsed_ms = event.elapsed.as_millis() as u64,
            delay_ms = event.delay.as_millis() as u64,
            outcome = %event.outcome,
            "Database call failed with a transient error, retrying in {:?}",
            event.delay
        );
    }

    fn on_failure(&self, event: &FailureEvent<'_>) {
        tracing::error!(
            operation = %event.site.operation,
            entity = event.site.entity,
            module = event.site.module,
            attempts = event.attempts,
            elapsed_ms = event.elapsed.as_millis() as u64,
            error = %event.outcome,
            "Database call failed after {} attempt(s)",
            event.attempts
        );
    }
}

/// Runs calls under a [`RetryPolicy`], reporting to a [`RetryObserver`]
#[derive(Clone)]
pub struct RetryPipeline {
    policy: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl std::fmt::Debug for RetryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPipeline")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPipeline {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryPipeline {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: Arc::new(TracingObserver),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails fatally or exhausts the retry budget
    ///
    /// The call and every backoff wait race against `cancel`; cancellation
    /// returns [`Error::Cancelled`] at once and is never retried. After the
    /// last retry the final transient error is returned unchanged.
    pub async fn execute<T, F, Fut>(
        &self,
        site: &CallSite,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let started = Instant::now();
        let mut retry: u32 = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled(CancelReason::Caller)),
                outcome = call() => outcome,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.is_transient() && retry < self.policy.max_retry_attempts {
                let delay = self.policy.delay_for(retry);
                retry += 1;
                self.observer.on_retry(&RetryEvent {
                    site,
                    attempt: retry,
                    elapsed: started.elapsed(),
                    delay,
                    outcome: &error,
                });
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled(CancelReason::Caller)),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            if !error.is_cancelled() {
                self.observer.on_failure(&FailureEvent {
                    site,
                    attempts: retry + 1,
                    elapsed: started.elapsed(),
                    outcome: &error,
                });
            }
            return Err(error);
        }
    }
}
