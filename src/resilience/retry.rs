//! Retry with exponential backoff.
//!
//! # Responsibilities
//! - Re-invoke a failing operation up to `retries` more times
//! - Wait `backoff::calculate_backoff` between attempts
//! - Report the first error once attempts are exhausted
//!
//! # Design Decisions
//! - Attempts of one invocation are strictly sequential
//! - Every error counts as retryable; callers that need classification
//!   convert permanent failures before wrapping
//! - The first error is the one surfaced: the earliest failure is usually the
//!   most diagnostic, later ones are logged

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::function_set::{Operation, Policy};

/// Errors collected across the attempts of one invocation, in order.
struct Attempts<E> {
    first: E,
    later: Vec<E>,
}

impl<E> Attempts<E> {
    fn new(first: E) -> Self {
        Self {
            first,
            later: Vec::new(),
        }
    }

    fn record(&mut self, err: E) {
        self.later.push(err);
    }

    fn count(&self) -> usize {
        1 + self.later.len()
    }

    fn last(&self) -> &E {
        self.later.last().unwrap_or(&self.first)
    }
}

/// Invoke `f` until it succeeds or the policy runs out of attempts.
async fn run_with_retries<A, T, E, F, Fut>(
    name: &str,
    config: &RetryConfig,
    f: &F,
    args: A,
) -> Result<T, E>
where
    A: Clone,
    E: fmt::Display,
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = match f(args.clone()).await {
        Ok(value) => return Ok(value),
        Err(err) => {
            tracing::debug!(operation = %name, attempt = 0, error = %err, "Attempt failed");
            Attempts::new(err)
        }
    };

    for attempt in 1..=config.retries {
        let delay = calculate_backoff(attempt, config);
        tracing::debug!(operation = %name, attempt, delay = ?delay, "Retrying");
        tokio::time::sleep(delay).await;
        metrics::record_retry_attempt(name);

        match f(args.clone()).await {
            Ok(value) => {
                tracing::debug!(operation = %name, attempt, "Succeeded after retry");
                return Ok(value);
            }
            Err(err) => {
                tracing::debug!(operation = %name, attempt, error = %err, "Attempt failed");
                attempts.record(err);
            }
        }
    }

    tracing::warn!(
        operation = %name,
        attempts = attempts.count(),
        first_error = %attempts.first,
        last_error = %attempts.last(),
        "Retries exhausted"
    );
    metrics::record_retry_exhausted(name);
    Err(attempts.first)
}

/// Retry policy. Cheap to clone; holds no per-invocation state.
#[derive(Debug, Clone, Default)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Policy for Retry {
    fn wrap<A, T, E>(&self, op: Operation<A, T, E>) -> Operation<A, T, E>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let config = Arc::new(self.config.clone());
        let inner = op.clone();
        Operation::new(op.name(), move |args: A| {
            let config = Arc::clone(&config);
            let inner = inner.clone();
            async move {
                let call = |a: A| inner.call(a);
                run_with_retries(inner.name(), &config, &call, args).await
            }
            .boxed()
        })
    }
}

/// A function wrapped by a [`Retry`] policy.
pub struct Retrying<F> {
    name: Arc<str>,
    f: Arc<F>,
    config: Arc<RetryConfig>,
}

impl<F> Clone for Retrying<F> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            f: Arc::clone(&self.f),
            config: Arc::clone(&self.config),
        }
    }
}

impl<F> Retrying<F> {
    /// Name used when tracing attempts.
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the wrapped function, retrying failures.
    pub fn call<A, T, E, Fut>(&self, args: A) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let name = Arc::clone(&self.name);
        let f = Arc::clone(&self.f);
        let config = Arc::clone(&self.config);
        async move { run_with_retries(&name, &config, f.as_ref(), args).await }
    }
}

/// Wrap `f` so failures are retried under `config`.
pub fn retry<F>(f: F, config: RetryConfig) -> Retrying<F> {
    Retrying {
        name: Arc::from("retried"),
        f: Arc::new(f),
        config: Arc::new(config),
    }
}
