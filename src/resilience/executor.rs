use futures::FutureExt;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::config::RetryPolicy;
use crate::core::action::{ActionResult, Operation, RetryContext};
use crate::core::error::ErrorKind;
use super::classify::{Classify, generic_message};

/// Runs remote operations with classification, bounded exponential backoff
/// and friendly failure messages. Holds only configuration, so one executor
/// can serve any number of concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct ActionExecutor {
    policy: RetryPolicy,
}

impl ActionExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<D, E, F, Fut>(
        &self,
        operation: Operation,
        resource_id: &str,
        attempt: F,
    ) -> ActionResult<D>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<D, E>>,
        E: Display + Classify,
    {
        execute_with_retry(operation, resource_id, &self.policy, attempt).await
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Invoke `attempt` until it succeeds, fails permanently, or the retry budget
/// runs out.
///
/// Attempts are strictly sequential. Before retry `n` (0-based) the executor
/// waits `base_delay * 2^n`. A panic inside an attempt ends the chain with an
/// `Unknown` failure and is not retried.
pub async fn execute_with_retry<D, E, F, Fut>(
    operation: Operation,
    resource_id: &str,
    policy: &RetryPolicy,
    mut attempt: F,
) -> ActionResult<D>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<D, E>>,
    E: Display + Classify,
{
    let mut ctx = RetryContext::new(operation, resource_id);

    loop {
        let outcome = AssertUnwindSafe(attempt()).catch_unwind().await;
        let attempts = ctx.attempt + 1;

        let (raw, classification) = match outcome {
            Ok(Ok(data)) => {
                if ctx.attempt > 0 {
                    log::info!(
                        "{} on {} succeeded after {} attempts",
                        operation,
                        resource_id,
                        attempts
                    );
                }
                return ActionResult::succeeded(data, attempts);
            }
            Ok(Err(e)) => (e.to_string(), e.classification()),
            Err(payload) => {
                log::error!(
                    "{} on {} panicked: {}",
                    operation,
                    resource_id,
                    panic_text(payload.as_ref())
                );
                return ActionResult::failed(
                    ErrorKind::Unknown,
                    generic_message(operation),
                    attempts,
                );
            }
        };

        ctx.last_error_kind = Some(classification.kind);

        if classification.retryable && ctx.attempt < policy.max_retries {
            let delay = policy.delay_for(ctx.attempt);
            log::debug!(
                "{} on {} failed ({}), retry {}/{} in {:?}: {}",
                operation,
                resource_id,
                classification.kind,
                ctx.attempt + 1,
                policy.max_retries,
                delay,
                raw
            );
            tokio::time::sleep(delay).await;
            ctx.attempt += 1;
            continue;
        }

        log::warn!(
            "{} on {} failed after {} attempt(s) ({}): {}",
            operation,
            resource_id,
            attempts,
            classification.kind,
            raw
        );
        return ActionResult::failed(
            classification.kind,
            classification.friendly_message(operation),
            attempts,
        );
    }
}
