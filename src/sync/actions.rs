//! Email and task actions with optimistic state.
//!
//! [`ActionRunner::run`] applies the local override, drives the remote call
//! through the executor, then commits or rolls back. Actions on the same
//! resource are serialized; actions on different resources run freely.

use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::RetryPolicy;
use crate::core::action::{ActionResult, ConvertOptions, FailedAction, PendingAction};
use crate::core::error::RemoteError;
use crate::resilience::optimistic::{
    ARCHIVED, COMPLETED, CONVERTED, DELETED, MARKED_READ, OptimisticOverride,
};
use crate::resilience::{ActionExecutor, OptimisticState};
use super::remote::{ApiResponse, Remote};

/// Holds the most recent terminal failure. A newer failure replaces an older
/// one, whichever resource it was for.
#[derive(Debug, Default)]
pub struct FailedActionSlot {
    inner: Mutex<Option<FailedAction>>,
}

impl FailedActionSlot {
    pub fn record(&self, failed: FailedAction) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.as_ref() {
            log::debug!(
                "Replacing failed {} on {} with {} on {}",
                previous.action.operation(),
                previous.action.resource_id(),
                failed.action.operation(),
                failed.action.resource_id()
            );
        }
        *slot = Some(failed);
    }

    pub fn peek(&self) -> Option<FailedAction> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn take(&self) -> Option<FailedAction> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Override fields an action sets while it is in flight.
fn optimistic_fields(action: &PendingAction) -> Vec<(&'static str, bool)> {
    match action {
        PendingAction::Archive { .. } => vec![(ARCHIVED, true)],
        PendingAction::MarkRead { read, .. } => vec![(MARKED_READ, *read)],
        PendingAction::ConvertToTask { options, .. } => {
            let mut fields = vec![(CONVERTED, true)];
            if options.archive_email {
                fields.push((ARCHIVED, true));
            }
            fields
        }
        PendingAction::CompleteTask { .. } => vec![(COMPLETED, true)],
        PendingAction::DeleteTask { .. } => vec![(DELETED, true)],
    }
}

pub struct ActionRunner<R> {
    remote: Arc<R>,
    executor: ActionExecutor,
    optimistic: Arc<OptimisticState>,
    last_failed: FailedActionSlot,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R: Remote> ActionRunner<R> {
    pub fn new(remote: Arc<R>, policy: RetryPolicy, optimistic: Arc<OptimisticState>) -> Self {
        Self {
            remote,
            executor: ActionExecutor::new(policy),
            optimistic,
            last_failed: FailedActionSlot::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn optimistic(&self) -> &Arc<OptimisticState> {
        &self.optimistic
    }

    /// The failure `retry_last_failed_action` would replay, if any.
    pub fn last_failed(&self) -> Option<FailedAction> {
        self.last_failed.peek()
    }

    fn resource_lock(&self, resource_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(resource_id.to_string()).or_default().clone()
    }

    fn release_lock(&self, resource_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(lock);
        if locks
            .get(resource_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(resource_id);
        }
    }

    async fn dispatch(&self, action: &PendingAction) -> Result<Value, RemoteError> {
        let resp: ApiResponse<Value> = match action {
            PendingAction::Archive { email_id } => {
                self.remote
                    .post(&format!("emails/{}/archive", email_id), &json!({}))
                    .await
            }
            PendingAction::MarkRead { email_id, read } => {
                self.remote
                    .post(&format!("emails/{}/read", email_id), &json!({ "read": read }))
                    .await
            }
            PendingAction::ConvertToTask { email_id, options } => {
                self.remote
                    .post(&format!("emails/{}/convert", email_id), options)
                    .await
            }
            PendingAction::CompleteTask { task_id } => {
                self.remote
                    .post(&format!("tasks/{}/complete", task_id), &json!({}))
                    .await
            }
            PendingAction::DeleteTask { task_id } => {
                self.remote.del(&format!("tasks/{}", task_id)).await
            }
        };
        Ok(resp.into_data()?.unwrap_or(Value::Null))
    }

    /// Apply the action's overrides, perform it with retries, then commit or
    /// roll back. A terminal failure is remembered for replay.
    pub async fn run(&self, action: PendingAction) -> ActionResult<Value> {
        let operation = action.operation();
        let resource_id = action.resource_id().to_string();
        let fields = optimistic_fields(&action);

        let lock = self.resource_lock(&resource_id);
        let result = {
            let _guard = lock.lock().await;
            let current = self.optimistic.snapshot();
            let prior: Vec<Option<OptimisticOverride>> = fields
                .iter()
                .map(|(field, _)| current.get(&resource_id, field).cloned())
                .collect();
            for (field, value) in &fields {
                self.optimistic.apply(&resource_id, field, *value);
            }

            log::info!("Starting {} on {}", operation, resource_id);
            let result = self
                .executor
                .execute(operation, &resource_id, || self.dispatch(&action))
                .await;

            if result.success {
                for (field, _) in &fields {
                    self.optimistic.commit(&resource_id, field);
                }
                log::info!("{} on {} succeeded", operation, resource_id);
            } else {
                for ((field, _), prior) in fields.iter().zip(prior) {
                    self.optimistic.restore(&resource_id, field, prior);
                }
                if let Some(kind) = result.error_kind {
                    self.last_failed.record(FailedAction {
                        action,
                        kind,
                        message: result.message.clone(),
                        failed_at: Utc::now(),
                    });
                }
            }
            result
        };
        self.release_lock(&resource_id, lock);
        result
    }

    /// Forget confirmed overrides on `resource_id`. Call after its
    /// authoritative state has been reloaded.
    pub fn settle(&self, resource_id: &str) -> usize {
        self.optimistic.settle(resource_id)
    }

    /// Forget every confirmed override, typically after a full list reload.
    pub fn settle_all(&self) -> usize {
        self.optimistic.prune_committed()
    }

    /// Replay the most recent failed action exactly as it was issued. `None`
    /// when nothing has failed since the last replay.
    pub async fn retry_last_failed_action(&self) -> Option<ActionResult<Value>> {
        let failed = self.last_failed.take()?;
        log::info!(
            "Retrying {} on {} (failed with {})",
            failed.action.operation(),
            failed.action.resource_id(),
            failed.kind
        );
        Some(self.run(failed.action).await)
    }

    pub async fn archive(&self, email_id: &str) -> ActionResult<Value> {
        self.run(PendingAction::Archive {
            email_id: email_id.to_string(),
        })
        .await
    }

    pub async fn mark_read(&self, email_id: &str, read: bool) -> ActionResult<Value> {
        self.run(PendingAction::MarkRead {
            email_id: email_id.to_string(),
            read,
        })
        .await
    }

    pub async fn convert_to_task(
        &self,
        email_id: &str,
        options: ConvertOptions,
    ) -> ActionResult<Value> {
        self.run(PendingAction::ConvertToTask {
            email_id: email_id.to_string(),
            options,
        })
        .await
    }

    pub async fn complete_task(&self, task_id: &str) -> ActionResult<Value> {
        self.run(PendingAction::CompleteTask {
            task_id: task_id.to_string(),
        })
        .await
    }

    pub async fn delete_task(&self, task_id: &str) -> ActionResult<Value> {
        self.run(PendingAction::DeleteTask {
            task_id: task_id.to_string(),
        })
        .await
    }

    /// Whether a view should show the email as archived.
    pub fn is_archived(&self, email_id: &str, authoritative: bool) -> bool {
        self.optimistic.resolve(email_id, ARCHIVED, authoritative)
    }

    pub fn is_read(&self, email_id: &str, authoritative: bool) -> bool {
        self.optimistic.resolve(email_id, MARKED_READ, authoritative)
    }

    pub fn is_completed(&self, task_id: &str, authoritative: bool) -> bool {
        self.optimistic.resolve(task_id, COMPLETED, authoritative)
    }
}
