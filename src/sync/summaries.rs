use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;

use crate::cache::{Cache, Fetched};
use crate::config::{CacheTtls, RetryPolicy};
use crate::core::action::{ActionResult, Operation};
use crate::core::error::RemoteError;
use crate::core::models::{DayPlan, EmailSummary};
use crate::resilience::ActionExecutor;
use super::remote::Remote;

pub const SUMMARY_PREFIX: &str = "summary:";
pub const PLAN_PREFIX: &str = "plan:";

pub fn summary_key(email_id: &str) -> String {
    format!("{}{}", SUMMARY_PREFIX, email_id)
}

pub fn plan_key(date: NaiveDate) -> String {
    format!("{}{}", PLAN_PREFIX, date)
}

/// Generated content (email summaries, the day plan) read through the cache.
///
/// A fresh cache hit skips the network. When the backend is unreachable the
/// last stored value is served with `is_stale` set; any other failure is
/// reported as-is.
pub struct Summaries<R> {
    remote: Arc<R>,
    cache: Arc<Cache>,
    executor: ActionExecutor,
    ttls: CacheTtls,
}

impl<R: Remote> Summaries<R> {
    pub fn new(remote: Arc<R>, cache: Arc<Cache>, policy: RetryPolicy, ttls: CacheTtls) -> Self {
        Self {
            remote,
            cache,
            executor: ActionExecutor::new(policy),
            ttls,
        }
    }

    async fn fetch_summary(&self, email_id: &str) -> Result<EmailSummary, RemoteError> {
        self.remote
            .get(&format!("emails/{}/summary", email_id))
            .await
            .into_result()
    }

    async fn fetch_plan(&self, date: NaiveDate) -> Result<DayPlan, RemoteError> {
        self.remote.get(&format!("plans/{}", date)).await.into_result()
    }

    async fn request_plan(&self, date: NaiveDate) -> Result<DayPlan, RemoteError> {
        self.remote
            .post(&format!("plans/{}/regenerate", date), &json!({}))
            .await
            .into_result()
    }

    pub async fn summary(&self, email_id: &str) -> ActionResult<Fetched<EmailSummary>> {
        let key = summary_key(email_id);
        let ttl = self.ttls.summary();
        self.executor
            .execute(Operation::LoadSummary, email_id, || {
                self.cache
                    .get_or_fetch(&key, ttl, || self.fetch_summary(email_id))
            })
            .await
    }

    pub async fn plan(&self, date: NaiveDate) -> ActionResult<Fetched<DayPlan>> {
        let key = plan_key(date);
        let ttl = self.ttls.plan();
        let resource = date.to_string();
        self.executor
            .execute(Operation::LoadPlan, &resource, || {
                self.cache.get_or_fetch(&key, ttl, || self.fetch_plan(date))
            })
            .await
    }

    /// Ask the backend for a new plan and replace the cached one with it.
    /// The cached plan is left alone on failure.
    pub async fn regenerate_plan(&self, date: NaiveDate) -> ActionResult<DayPlan> {
        let resource = date.to_string();
        let result = self
            .executor
            .execute(Operation::RegeneratePlan, &resource, || self.request_plan(date))
            .await;

        if let Some(plan) = &result.data {
            self.cache.set(&plan_key(date), plan, self.ttls.plan());
        }
        result
    }

    /// Drop every cached plan and summary so the next reads go to the backend.
    pub fn reset_day(&self) -> usize {
        let removed =
            self.cache.clear_by_prefix(PLAN_PREFIX) + self.cache.clear_by_prefix(SUMMARY_PREFIX);
        log::info!("Reset day: dropped {} cached entries", removed);
        removed
    }
}
