//! Plan upgrades. Billing confirms an upgrade asynchronously (via a payment
//! webhook), so after the upgrade call succeeds the tier is polled until it
//! moves off the old value.

use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use crate::config::{PollOptions, RetryPolicy};
use crate::core::action::{ActionResult, Operation};
use crate::core::error::RemoteError;
use crate::core::models::Subscription;
use crate::resilience::{ActionExecutor, PollOutcome, PollReconciler};
use super::remote::{ApiResponse, Remote};

pub const SUBSCRIPTION_TARGET: &str = "subscription";

#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeOutcome {
    pub result: ActionResult<Value>,
    /// `None` when the upgrade call itself failed and nothing was polled.
    pub reconciliation: Option<PollOutcome>,
}

pub struct SubscriptionSync<R> {
    remote: Arc<R>,
    executor: ActionExecutor,
    reconciler: Arc<PollReconciler>,
    poll: PollOptions,
    tier: Mutex<Option<String>>,
}

impl<R: Remote> SubscriptionSync<R> {
    pub fn new(
        remote: Arc<R>,
        policy: RetryPolicy,
        poll: PollOptions,
        reconciler: Arc<PollReconciler>,
    ) -> Self {
        Self {
            remote,
            executor: ActionExecutor::new(policy),
            reconciler,
            poll,
            tier: Mutex::new(None),
        }
    }

    /// Last tier seen from the backend.
    pub fn tier(&self) -> Option<String> {
        self.tier.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn store(&self, tier: &str) {
        *self.tier.lock().unwrap_or_else(|e| e.into_inner()) = Some(tier.to_string());
    }

    async fn fetch_tier(&self) -> Result<String, RemoteError> {
        let sub: Subscription = self.remote.get("billing/subscription").await.into_result()?;
        self.store(&sub.tier);
        Ok(sub.tier)
    }

    /// One poll read. With `only` set, any tier other than that one reads as
    /// `None` so it cannot count as a change.
    async fn poll_tier(&self, only: Option<&str>) -> Result<Option<String>, RemoteError> {
        let tier = self.fetch_tier().await?;
        match only {
            Some(target) if target != tier => Ok(None),
            _ => Ok(Some(tier)),
        }
    }

    async fn request_upgrade(&self, tier: &str) -> Result<Value, RemoteError> {
        let resp: ApiResponse<Value> = self
            .remote
            .post("billing/upgrade", &json!({ "tier": tier }))
            .await;
        Ok(resp.into_data()?.unwrap_or(Value::Null))
    }

    /// Re-read the tier from the backend.
    pub async fn refresh(&self) -> Result<String, RemoteError> {
        self.fetch_tier().await.inspect_err(|e| {
            log::warn!("Subscription refresh failed: {}", e);
        })
    }

    /// Request `tier`, then poll until billing reflects it. The tier known
    /// before the call is the baseline; if none is known yet it is fetched
    /// first. When that read fails too, only seeing `tier` itself resolves
    /// the poll.
    pub async fn upgrade(&self, tier: &str) -> UpgradeOutcome {
        let baseline = match self.tier() {
            Some(known) => Some(known),
            None => self.refresh().await.ok(),
        };

        let result = self
            .executor
            .execute(Operation::UpgradeSubscription, tier, || self.request_upgrade(tier))
            .await;

        if !result.success {
            return UpgradeOutcome {
                result,
                reconciliation: None,
            };
        }

        let only = match baseline {
            Some(_) => None,
            None => {
                log::debug!("No baseline tier, polling for {} only", tier);
                Some(tier)
            }
        };
        let outcome = self
            .reconciler
            .reconcile(
                SUBSCRIPTION_TARGET,
                || self.poll_tier(only),
                baseline,
                Some(Some(tier.to_string())),
                &self.poll,
                || async {
                    let _ = self.refresh().await;
                },
            )
            .await;

        UpgradeOutcome {
            result,
            reconciliation: Some(outcome),
        }
    }

    /// Stop a running upgrade poll. No final refresh happens.
    pub fn cancel(&self) -> bool {
        self.reconciler.cancel(SUBSCRIPTION_TARGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::sync::testing::ScriptedRemote;
    use std::time::Duration;
    use tokio::time::Instant;

    const SUB: &str = "billing/subscription";

    fn sync(remote: &Arc<ScriptedRemote>) -> SubscriptionSync<ScriptedRemote> {
        SubscriptionSync::new(
            remote.clone(),
            RetryPolicy { max_retries: 2, base_delay_ms: 1000 },
            PollOptions {
                max_attempts: 3,
                interval_ms: 100,
                initial_delay_ms: 50,
            },
            Arc::new(PollReconciler::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn upgrade_that_never_lands_refreshes_once() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.ok("GET", SUB, json!({ "tier": "free" }));
        remote.ok("POST", "billing/upgrade", json!({ "checkout": "done" }));
        let sync = sync(&remote);
        sync.refresh().await.unwrap();

        let started = Instant::now();
        let outcome = sync.upgrade("pro").await;
        let waited = started.elapsed();

        assert!(outcome.result.success);
        assert_eq!(outcome.reconciliation, Some(PollOutcome::Exhausted));
        // One baseline read, three polls, one terminal refresh.
        assert_eq!(remote.count("GET", SUB), 5);
        assert!(waited >= Duration::from_millis(250) && waited < Duration::from_millis(260));
        assert_eq!(sync.tier().as_deref(), Some("free"));
    }

    #[tokio::test(start_paused = true)]
    async fn upgrade_resolves_when_tier_moves() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.ok("GET", SUB, json!({ "tier": "free" }));
        remote.ok("GET", SUB, json!({ "tier": "free" }));
        remote.ok("GET", SUB, json!({ "tier": "pro" }));
        remote.ok("POST", "billing/upgrade", json!({}));
        let sync = sync(&remote);

        let outcome = sync.upgrade("pro").await;

        assert_eq!(outcome.reconciliation, Some(PollOutcome::Changed));
        assert_eq!(sync.tier().as_deref(), Some("pro"));
        assert_eq!(remote.count("GET", SUB), 3);
        assert_eq!(remote.calls()[1].body, Some(json!({ "tier": "pro" })));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_upgrade_does_not_poll() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.ok("GET", SUB, json!({ "tier": "free" }));
        remote.fail("POST", "billing/upgrade", 403, "card declined");
        let sync = sync(&remote);

        let outcome = sync.upgrade("pro").await;

        assert!(!outcome.result.success);
        assert_eq!(outcome.result.error_kind, Some(ErrorKind::Forbidden));
        assert_eq!(outcome.reconciliation, None);
        assert_eq!(remote.count("GET", SUB), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_upgrade_poll_skips_refresh() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.ok("GET", SUB, json!({ "tier": "free" }));
        remote.ok("POST", "billing/upgrade", json!({}));
        let sync = sync(&remote);
        sync.refresh().await.unwrap();

        let (outcome, cancelled) = tokio::join!(sync.upgrade("pro"), async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            sync.cancel()
        });

        assert!(cancelled);
        assert_eq!(outcome.reconciliation, Some(PollOutcome::Cancelled));
        // Baseline read plus the first poll at 50ms; the second was due at 150ms.
        assert_eq!(remote.count("GET", SUB), 2);
        assert!(!sync.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_baseline_ignores_the_old_tier() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.fail("GET", SUB, 0, "connection refused");
        remote.ok("GET", SUB, json!({ "tier": "free" }));
        remote.ok("POST", "billing/upgrade", json!({}));
        let sync = sync(&remote);

        let outcome = sync.upgrade("pro").await;

        assert!(outcome.result.success);
        assert_eq!(outcome.reconciliation, Some(PollOutcome::Exhausted));
        assert_eq!(sync.tier().as_deref(), Some("free"));
        assert_eq!(remote.count("GET", SUB), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_baseline_resolves_on_target_tier() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.fail("GET", SUB, 0, "connection refused");
        remote.ok("GET", SUB, json!({ "tier": "free" }));
        remote.ok("GET", SUB, json!({ "tier": "pro" }));
        remote.ok("POST", "billing/upgrade", json!({}));
        let sync = sync(&remote);

        let outcome = sync.upgrade("pro").await;

        assert_eq!(outcome.reconciliation, Some(PollOutcome::Changed));
        assert_eq!(sync.tier().as_deref(), Some("pro"));
        assert_eq!(remote.count("GET", SUB), 3);
    }
}
