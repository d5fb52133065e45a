use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::cache::{Cache, StaleRead};
use crate::config::{CacheTtls, RetryPolicy};
use crate::core::action::{ActionResult, Operation};
use crate::core::error::RemoteError;
use crate::core::models::Notification;
use crate::resilience::ActionExecutor;
use crate::resilience::poll::wait_or_cancel;
use super::remote::Remote;

pub const NOTIFICATIONS_KEY: &str = "notifications:latest";

/// Notifications in `fetched` whose id is not in `seen`, in fetch order.
pub fn diff_notifications(seen: &HashSet<String>, fetched: &[Notification]) -> Vec<Notification> {
    fetched
        .iter()
        .filter(|n| !seen.contains(&n.id))
        .cloned()
        .collect()
}

/// Polls the notification feed and reports only what is new.
///
/// The first successful poll primes the seen set and reports nothing, so a
/// restart does not replay the whole feed.
pub struct NotificationWatcher<R> {
    remote: Arc<R>,
    cache: Arc<Cache>,
    executor: ActionExecutor,
    ttls: CacheTtls,
    seen: Mutex<Option<HashSet<String>>>,
}

impl<R: Remote> NotificationWatcher<R> {
    pub fn new(remote: Arc<R>, cache: Arc<Cache>, policy: RetryPolicy, ttls: CacheTtls) -> Self {
        Self {
            remote,
            cache,
            executor: ActionExecutor::new(policy),
            ttls,
            seen: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<Vec<Notification>, RemoteError> {
        self.remote.get("notifications").await.into_result()
    }

    /// The last fetched feed, for showing something while offline.
    pub fn latest(&self) -> Option<StaleRead<Vec<Notification>>> {
        self.cache.get_stale(NOTIFICATIONS_KEY)
    }

    /// Fetch the feed once. On success `data` holds the notifications not
    /// reported by an earlier poll.
    pub async fn poll(&self) -> ActionResult<Vec<Notification>> {
        let result = self
            .executor
            .execute(Operation::LoadNotifications, "notifications", || self.fetch())
            .await;

        result.map(|fetched| {
            self.cache
                .set(NOTIFICATIONS_KEY, &fetched, self.ttls.notifications());
            let ids: HashSet<String> = fetched.iter().map(|n| n.id.clone()).collect();

            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            let fresh = match seen.as_ref() {
                Some(previous) => diff_notifications(previous, &fetched),
                None => {
                    log::debug!("Priming notification watcher with {} ids", ids.len());
                    Vec::new()
                }
            };
            *seen = Some(ids);
            fresh
        })
    }

    /// Poll every `every` until `cancel` turns true, handing each non-empty
    /// batch of new notifications to `on_new`.
    pub async fn run(
        &self,
        every: Duration,
        mut cancel: watch::Receiver<bool>,
        mut on_new: impl FnMut(Vec<Notification>),
    ) {
        log::info!("Watching notifications every {:?}", every);
        loop {
            let result = self.poll().await;
            match result.data {
                Some(fresh) if !fresh.is_empty() => {
                    log::info!("{} new notification(s)", fresh.len());
                    on_new(fresh);
                }
                Some(_) => {}
                None => log::debug!("Notification poll failed: {}", result.message),
            }

            if wait_or_cancel(every, &mut cancel).await {
                break;
            }
        }
        log::info!("Stopped watching notifications");
    }
}
