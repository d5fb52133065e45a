//! Bounded polling until an asynchronous backend change becomes visible.
//!
//! A session waits `initial_delay`, then fetches up to `max_attempts` times,
//! `interval` apart. It resolves as soon as the value leaves the baseline or
//! equals the expected value. When the budget runs out it runs the caller's
//! refresh exactly once before resolving. A cancelled session never refreshes.
//!
//! Sessions are keyed by target. Starting a session for a target cancels the
//! one already running for it.

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::PollOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The value moved away from the baseline.
    Changed,
    /// The value equals the expected value.
    Matched,
    /// Attempts ran out; the terminal refresh has run.
    Exhausted,
    /// Cancelled before resolving; no refresh ran.
    Cancelled,
}

impl PollOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, Self::Changed | Self::Matched)
    }
}

/// Live bookkeeping for one reconciliation.
#[derive(Debug, Clone)]
pub struct PollSession<V> {
    pub target: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub interval: Duration,
    pub expected: Option<V>,
    pub baseline: V,
}

impl<V: PartialEq> PollSession<V> {
    fn evaluate(&self, current: &V) -> Option<PollOutcome> {
        if *current != self.baseline {
            Some(PollOutcome::Changed)
        } else if self.expected.as_ref() == Some(current) {
            Some(PollOutcome::Matched)
        } else {
            None
        }
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

struct ActiveSession {
    id: u64,
    cancel: watch::Sender<bool>,
}

/// Registry of running poll sessions, at most one per target.
#[derive(Default)]
pub struct PollReconciler {
    active: Mutex<HashMap<String, ActiveSession>>,
    next_id: AtomicU64,
}

/// Deregisters a session however `reconcile` ends, including when its
/// future is dropped mid-poll.
struct SessionGuard<'a> {
    reconciler: &'a PollReconciler,
    target: &'a str,
    id: u64,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.reconciler.finish(self.target, self.id);
    }
}

/// Sleep for `duration` unless cancelled first. Returns true when cancelled.
pub(crate) async fn wait_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => *cancel.borrow(),
        changed = cancel.changed() => changed.is_err() || *cancel.borrow(),
    }
}

impl PollReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, target: &str) -> (u64, watch::Receiver<bool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prior) = active.insert(target.to_string(), ActiveSession { id, cancel: tx }) {
            log::debug!("Replacing poll session {} for {}", prior.id, target);
            let _ = prior.cancel.send(true);
        }
        (id, rx)
    }

    fn finish(&self, target: &str, id: u64) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.get(target).is_some_and(|s| s.id == id) {
            active.remove(target);
        }
    }

    pub fn is_active(&self, target: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(target)
    }

    /// Cancel the session for `target`, if any. Returns whether one was running.
    pub fn cancel(&self, target: &str) -> bool {
        let removed = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(target);
        match removed {
            Some(session) => {
                let _ = session.cancel.send(true);
                log::debug!("Cancelled poll session for {}", target);
                true
            }
            None => false,
        }
    }

    /// Cancel every running session, e.g. on view teardown.
    pub fn cancel_all(&self) {
        let drained: Vec<(String, ActiveSession)> = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (target, session) in drained {
            let _ = session.cancel.send(true);
            log::debug!("Cancelled poll session for {}", target);
        }
    }

    /// Poll `fetch_current` for `target` until it converges, runs out of
    /// attempts, or is cancelled. `refresh` runs exactly once, and only on
    /// [`PollOutcome::Exhausted`].
    ///
    /// Fetch errors count as an attempt that saw no change.
    pub async fn reconcile<V, E, F, Fut, R, RFut>(
        &self,
        target: &str,
        mut fetch_current: F,
        baseline: V,
        expected: Option<V>,
        opts: &PollOptions,
        refresh: R,
    ) -> PollOutcome
    where
        V: PartialEq + Debug,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        R: FnOnce() -> RFut,
        RFut: Future<Output = ()>,
    {
        let (id, mut cancel) = self.register(target);
        let _registered = SessionGuard {
            reconciler: self,
            target,
            id,
        };
        let mut session = PollSession {
            target: target.to_string(),
            attempt: 0,
            max_attempts: opts.max_attempts,
            interval: opts.interval(),
            expected,
            baseline,
        };

        log::debug!(
            "Polling {} (baseline {:?}, expected {:?}, up to {} attempts)",
            session.target,
            session.baseline,
            session.expected,
            session.max_attempts
        );

        let outcome = 'poll: {
            if wait_or_cancel(opts.initial_delay(), &mut cancel).await {
                break 'poll PollOutcome::Cancelled;
            }

            loop {
                if session.exhausted() {
                    if *cancel.borrow() {
                        break 'poll PollOutcome::Cancelled;
                    }
                    refresh().await;
                    break 'poll PollOutcome::Exhausted;
                }

                if session.attempt > 0 && wait_or_cancel(session.interval, &mut cancel).await {
                    break 'poll PollOutcome::Cancelled;
                }

                session.attempt += 1;
                let fetched = fetch_current().await;

                if *cancel.borrow() {
                    break 'poll PollOutcome::Cancelled;
                }

                match fetched {
                    Ok(current) => {
                        if let Some(resolved) = session.evaluate(&current) {
                            break 'poll resolved;
                        }
                    }
                    Err(e) => log::debug!(
                        "Poll {} attempt {} failed: {}",
                        session.target,
                        session.attempt,
                        e
                    ),
                }
            }
        };

        log::info!(
            "Poll {} resolved {:?} after {} attempt(s)",
            session.target,
            outcome,
            session.attempt
        );
        outcome
    }
}
