pub mod actions;
pub mod notifications;
pub mod remote;
pub mod subscription;
pub mod summaries;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::{ActionRunner, FailedActionSlot};
pub use notifications::{NotificationWatcher, diff_notifications};
pub use remote::{ApiClient, ApiResponse, Remote};
pub use subscription::{SubscriptionSync, UpgradeOutcome};
pub use summaries::Summaries;
