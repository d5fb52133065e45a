pub mod classify;
pub mod executor;
pub mod optimistic;
pub mod poll;

pub use classify::{Classification, Classify, classify, classify_remote, friendly_message};
pub use executor::{ActionExecutor, execute_with_retry};
pub use optimistic::{OptimisticOverride, OptimisticState, OverrideMap};
pub use poll::{PollOutcome, PollReconciler, PollSession};
