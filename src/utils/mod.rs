pub mod logging;
pub mod polling;

pub use polling::{cancellable_sleep, poll_until, PollOutcome, PollSpec};
