pub mod granular;
pub mod job;
pub mod schedule;
pub mod timer;

pub use granular::GranularDuration;
pub use job::{DelayedJob, DelayedJobBuilder};
pub use schedule::Priority;
pub use timer::{TimerError, TimerHandle, TimerService};
