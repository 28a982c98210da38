use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::schedule::{Priority, RunStep, ScheduleState};
use crate::timer::{deadline_after, TimerService};

/// A job that runs after a delay, with at most one pending or running
/// invocation no matter how often a run is requested. Competing requests
/// resolve through the job's [`Priority`]; the loser is dropped entirely, so
/// a burst of requests collapses into a single invocation.
/// [`cancel`](Self::cancel) drops the pending request, and so does dropping
/// the job. Methods take `&self` and may be called from any thread; the
/// closure itself runs on the timer worker thread.
pub struct DelayedJob {
    core: Arc<JobCore>,
    timer: TimerService,
}

struct JobCore {
    job: Box<dyn Fn() + Send + Sync>,
    priority: Priority,
    state: Mutex<ScheduleState>,
}

impl JobCore {
    fn lock_state(&self) -> MutexGuard<'_, ScheduleState> {
        // no code path panics while holding this lock, so a poisoned state
        // is still consistent
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fire(&self, generation: u64) {
        let current = self.lock_state().on_fire(generation);
        if !current {
            trace!(generation, "stale firing skipped");
            return;
        }
        // state is already idle here, so the job may schedule its own next run
        (self.job)();
    }
}

impl DelayedJob {
    /// Creates a job with the default [`Priority::Later`] and a dedicated
    /// timer worker.
    pub fn new(job: impl Fn() + Send + Sync + 'static) -> Self {
        Self::builder().build(job)
    }

    pub fn with_priority(priority: Priority, job: impl Fn() + Send + Sync + 'static) -> Self {
        Self::builder().priority(priority).build(job)
    }

    pub fn builder() -> DelayedJobBuilder {
        DelayedJobBuilder::default()
    }

    /// Requests a run of the job after `delay` (a [`Duration`] or a
    /// [`GranularDuration`](crate::GranularDuration)). While another request
    /// is pending, the priority compares `delay` against the time remaining
    /// and keeps exactly one of the two. A zero delay still goes through the
    /// timer: the job runs on the worker thread shortly after, never inside
    /// this call.
    pub fn run(&self, delay: impl Into<Duration>) {
        let delay = delay.into();
        let now = Instant::now();
        let mut state = self.core.lock_state();
        match state.on_run(self.core.priority, delay, now) {
            RunStep::Keep => {
                trace!(?delay, "run request lost the tie-break");
            }
            RunStep::Arm { cancel, generation } => {
                if let Some(handle) = cancel {
                    self.timer.cancel(&handle);
                    debug!(?delay, "pending run superseded");
                }
                let core = Arc::clone(&self.core);
                match self.timer.schedule(delay, move || core.fire(generation)) {
                    Ok(handle) => {
                        state.armed(deadline_after(now, delay), handle);
                        debug!(?delay, "run scheduled");
                    }
                    Err(err) => {
                        // only reachable with an embedder-supplied service
                        // that was shut down; the request is dropped
                        error!(%err, "failed to schedule run");
                    }
                }
            }
        }
    }

    /// Cancels the pending run, if any; idempotent. A run past its deadline
    /// but not yet started is still suppressed; an invocation already
    /// underway is not interrupted.
    pub fn cancel(&self) {
        let mut state = self.core.lock_state();
        if let Some(handle) = state.on_cancel() {
            self.timer.cancel(&handle);
            debug!("pending run cancelled");
        }
    }

    /// True while a run is scheduled and has neither fired nor been
    /// cancelled.
    pub fn is_scheduled(&self) -> bool {
        self.core.lock_state().deadline().is_some()
    }

    /// Time left until the pending run fires; zero once the deadline has
    /// passed but the job has not started yet.
    pub fn time_remaining(&self) -> Option<Duration> {
        let deadline = self.core.lock_state().deadline()?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    pub fn priority(&self) -> Priority {
        self.core.priority
    }
}

impl Drop for DelayedJob {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for DelayedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedJob")
            .field("priority", &self.core.priority)
            .field("scheduled", &self.is_scheduled())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct DelayedJobBuilder {
    priority: Priority,
    timer: Option<TimerService>,
}

impl DelayedJobBuilder {
    /// Tie-break policy; defaults to [`Priority::Later`].
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Shares an existing timer service instead of spawning a dedicated
    /// worker. Jobs on one service run their closures sequentially.
    pub fn timer(mut self, timer: TimerService) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn build(self, job: impl Fn() + Send + Sync + 'static) -> DelayedJob {
        // the core never holds the service, so the timer worker can never
        // end up joining its own thread
        DelayedJob {
            core: Arc::new(JobCore {
                job: Box::new(job),
                priority: self.priority,
                state: Mutex::new(ScheduleState::new()),
            }),
            timer: self.timer.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{DelayedJob, Priority};
    use crate::granular::GranularDuration;
    use crate::timer::TimerService;

    #[test]
    fn defaults_to_later_priority_and_idle() {
        let job = DelayedJob::new(|| {});
        assert_eq!(job.priority(), Priority::Later);
        assert!(!job.is_scheduled());
        assert_eq!(job.time_remaining(), None);
    }

    #[test]
    fn run_accepts_granular_durations() {
        let count = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&count);
        let job = DelayedJob::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        job.run(GranularDuration::Milliseconds(10));
        assert!(job.is_scheduled());
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!job.is_scheduled());
    }

    #[test]
    fn time_remaining_tracks_the_pending_deadline() {
        let job = DelayedJob::new(|| {});
        job.run(Duration::from_secs(60));
        let remaining = job.time_remaining().expect("scheduled");
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(59));
        job.cancel();
        assert_eq!(job.time_remaining(), None);
    }

    #[test]
    fn builder_shares_a_timer_service() {
        let timer = TimerService::new();
        let job = DelayedJob::builder()
            .priority(Priority::Sooner)
            .timer(timer.clone())
            .build(|| {});
        assert_eq!(job.priority(), Priority::Sooner);
        drop(job);
        // the service outlives the job
        let (tx, rx) = std::sync::mpsc::channel();
        timer
            .schedule(Duration::from_millis(5), move || {
                tx.send(()).expect("report firing");
            })
            .expect("schedule");
        rx.recv_timeout(Duration::from_secs(1)).expect("fired");
    }

    #[test]
    fn debug_output_shows_priority_and_schedule_state() {
        let job = DelayedJob::with_priority(Priority::Sooner, || {});
        let rendered = format!("{job:?}");
        assert!(rendered.contains("Sooner"));
        assert!(rendered.contains("scheduled: false"));
    }
}
