use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::timer::TimerHandle;

/// Tie-break policy for a run requested while another request is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Keep whichever request would fire sooner.
    Sooner,
    /// Keep whichever request would fire later.
    #[default]
    Later,
}

impl Priority {
    /// Decide whether a new request with `delay` left replaces the pending
    /// request with `remaining` left. Ties go to the new request, so
    /// repeating the same delay keeps postponing the run under `Later`.
    pub(crate) fn replaces(self, delay: Duration, remaining: Duration) -> bool {
        match self {
            Priority::Sooner => delay <= remaining,
            Priority::Later => delay >= remaining,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Waiting { deadline: Instant, handle: TimerHandle },
}

/// What a run request decided: arm a new timer (cancelling the superseded
/// handle, tagging the callback with `generation`) or keep the pending one.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RunStep {
    Arm {
        cancel: Option<TimerHandle>,
        generation: u64,
    },
    Keep,
}

/// Scheduling state of one job. Pure bookkeeping: callers pass `now` in and
/// perform the timer effects a [`RunStep`] asks for. The generation counter
/// tags each armed request, and a firing only runs while its generation is
/// still current, so a callback that raced past cancellation no-ops.
#[derive(Debug)]
pub(crate) struct ScheduleState {
    phase: Phase,
    generation: u64,
}

impl ScheduleState {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
        }
    }

    pub(crate) fn on_run(&mut self, priority: Priority, delay: Duration, now: Instant) -> RunStep {
        match self.phase {
            Phase::Idle => {
                self.generation = self.generation.wrapping_add(1);
                RunStep::Arm {
                    cancel: None,
                    generation: self.generation,
                }
            }
            Phase::Waiting { deadline, handle } => {
                let remaining = deadline.saturating_duration_since(now);
                if priority.replaces(delay, remaining) {
                    // idle until the caller re-arms, so a failed schedule
                    // cannot leave the cancelled handle recorded as pending
                    self.phase = Phase::Idle;
                    self.generation = self.generation.wrapping_add(1);
                    RunStep::Arm {
                        cancel: Some(handle),
                        generation: self.generation,
                    }
                } else {
                    RunStep::Keep
                }
            }
        }
    }

    pub(crate) fn armed(&mut self, deadline: Instant, handle: TimerHandle) {
        self.phase = Phase::Waiting { deadline, handle };
    }

    /// Bumping the generation is what suppresses a firing that is already
    /// past the timer but not yet validated.
    pub(crate) fn on_cancel(&mut self) -> Option<TimerHandle> {
        match self.phase {
            Phase::Idle => None,
            Phase::Waiting { handle, .. } => {
                self.generation = self.generation.wrapping_add(1);
                self.phase = Phase::Idle;
                Some(handle)
            }
        }
    }

    /// True when the job should actually run; stale generations report false.
    pub(crate) fn on_fire(&mut self, generation: u64) -> bool {
        match self.phase {
            Phase::Waiting { .. } if generation == self.generation => {
                self.phase = Phase::Idle;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Idle => None,
            Phase::Waiting { deadline, .. } => Some(deadline),
        }
    }
}
