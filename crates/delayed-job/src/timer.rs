use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

/// Opaque identifier for a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
}

impl TimerHandle {
    pub(crate) const fn new(id: u64) -> Self {
        Self { id }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TimerError {
    #[error("timer service is stopped")]
    Stopped,
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

enum TimerCmd {
    Schedule {
        id: u64,
        deadline: Instant,
        callback: Callback,
    },
    Cancel {
        id: u64,
    },
    Shutdown,
}

/// Upper bound on a usable delay: a century is effectively never, and it
/// keeps deadline arithmetic within what `Instant` can represent.
pub(crate) const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now + after.min(MAX_DELAY)
}

/// Schedules callbacks to run once after a delay, on a dedicated worker
/// thread shared by every clone. Shutting down (or dropping the last clone)
/// discards pending callbacks without firing them.
#[derive(Clone)]
pub struct TimerService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    tx: Sender<TimerCmd>,
    next_id: AtomicU64,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || run_worker(rx));
        Self {
            inner: Arc::new(ServiceInner {
                tx,
                next_id: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Runs `callback` once on the worker thread, no sooner than `after`
    /// from now. Delays beyond a century are clamped.
    pub fn schedule(
        &self,
        after: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<TimerHandle, TimerError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(TimerError::Stopped);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let cmd = TimerCmd::Schedule {
            id,
            deadline: deadline_after(Instant::now(), after),
            callback: Box::new(callback),
        };
        self.inner.tx.send(cmd).map_err(|_| TimerError::Stopped)?;
        trace!(id, ?after, "timer scheduled");
        Ok(TimerHandle::new(id))
    }

    /// Best-effort: a callback that has not fired yet will not fire. A handle
    /// that already fired, was already cancelled, or is firing right now is
    /// a no-op.
    pub fn cancel(&self, handle: &TimerHandle) {
        let _ = self.inner.tx.send(TimerCmd::Cancel { id: handle.id });
    }

    /// Stops the worker and waits for it to exit; pending callbacks are
    /// discarded. Further `schedule` calls fail with [`TimerError::Stopped`].
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.tx.send(TimerCmd::Shutdown);
        let worker = match self.inner.worker.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.tx.send(TimerCmd::Shutdown);
        let worker = match self.worker.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

struct PendingTimer {
    id: u64,
    deadline: Instant,
    callback: Callback,
}

fn run_worker(rx: Receiver<TimerCmd>) {
    let mut pending: Vec<PendingTimer> = Vec::new();
    debug!("timer worker started");
    loop {
        fire_due(&mut pending);
        let wait = pending
            .iter()
            .map(|timer| timer.deadline)
            .min()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let cmd = match wait {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(cmd) => cmd,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };
        match cmd {
            TimerCmd::Schedule {
                id,
                deadline,
                callback,
            } => {
                pending.push(PendingTimer {
                    id,
                    deadline,
                    callback,
                });
            }
            TimerCmd::Cancel { id } => {
                pending.retain(|timer| timer.id != id);
            }
            TimerCmd::Shutdown => break,
        }
    }
    if pending.is_empty() {
        debug!("timer worker stopped");
    } else {
        debug!(discarded = pending.len(), "timer worker stopped");
    }
}

/// Runs every due callback, earliest deadline first and in scheduling order
/// on exact ties. A panic is contained so the timers behind it still fire.
fn fire_due(pending: &mut Vec<PendingTimer>) {
    while let Some(idx) = next_due(pending, Instant::now()) {
        let timer = pending.remove(idx);
        trace!(id = timer.id, "timer fired");
        if panic::catch_unwind(AssertUnwindSafe(timer.callback)).is_err() {
            error!(id = timer.id, "timer callback panicked");
        }
    }
}

fn next_due(pending: &[PendingTimer], now: Instant) -> Option<usize> {
    let mut due: Option<usize> = None;
    for (idx, timer) in pending.iter().enumerate() {
        if timer.deadline > now {
            continue;
        }
        match due {
            Some(best) if pending[best].deadline <= timer.deadline => {}
            _ => due = Some(idx),
        }
    }
    due
}
