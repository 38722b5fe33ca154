use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use ledger_sync::{
    jobs::{Job, JobQueue, JobType},
    timer::{Timer, TimerCallback},
};

/// A job queue that runs every job immediately on the calling thread.
///
/// `set_backlog` makes the queue report a number of pending ledger data jobs, to exercise timer
/// deferral. `hold` makes the queue keep jobs until `run_held` is called, like a busy worker pool.
#[derive(Default)]
pub(crate) struct InlineJobQueue {
    backlog: AtomicUsize,
    executed: AtomicUsize,
    holding: AtomicBool,
    held: Mutex<Vec<Job>>,
}

impl InlineJobQueue {
    pub(crate) fn set_backlog(&self, jobs: usize) {
        self.backlog.store(jobs, Ordering::SeqCst)
    }

    pub(crate) fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub(crate) fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst)
    }

    /// Stop holding jobs, and run the held ones in the order they were added.
    pub(crate) fn run_held(&self) {
        self.holding.store(false, Ordering::SeqCst);
        let held = mem::take(&mut *self.held.lock().unwrap());
        for job in held {
            self.executed.fetch_add(1, Ordering::SeqCst);
            job()
        }
    }

    pub(crate) fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

impl JobQueue for InlineJobQueue {
    fn add_job(&self, _: JobType, _: &'static str, job: Job) {
        if self.holding.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push(job);
            return;
        }
        self.executed.fetch_add(1, Ordering::SeqCst);
        job()
    }

    fn job_count(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::LedgerData => self.backlog.load(Ordering::SeqCst),
            JobType::Completion => 0,
        }
    }
}

/// A timer that only fires when told to.
#[derive(Default)]
pub(crate) struct ManualTimer(Mutex<Vec<(Duration, TimerCallback)>>);

impl ManualTimer {
    /// Fire every scheduled callback, regardless of its deadline. Callbacks scheduled while firing wait
    /// for the next call. Returns the number of callbacks fired.
    pub(crate) fn fire_all(&self) -> usize {
        let due = mem::take(&mut *self.0.lock().unwrap());
        let fired = due.len();
        for (_, callback) in due {
            callback()
        }
        fired
    }

    pub(crate) fn pending(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, after: Duration, callback: TimerCallback) {
        self.0.lock().unwrap().push((after, callback))
    }
}
