/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Running work off the network threads.
//!
//! Timer fires, completion notifications, and the processing of peer responses are all dispatched as jobs
//! onto a [`JobQueue`]. The core only assumes that a job runs *eventually*, never that it runs immediately
//! or on any particular thread.
//!
//! [`WorkerPool`] is a simple fixed-size pool that the embedding node can use if it does not have a job
//! system of its own.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Categories of jobs. The queue keeps a count of pending jobs of each category so that producers can
/// back off under load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Processing of ledger data received from peers, and acquisition timer fires.
    LedgerData,

    /// Invocation of completion callbacks.
    Completion,
}

pub trait JobQueue: Send + Sync + 'static {
    /// Queue `job` for eventual execution. `name` is used for diagnostics only.
    fn add_job(&self, job_type: JobType, name: &'static str, job: Job);

    /// The number of jobs of `job_type` that have been queued but have not finished running.
    fn job_count(&self, job_type: JobType) -> usize;
}

#[derive(Default)]
struct JobCounts {
    ledger_data: AtomicUsize,
    completion: AtomicUsize,
}

impl JobCounts {
    fn get(&self, job_type: JobType) -> &AtomicUsize {
        match job_type {
            JobType::LedgerData => &self.ledger_data,
            JobType::Completion => &self.completion,
        }
    }
}

type QueuedJob = (JobType, &'static str, Job);

/// A fixed number of worker threads pulling jobs off a shared channel.
///
/// Dropping the pool stops accepting new jobs, lets the workers drain the jobs already queued, and joins
/// them.
pub struct WorkerPool {
    sender: Option<Sender<QueuedJob>>,
    workers: Vec<JoinHandle<()>>,
    counts: Arc<JobCounts>,
}

impl WorkerPool {
    /// Spawn `threads` worker threads (at least one).
    pub fn start(threads: usize) -> WorkerPool {
        let (sender, receiver) = mpsc::channel::<QueuedJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        let counts = Arc::new(JobCounts::default());

        let workers = (0..threads.max(1))
            .map(|_| {
                let receiver = receiver.clone();
                let counts = counts.clone();
                thread::spawn(move || run_worker(receiver, counts))
            })
            .collect();

        WorkerPool {
            sender: Some(sender),
            workers,
            counts,
        }
    }
}

fn run_worker(receiver: Arc<Mutex<Receiver<QueuedJob>>>, counts: Arc<JobCounts>) {
    loop {
        let next = receiver.lock().unwrap().recv();
        match next {
            Ok((job_type, name, job)) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("Job {} panicked", name);
                }
                counts.get(job_type).fetch_sub(1, Ordering::SeqCst);
            }
            // The pool was dropped and the queue is drained.
            Err(_) => return,
        }
    }
}

impl JobQueue for WorkerPool {
    fn add_job(&self, job_type: JobType, name: &'static str, job: Job) {
        if let Some(sender) = &self.sender {
            self.counts.get(job_type).fetch_add(1, Ordering::SeqCst);
            if sender.send((job_type, name, job)).is_err() {
                self.counts.get(job_type).fetch_sub(1, Ordering::SeqCst);
                log::warn!("Dropping job {}: worker pool is shut down", name);
            }
        }
    }

    fn job_count(&self, job_type: JobType) -> usize {
        self.counts.get(job_type).load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel makes every worker return once the queue is drained.
        self.sender.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A job may hold the last handle to the pool. Its worker exits on its own.
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn worker_pool_runs_every_job() {
        let pool = WorkerPool::start(3);
        let (sender, receiver) = mpsc::channel();
        for i in 0..20 {
            let sender = sender.clone();
            pool.add_job(JobType::LedgerData, "test", Box::new(move || sender.send(i).unwrap()));
        }
        let mut received: Vec<i32> = (0..20)
            .map(|_| receiver.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        received.sort();
        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_job_does_not_kill_the_pool() {
        let pool = WorkerPool::start(1);
        let (sender, receiver) = mpsc::channel();
        pool.add_job(JobType::Completion, "panics", Box::new(|| panic!("boom")));
        pool.add_job(JobType::Completion, "sends", Box::new(move || sender.send(()).unwrap()));
        assert!(receiver.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn job_counts_drain_to_zero() {
        let pool = WorkerPool::start(2);
        for _ in 0..5 {
            pool.add_job(JobType::LedgerData, "count", Box::new(|| ()));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.job_count(JobType::LedgerData) > 0 {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.job_count(JobType::Completion), 0);
    }

    #[test]
    fn job_can_drop_last_handle() {
        let pool = Arc::new(WorkerPool::start(2));
        let (go_sender, go_receiver) = mpsc::channel();
        let (done_sender, done_receiver) = mpsc::channel();
        let held = pool.clone();
        pool.add_job(
            JobType::Completion,
            "drops pool",
            Box::new(move || {
                go_receiver.recv().unwrap();
                drop(held);
                done_sender.send(()).unwrap();
            }),
        );
        drop(pool);
        go_sender.send(()).unwrap();
        assert!(done_receiver.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
