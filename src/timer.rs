/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! One-shot timers.
//!
//! Waiting for peers is expressed entirely through timers: an acquisition arms a timer, and when it fires
//! the acquisition re-evaluates its progress. No operation in the core blocks waiting for a response.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

pub trait Timer: Send + Sync + 'static {
    /// Run `callback` once, no earlier than `after` from now. Callbacks must be short; anything
    /// substantial should be dispatched onto a [`JobQueue`](crate::jobs::JobQueue).
    fn schedule(&self, after: Duration, callback: TimerCallback);
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed, so that `BinaryHeap` pops the earliest deadline first. Ties fire in scheduling order.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A single background thread that fires scheduled callbacks in deadline order.
///
/// Dropping the `TimerThread` joins the thread, unless it is dropped by one of its own callbacks.
/// Callbacks that have not fired yet are discarded.
pub struct TimerThread {
    sender: Option<Sender<(Instant, TimerCallback)>>,
    handle: Option<JoinHandle<()>>,
}

impl TimerThread {
    pub fn start() -> TimerThread {
        let (sender, receiver) = mpsc::channel::<(Instant, TimerCallback)>();
        let handle = thread::spawn(move || {
            let mut pending = BinaryHeap::new();
            let mut seq = 0;
            loop {
                let next = match pending.peek() {
                    Some(Scheduled { deadline, .. }) => {
                        receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                    }
                    None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match next {
                    Ok((deadline, callback)) => {
                        pending.push(Scheduled {
                            deadline,
                            seq,
                            callback,
                        });
                        seq += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => return,
                }

                let now = Instant::now();
                while let Some(scheduled) = pending.peek() {
                    if scheduled.deadline > now {
                        break;
                    }
                    if let Some(scheduled) = pending.pop() {
                        (scheduled.callback)();
                    }
                }
            }
        });
        TimerThread {
            sender: Some(sender),
            handle: Some(handle),
        }
    }
}

impl Timer for TimerThread {
    fn schedule(&self, after: Duration, callback: TimerCallback) {
        if let Some(sender) = &self.sender {
            let _ = sender.send((Instant::now() + after, callback));
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            // A callback may hold the last handle to the timer. The timer thread then exits on its own.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
