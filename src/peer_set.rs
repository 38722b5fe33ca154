/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Generic bookkeeping for fetching one hash-identified object from peers.
//!
//! A [`PeerSet`] remembers which peers have been involved in fetching a target, and drives the
//! retry logic that every fetch shares:
//! 1. Every timer tick, the set checks whether any progress was made since the previous tick.
//! 2. A tick without progress counts as a timeout and puts the set in *aggressive* mode, in which the
//!    owner should broaden the set of peers it asks.
//! 3. After [`max_timeouts`](crate::config::Configuration::max_timeouts) timeouts the set fails.
//!
//! Whatever is being fetched implements [`Requestable`], which lets [`arm_timer`] drive its timer
//! without knowing what it is.
//!
//! `PeerSet` itself is not synchronized. Its owner keeps it behind the same lock as the rest of its
//! state.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    jobs::{JobQueue, JobType},
    networking::network::Network,
    timer::Timer,
    types::data_types::CryptoHash,
};

/// What a timer tick found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Some progress was made since the previous tick.
    Progress,
    /// No progress was made. The set is now aggressive.
    Timeout { timeouts: u32 },
    /// No progress was made and the timeout budget is exhausted. The set is now failed.
    Failed { timeouts: u32 },
}

pub struct PeerSet {
    hash: CryptoHash,

    /// Every peer ever involved, with the number of requests sent to it. Entries are never removed.
    peers: HashMap<VerifyingKey, u32>,

    /// Peers that sent bad data. They stay in `peers` but are not selected again.
    bad_peers: HashSet<VerifyingKey>,

    timer_interval: Duration,
    timeout_count: u32,
    complete: bool,
    failed: bool,
    progress: bool,
    aggressive: bool,
    last_action: Instant,
}

impl PeerSet {
    pub fn new(hash: CryptoHash, timer_interval: Duration) -> PeerSet {
        PeerSet {
            hash,
            peers: HashMap::new(),
            bad_peers: HashSet::new(),
            timer_interval,
            timeout_count: 0,
            complete: false,
            failed: false,
            progress: false,
            aggressive: false,
            last_action: Instant::now(),
        }
    }

    pub fn hash(&self) -> CryptoHash {
        self.hash
    }

    pub fn timer_interval(&self) -> Duration {
        self.timer_interval
    }

    /// Record that `peer` has, or is sending, the target. Returns whether the peer is new to this set.
    pub fn peer_has(&mut self, peer: VerifyingKey) -> bool {
        if self.peers.contains_key(&peer) {
            return false;
        }
        self.peers.insert(peer, 0);
        true
    }

    /// Record that a request was sent to `peer`.
    pub fn record_request(&mut self, peer: &VerifyingKey) {
        *self.peers.entry(*peer).or_insert(0) += 1;
    }

    /// The number of requests sent to `peer` so far.
    pub fn requests_sent(&self, peer: &VerifyingKey) -> u32 {
        self.peers.get(peer).copied().unwrap_or(0)
    }

    /// Exclude `peer` from future selection for this target. This does not affect other targets.
    pub fn bad_peer(&mut self, peer: &VerifyingKey) {
        self.peers.entry(*peer).or_insert(0);
        self.bad_peers.insert(*peer);
    }

    pub fn is_bad(&self, peer: &VerifyingKey) -> bool {
        self.bad_peers.contains(peer)
    }

    pub fn has_peer(&self, peer: &VerifyingKey) -> bool {
        self.peers.contains_key(peer)
    }

    /// Peers that may still be asked for the target, in no particular order.
    pub fn selectable_peers(&self) -> Vec<VerifyingKey> {
        self.peers
            .keys()
            .filter(|peer| !self.bad_peers.contains(peer))
            .copied()
            .collect()
    }

    /// The number of selectable peers that are still connected.
    pub fn peer_count<N: Network>(&self, network: &N) -> usize {
        self.peers
            .keys()
            .filter(|peer| !self.bad_peers.contains(peer) && network.is_connected(peer))
            .count()
    }

    /// Record forward progress. Leaves aggressive mode but keeps the timeouts counted so far.
    pub fn mark_progress(&mut self) {
        self.progress = true;
        self.aggressive = false;
    }

    /// Evaluate one timer tick. Must not be called once the set is done.
    pub fn tick(&mut self, max_timeouts: u32) -> Tick {
        debug_assert!(!self.is_done());
        if self.progress {
            self.progress = false;
            return Tick::Progress;
        }
        self.timeout_count += 1;
        if self.timeout_count >= max_timeouts {
            self.failed = true;
            return Tick::Failed {
                timeouts: self.timeout_count,
            };
        }
        self.aggressive = true;
        Tick::Timeout {
            timeouts: self.timeout_count,
        }
    }

    /// Enter the complete state. Returns false if the set was already done.
    pub fn set_complete(&mut self) -> bool {
        if self.is_done() {
            return false;
        }
        self.complete = true;
        true
    }

    /// Enter the failed state. Returns false if the set was already done.
    pub fn set_failed(&mut self) -> bool {
        if self.is_done() {
            return false;
        }
        self.failed = true;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_done(&self) -> bool {
        self.complete || self.failed
    }

    pub fn is_aggressive(&self) -> bool {
        self.aggressive
    }

    pub fn has_progress(&self) -> bool {
        self.progress
    }

    pub fn timeouts(&self) -> u32 {
        self.timeout_count
    }

    pub fn touch(&mut self) {
        self.last_action = Instant::now();
    }

    pub fn last_action(&self) -> Instant {
        self.last_action
    }
}

/// Something fetched by hash from a set of peers, driven by a periodic timer.
pub trait Requestable: Send + Sync + 'static {
    fn hash(&self) -> CryptoHash;

    /// A peer announced that it has the target, or became available.
    fn peer_has(&self, peer: VerifyingKey);

    fn bad_peer(&self, peer: &VerifyingKey);

    /// Handle one timer tick.
    fn invoke_on_timer(&self);

    fn is_done(&self) -> bool;

    fn timer_interval(&self) -> Duration;
}

/// Schedule the next timer tick of `target`.
///
/// The timer only holds a weak reference, so a target dropped by its owner stops ticking. When the
/// tick fires it is handed to `jobs` as a [`JobType::LedgerData`] job, unless more than
/// `max_pending_jobs` such jobs are already queued, in which case the tick is skipped and the timer
/// re-armed. After every tick the timer is re-armed until the target is done.
pub fn arm_timer<T: Requestable>(
    target: &Arc<T>,
    timer: Arc<dyn Timer>,
    jobs: Arc<dyn JobQueue>,
    max_pending_jobs: usize,
) {
    let weak = Arc::downgrade(target);
    let interval = target.timer_interval();
    let scheduler = timer.clone();
    scheduler.schedule(
        interval,
        Box::new(move || timer_entry(weak, timer, jobs, max_pending_jobs)),
    );
}

fn timer_entry<T: Requestable>(
    weak: Weak<T>,
    timer: Arc<dyn Timer>,
    jobs: Arc<dyn JobQueue>,
    max_pending_jobs: usize,
) {
    let Some(target) = weak.upgrade() else {
        return;
    };
    if target.is_done() {
        return;
    }

    if jobs.job_count(JobType::LedgerData) > max_pending_jobs {
        log::debug!("Deferring timer of {}: job queue is busy", target.hash());
        arm_timer(&target, timer, jobs, max_pending_jobs);
        return;
    }

    let queue = jobs.clone();
    jobs.add_job(
        JobType::LedgerData,
        "peer set timeout",
        Box::new(move || {
            target.invoke_on_timer();
            if !target.is_done() {
                arm_timer(&target, timer, queue, max_pending_jobs);
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    fn peer() -> VerifyingKey {
        SigningKey::generate(&mut OsRng).verifying_key()
    }

    fn peer_set() -> PeerSet {
        PeerSet::new(CryptoHash::new([7; 32]), Duration::from_secs(2))
    }

    #[test]
    fn fails_after_exactly_max_timeouts() {
        let mut set = peer_set();
        for timeouts in 1..5 {
            assert_eq!(set.tick(5), Tick::Timeout { timeouts });
            assert!(set.is_aggressive());
            assert!(!set.is_done());
        }
        assert_eq!(set.tick(5), Tick::Failed { timeouts: 5 });
        assert!(set.is_failed());
        assert!(!set.set_complete());
        assert!(!set.is_complete());
    }

    #[test]
    fn progress_defers_timeouts_without_resetting_them() {
        let mut set = peer_set();
        assert_eq!(set.tick(3), Tick::Timeout { timeouts: 1 });
        set.mark_progress();
        assert!(!set.is_aggressive());
        assert_eq!(set.tick(3), Tick::Progress);
        assert_eq!(set.tick(3), Tick::Timeout { timeouts: 2 });
        assert_eq!(set.tick(3), Tick::Failed { timeouts: 3 });
    }

    #[test]
    fn bad_peers_are_kept_but_not_selected() {
        let mut set = peer_set();
        let (good, bad) = (peer(), peer());
        assert!(set.peer_has(good));
        assert!(set.peer_has(bad));
        assert!(!set.peer_has(good));
        set.record_request(&good);
        set.bad_peer(&bad);
        assert!(set.has_peer(&bad));
        assert_eq!(set.selectable_peers(), vec![good]);
        assert_eq!(set.requests_sent(&good), 1);
        assert!(!set.peer_has(bad));
    }

    #[test]
    fn complete_is_terminal() {
        let mut set = peer_set();
        assert!(set.set_complete());
        assert!(!set.set_failed());
        assert!(set.is_complete() && !set.is_failed());
    }
}
