/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The cache of ledger hashes that recently could not be acquired.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::types::data_types::CryptoHash;

/// A set of recently failed ledger hashes, bounded both in size and in how long an entry is kept.
///
/// The cache has a lock of its own, separate from the registry's map of active acquisitions, so
/// that an acquisition failing under its own lock can record itself here.
#[derive(Clone)]
pub struct RecentFailures(Arc<Mutex<FailureCache>>);

struct FailureCache {
    capacity: usize,
    expiry: Duration,
    failed_at: HashMap<CryptoHash, Instant>,

    /// Hashes from oldest to newest failure.
    order: VecDeque<CryptoHash>,
}

impl FailureCache {
    fn is_live(&self, hash: &CryptoHash, now: Instant) -> bool {
        self.failed_at
            .get(hash)
            .is_some_and(|failed_at| now.duration_since(*failed_at) < self.expiry)
    }
}

impl RecentFailures {
    pub fn new(capacity: usize, expiry: Duration) -> RecentFailures {
        RecentFailures(Arc::new(Mutex::new(FailureCache {
            capacity: capacity.max(1),
            expiry,
            failed_at: HashMap::new(),
            order: VecDeque::new(),
        })))
    }

    /// Record that `hash` failed just now, evicting the oldest entry if the cache is full.
    pub fn insert(&self, hash: CryptoHash) {
        let mut cache = self.0.lock().unwrap();
        if cache.failed_at.insert(hash, Instant::now()).is_some() {
            cache.order.retain(|h| *h != hash);
        }
        cache.order.push_back(hash);
        while cache.order.len() > cache.capacity {
            if let Some(oldest) = cache.order.pop_front() {
                cache.failed_at.remove(&oldest);
            }
        }
    }

    /// Whether `hash` failed less than the expiry window ago.
    pub fn contains(&self, hash: &CryptoHash) -> bool {
        self.0.lock().unwrap().is_live(hash, Instant::now())
    }

    pub fn remove(&self, hash: &CryptoHash) {
        let mut cache = self.0.lock().unwrap();
        if cache.failed_at.remove(hash).is_some() {
            cache.order.retain(|h| h != hash);
        }
    }

    /// Drop every expired entry. Returns the number of entries dropped.
    pub fn expire(&self) -> usize {
        let mut cache = self.0.lock().unwrap();
        let now = Instant::now();
        let mut expired = 0;
        while let Some(oldest) = cache.order.front().copied() {
            if cache.is_live(&oldest, now) {
                break;
            }
            cache.order.pop_front();
            cache.failed_at.remove(&oldest);
            expired += 1;
        }
        expired
    }

    pub fn clear(&self) {
        let mut cache = self.0.lock().unwrap();
        cache.failed_at.clear();
        cache.order.clear();
    }

    /// The number of entries, including ones that expired but were not yet dropped.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn hash(byte: u8) -> CryptoHash {
        CryptoHash::new([byte; 32])
    }

    #[test]
    fn entries_expire() {
        let failures = RecentFailures::new(8, Duration::from_millis(50));
        failures.insert(hash(1));
        assert!(failures.contains(&hash(1)));
        thread::sleep(Duration::from_millis(80));
        assert!(!failures.contains(&hash(1)));
        assert_eq!(failures.expire(), 1);
        assert!(failures.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let failures = RecentFailures::new(2, Duration::from_secs(60));
        failures.insert(hash(1));
        failures.insert(hash(2));
        failures.insert(hash(1));
        failures.insert(hash(3));
        assert_eq!(failures.len(), 2);
        assert!(failures.contains(&hash(1)));
        assert!(!failures.contains(&hash(2)));
        assert!(failures.contains(&hash(3)));
    }
}
