/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The process-wide table of in-flight ledger acquisitions.
//!
//! An [`AcquisitionRegistry`] is the single entry point of this crate. The consensus layer asks it for
//! ledgers with [`find_or_create`](AcquisitionRegistry::find_or_create), and the node's networking
//! layer hands it every "ledger data" and "objects by hash" response with
//! [`on_peer_data`](AcquisitionRegistry::on_peer_data) and
//! [`on_peer_objects`](AcquisitionRegistry::on_peer_objects).
//!
//! The registry also remembers ledgers that recently failed to be acquired (see [`RecentFailures`]),
//! and refuses to start acquiring them again until the failure expires.
//!
//! ## Starting a registry
//!
//! ```ignore
//! let registry = RegistrySpec::builder()
//!     .network(network)
//!     .node_store(node_store)
//!     .job_queue(Arc::new(WorkerPool::start(4)))
//!     .timer(Arc::new(TimerThread::start()))
//!     .configuration(Configuration::builder().build())
//!     .build()
//!     .start();
//! ```
//!
//! The registry is cheap to clone. Clones share the same table, so one registry can be handed to the
//! consensus layer and to every network thread.

mod failures;
pub use failures::RecentFailures;

use std::{
    collections::HashMap,
    sync::{mpsc::Sender, Arc, Mutex, MutexGuard},
    time::{Instant, SystemTime},
};

use ed25519_dalek::VerifyingKey;
use typed_builder::TypedBuilder;

use crate::{
    acquisition::{AcquisitionContext, AcquisitionStatus, LedgerAcquisition},
    config::Configuration,
    events::{Event, EventPublisher, StartAcquisitionEvent, SweepRegistryEvent},
    jobs::{JobQueue, JobType},
    networking::{
        messages::{LedgerData, ObjectsByHash},
        network::{Network, Penalty},
        sending::SenderHandle,
    },
    store::{LedgerCache, NodeStore},
    timer::Timer,
    types::data_types::{CryptoHash, LedgerSeq},
};

/// Stores the parameters needed to start an [`AcquisitionRegistry`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [RegistrySpec]. On the builder call the following methods to construct
    a valid [RegistrySpec].

    Required:
    - `.network(...)`
    - `.node_store(...)`
    - `.job_queue(...)`
    - `.timer(...)`
    - `.configuration(...)`

    Optional:
    - `.event_publisher(...)`
    - `.ledger_cache(...)`
    "))]
pub struct RegistrySpec<N: Network, S: NodeStore> {
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. Required."))]
    network: N,
    #[builder(setter(doc = "Set the store that verified headers and tree nodes are written to. Required."))]
    node_store: S,
    #[builder(setter(doc = "Set the queue that runs timer ticks, dispatched peer data, and completion callbacks. Required."))]
    job_queue: Arc<dyn JobQueue>,
    #[builder(setter(doc = "Set the timer that drives acquisition retries. Required."))]
    timer: Arc<dyn Timer>,
    #[builder(setter(doc = "Set the [configuration](Configuration). Required."))]
    configuration: Configuration,
    #[builder(default, setter(strip_option, doc = "Set a channel to which every [event](Event) is sent. Optional."))]
    event_publisher: Option<Sender<Event>>,
    #[builder(default, setter(strip_option, doc = "Share an existing ledger cache. Optional: a new cache is created by default."))]
    ledger_cache: Option<LedgerCache>,
}

impl<N: Network, S: NodeStore> RegistrySpec<N, S> {
    pub fn start(self) -> AcquisitionRegistry<N, S> {
        let config = self.configuration;
        let ledger_cache = self
            .ledger_cache
            .unwrap_or_else(|| LedgerCache::new(config.ledger_cache_capacity));
        let context = AcquisitionContext {
            sender: SenderHandle::new(self.network.clone()),
            network: self.network,
            node_store: self.node_store,
            jobs: self.job_queue,
            timer: self.timer,
            ledger_cache,
            failures: RecentFailures::new(config.failure_cache_capacity, config.failure_cache_expiry),
            events: EventPublisher::new(self.event_publisher, config.log_events),
            config,
        };
        AcquisitionRegistry {
            active: Arc::new(Mutex::new(HashMap::new())),
            context: Arc::new(context),
        }
    }
}

/// Shared handle to the table of in-flight acquisitions.
#[derive(Clone)]
pub struct AcquisitionRegistry<N: Network, S: NodeStore> {
    active: Arc<Mutex<HashMap<CryptoHash, Arc<LedgerAcquisition<N, S>>>>>,
    context: Arc<AcquisitionContext<N, S>>,
}

impl<N: Network, S: NodeStore> AcquisitionRegistry<N, S> {
    /// Get the acquisition of the ledger identified by `hash`, starting one if there is none.
    ///
    /// Returns `None` if the ledger recently failed to be acquired. A new acquisition first tries to
    /// assemble the ledger locally. If that settles it (either way), the acquisition is returned without
    /// being registered. Otherwise it is registered, and starts asking peers.
    pub fn find_or_create(
        &self,
        hash: CryptoHash,
        sequence: LedgerSeq,
    ) -> Option<Arc<LedgerAcquisition<N, S>>> {
        let acquisition = {
            let mut active = self.lock();
            if let Some(existing) = Self::live(&mut active, &hash) {
                existing.touch();
                return Some(existing);
            }

            if self.context.failures.contains(&hash) {
                log::debug!("Not acquiring recently failed ledger {}", hash);
                return None;
            }

            let acquisition = Arc::new(LedgerAcquisition::new(
                hash,
                Some(sequence),
                self.context.clone(),
            ));
            if acquisition.try_local() || acquisition.is_done() {
                return Some(acquisition);
            }
            active.insert(hash, acquisition.clone());
            acquisition
        };

        self.context
            .events
            .publish(Event::StartAcquisition(StartAcquisitionEvent {
                timestamp: SystemTime::now(),
                ledger: hash,
                sequence,
            }));
        acquisition.start();
        Some(acquisition)
    }

    /// Get the registered acquisition of the ledger identified by `hash`. A failed acquisition is
    /// removed from the registry instead of being returned.
    pub fn find(&self, hash: &CryptoHash) -> Option<Arc<LedgerAcquisition<N, S>>> {
        Self::live(&mut self.lock(), hash)
    }

    /// Whether an acquisition of the ledger identified by `hash` is registered and has not failed.
    pub fn has_ledger(&self, hash: &CryptoHash) -> bool {
        self.find(hash).is_some()
    }

    /// Stop acquiring the ledger identified by `hash`. The acquisition is aborted so that anyone still
    /// waiting on it is notified.
    pub fn drop_ledger(&self, hash: &CryptoHash) -> Option<Arc<LedgerAcquisition<N, S>>> {
        let removed = self.lock().remove(hash);
        if let Some(acquisition) = &removed {
            acquisition.abort();
        }
        removed
    }

    /// Route a "ledger data" response from `origin` to the acquisition it belongs to. Data for a
    /// ledger that is not being acquired is dropped, and `origin` is charged for it.
    pub fn on_peer_data(&self, origin: VerifyingKey, data: LedgerData) {
        match self.find(&data.ledger_hash) {
            Some(acquisition) => acquisition.receive_ledger_data(origin, data),
            None => {
                log::debug!("Got data for ledger {} we are not acquiring", data.ledger_hash);
                self.context.network.charge(&origin, Penalty::UnwantedData);
            }
        }
    }

    /// Queue [`on_peer_data`](Self::on_peer_data) on the job queue, so the network thread that
    /// received the data does not do the verification work.
    pub fn dispatch_peer_data(&self, origin: VerifyingKey, data: LedgerData) {
        let registry = self.clone();
        self.context.jobs.add_job(
            JobType::LedgerData,
            "receive ledger data",
            Box::new(move || registry.on_peer_data(origin, data)),
        );
    }

    /// Route objects returned for a by-hash request to the acquisition they belong to.
    pub fn on_peer_objects(&self, origin: VerifyingKey, objects: ObjectsByHash) {
        match self.find(&objects.ledger_hash) {
            Some(acquisition) => acquisition.receive_objects(origin, objects),
            None => {
                log::debug!(
                    "Got objects for ledger {} we are not acquiring",
                    objects.ledger_hash
                );
                self.context.network.charge(&origin, Penalty::UnwantedData);
            }
        }
    }

    /// Make every registered acquisition look for newly stored data, e.g., after a batch of objects was
    /// written to the node store by some other component.
    pub fn check_local_all(&self) {
        for acquisition in self.acquisitions() {
            acquisition.check_local();
        }
    }

    /* ↓↓↓ Failures ↓↓↓ */

    pub fn log_failure(&self, hash: CryptoHash) {
        self.context.failures.insert(hash)
    }

    /// Whether the ledger identified by `hash` failed to be acquired within the failure expiry window.
    pub fn is_known_failure(&self, hash: &CryptoHash) -> bool {
        self.context.failures.contains(hash)
    }

    pub fn clear_failures(&self) {
        self.context.failures.clear()
    }

    /* ↓↓↓ Maintenance ↓↓↓ */

    /// Remove acquisitions that have ended or have not been touched for
    /// [`idle_timeout`](Configuration::idle_timeout), and expire old failures. Returns the number of
    /// acquisitions removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.context.config.idle_timeout;
        let (removed, remaining) = {
            let mut active = self.lock();
            let before = active.len();
            active.retain(|hash, acquisition| {
                let keep = !acquisition.is_done()
                    && now.saturating_duration_since(acquisition.last_action()) < idle_timeout;
                if !keep {
                    log::debug!("Sweeping acquisition of {}", hash);
                }
                keep
            });
            (before - active.len(), active.len())
        };
        self.context.failures.expire();

        self.context
            .events
            .publish(Event::SweepRegistry(SweepRegistryEvent {
                timestamp: SystemTime::now(),
                removed,
                remaining,
            }));
        removed
    }

    /// The number of registered acquisitions still in progress, and the sum of their timeouts.
    pub fn fetch_count(&self) -> (usize, u32) {
        self.acquisitions()
            .iter()
            .filter(|acquisition| !acquisition.is_done())
            .fold((0, 0), |(count, timeouts), acquisition| {
                (count + 1, timeouts + acquisition.timeouts())
            })
    }

    /// Status snapshots of every registered acquisition.
    pub fn statuses(&self) -> Vec<AcquisitionStatus> {
        self.acquisitions()
            .iter()
            .map(|acquisition| acquisition.status())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ledger_cache(&self) -> &LedgerCache {
        &self.context.ledger_cache
    }

    pub fn node_store(&self) -> &S {
        &self.context.node_store
    }

    /* ↓↓↓ Helpers ↓↓↓ */

    /// Look up the acquisition of `hash`, purging it if it failed or was aborted.
    fn live(
        active: &mut HashMap<CryptoHash, Arc<LedgerAcquisition<N, S>>>,
        hash: &CryptoHash,
    ) -> Option<Arc<LedgerAcquisition<N, S>>> {
        let acquisition = active.get(hash)?;
        if acquisition.is_failed() || acquisition.is_aborted() {
            log::debug!("Purging ended acquisition of {}", hash);
            active.remove(hash);
            return None;
        }
        Some(acquisition.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CryptoHash, Arc<LedgerAcquisition<N, S>>>> {
        self.active.lock().unwrap()
    }

    /// Snapshot of the registered acquisitions, taken so that they can be called without holding the
    /// registry's lock.
    fn acquisitions(&self) -> Vec<Arc<LedgerAcquisition<N, S>>> {
        self.lock().values().cloned().collect()
    }
}
