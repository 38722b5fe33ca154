/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Acquisition of one ledger from peers.
//!
//! A [`LedgerAcquisition`] assembles a single ledger, identified by its hash, in three parts:
//! 1. The **base**: the serialized [`LedgerHeader`](crate::types::ledger::LedgerHeader). The header is
//!    accepted only if it hashes to the ledger hash, and it declares the root hashes of the two trees.
//! 2. The **account state tree**.
//! 3. The **transaction tree**.
//!
//! Tree nodes are requested in batches and verified one by one against the hash their parent declares,
//! so a peer that sends a corrupt node is caught (and penalized) at that node, while valid nodes in the
//! same batch are kept. Every verified header and node is also written to the
//! [`NodeStore`](crate::store::NodeStore).
//!
//! ## Lifecycle
//!
//! ```text
//! NoBase ──► Base ──► Base + partial trees ──► Complete
//!    │         │                │
//!    └─────────┴────────────────┴──► Failed | Aborted
//! ```
//!
//! Before asking the network, an acquisition tries to satisfy itself from the
//! [`LedgerCache`](crate::store::LedgerCache) and the node store. After that it is driven by two kinds
//! of input, both serialized by the acquisition's lock:
//! - Responses from peers, routed to it by the [registry](crate::registry).
//! - Ticks of its timer (see [`peer_set`](crate::peer_set)). A tick without progress makes the
//!   acquisition aggressive, and once enough ticks pass without progress, the acquisition fails.
//!
//! Complete, Failed and Aborted are terminal. When an acquisition enters a terminal state, everyone
//! waiting on it (see [`LedgerAcquisition::add_on_complete`] and [`LedgerAcquisition::subscribe`]) is
//! notified exactly once, in the order they started waiting.

mod implementation;
pub use implementation::LedgerAcquisition;

mod types;
pub use types::{AcquisitionOutcome, AcquisitionStatus, NodeResult, TreeKind};

use std::sync::Arc;

use crate::{
    config::Configuration,
    events::EventPublisher,
    jobs::JobQueue,
    networking::{network::Network, sending::SenderHandle},
    registry::RecentFailures,
    store::{LedgerCache, NodeStore},
    timer::Timer,
};

/// The services shared by every acquisition of one registry.
pub(crate) struct AcquisitionContext<N: Network, S: NodeStore> {
    pub(crate) network: N,
    pub(crate) sender: SenderHandle<N>,
    pub(crate) node_store: S,
    pub(crate) jobs: Arc<dyn JobQueue>,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) ledger_cache: LedgerCache,
    pub(crate) failures: RecentFailures,
    pub(crate) config: Configuration,
    pub(crate) events: EventPublisher,
}
