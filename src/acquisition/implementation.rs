/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`LedgerAcquisition`] state machine.
//!
//! Every public method follows the same pattern: take the acquisition's lock, mutate the state while
//! collecting [`Effects`] (outgoing messages, peer penalties, events, and the outcome to notify), release
//! the lock, then apply the effects. This keeps calls into the network and into user callbacks outside
//! the lock.

use std::{
    sync::{
        mpsc::{self, Receiver},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, Instant, SystemTime},
};

use borsh::BorshDeserialize;
use ed25519_dalek::VerifyingKey;
use rand::Rng;

use crate::{
    events::*,
    jobs::JobType,
    networking::{
        messages::{
            GetLedger, GetObjectsByHash, HashedObject, LedgerData, LedgerInfoType, LedgerNode,
            ObjectType, ObjectsByHash, QueryType,
        },
        network::{Network, Penalty},
        sending::Outbox,
    },
    peer_set::{arm_timer, PeerSet, Requestable, Tick},
    store::NodeStore,
    tree::{AddNode, HashTree, NodeId, TreeNode},
    types::{
        data_types::{CryptoHash, LedgerSeq},
        ledger::{Ledger, LedgerError, LedgerHeader},
    },
};

use super::{
    types::{RecentNodes, Waiter, WaiterList},
    AcquisitionContext, AcquisitionOutcome, AcquisitionStatus, NodeResult, TreeKind,
};

/// Number of missing node hashes per tree asked for in one by-hash request.
const NEEDED_HASHES_PER_TREE: usize = 4;

/// Number of missing node hashes per tree reported in an [`AcquisitionStatus`].
const STATUS_HASHES_PER_TREE: usize = 16;

pub struct LedgerAcquisition<N: Network, S: NodeStore> {
    hash: CryptoHash,
    timer_interval: Duration,
    state: Mutex<AcquisitionState>,
    waiters: Arc<Mutex<WaiterList>>,
    context: Arc<AcquisitionContext<N, S>>,
}

struct AcquisitionState {
    peer_set: PeerSet,
    sequence: Option<LedgerSeq>,

    /// The ledger being assembled. `None` until the base arrives, and again after completion, when the
    /// ledger moves into `outcome`.
    ledger: Option<Ledger>,

    have_base: bool,
    have_account_state: bool,
    have_transactions: bool,
    aborted: bool,

    /// Whether a stalled acquisition may send a by-hash request. Cleared when one is sent, and set
    /// again by the next timeout.
    by_hash: bool,

    recent_state_nodes: RecentNodes,
    recent_transaction_nodes: RecentNodes,

    /// Set exactly once, on entering a terminal state.
    outcome: Option<AcquisitionOutcome>,
}

impl AcquisitionState {
    fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn have(&self, tree: TreeKind) -> bool {
        match tree {
            TreeKind::AccountState => self.have_account_state,
            TreeKind::Transactions => self.have_transactions,
        }
    }

    fn set_have(&mut self, tree: TreeKind) {
        match tree {
            TreeKind::AccountState => self.have_account_state = true,
            TreeKind::Transactions => self.have_transactions = true,
        }
    }

    fn have_all(&self) -> bool {
        self.have_base && self.have_account_state && self.have_transactions
    }

    fn tree(&self, tree: TreeKind) -> Option<&HashTree> {
        let ledger = self.ledger.as_ref()?;
        Some(match tree {
            TreeKind::AccountState => ledger.account_state(),
            TreeKind::Transactions => ledger.transactions(),
        })
    }

    fn recent_nodes(&mut self, tree: TreeKind) -> &mut RecentNodes {
        match tree {
            TreeKind::AccountState => &mut self.recent_state_nodes,
            TreeKind::Transactions => &mut self.recent_transaction_nodes,
        }
    }

    fn install_base(&mut self, ledger: Ledger) {
        self.sequence = Some(ledger.sequence());
        // A zero root hash declares an empty tree, which is complete from the start.
        self.have_account_state |= ledger.account_state().is_complete();
        self.have_transactions |= ledger.transactions().is_complete();
        self.have_base = true;
        self.ledger = Some(ledger);
    }

    /// Missing objects, base first, then up to `per_tree` node hashes of each incomplete tree.
    fn needed(&self, hash: CryptoHash, per_tree: usize) -> Vec<(ObjectType, CryptoHash)> {
        if !self.have_base {
            return vec![(ObjectType::Ledger, hash)];
        }
        let mut needed = Vec::new();
        for tree in [TreeKind::AccountState, TreeKind::Transactions] {
            if self.have(tree) {
                continue;
            }
            if let Some(hash_tree) = self.tree(tree) {
                needed.extend(
                    hash_tree
                        .needed_hashes(per_tree)
                        .into_iter()
                        .map(|hash| (tree.object_type(), hash)),
                );
            }
        }
        needed
    }
}

/// Side effects collected while holding the lock, applied after releasing it.
#[derive(Default)]
struct Effects {
    outbox: Outbox,
    penalties: Vec<(VerifyingKey, Penalty)>,
    events: Vec<Event>,
    finished: Option<AcquisitionOutcome>,
}

impl<N: Network, S: NodeStore> LedgerAcquisition<N, S> {
    pub(crate) fn new(
        hash: CryptoHash,
        sequence: Option<LedgerSeq>,
        context: Arc<AcquisitionContext<N, S>>,
    ) -> LedgerAcquisition<N, S> {
        let config = &context.config;
        let state = AcquisitionState {
            peer_set: PeerSet::new(hash, config.timer_interval),
            sequence,
            ledger: None,
            have_base: false,
            have_account_state: false,
            have_transactions: false,
            aborted: false,
            by_hash: true,
            recent_state_nodes: RecentNodes::new(config.recent_nodes_capacity),
            recent_transaction_nodes: RecentNodes::new(config.recent_nodes_capacity),
            outcome: None,
        };
        LedgerAcquisition {
            hash,
            timer_interval: config.timer_interval,
            state: Mutex::new(state),
            waiters: Arc::new(Mutex::new(WaiterList::default())),
            context,
        }
    }

    /// Add the first peers and start the timer.
    pub(crate) fn start(self: &Arc<Self>) {
        self.add_peers();
        let context = &self.context;
        arm_timer(
            self,
            context.timer.clone(),
            context.jobs.clone(),
            context.config.max_pending_ledger_jobs,
        );
    }

    pub fn hash(&self) -> CryptoHash {
        self.hash
    }

    pub fn sequence(&self) -> Option<LedgerSeq> {
        self.lock().sequence
    }

    /* ↓↓↓ Local data ↓↓↓ */

    /// Try to assemble the ledger from the ledger cache and the node store without asking any peer.
    /// Returns whether the acquisition is now complete.
    pub fn try_local(&self) -> bool {
        let mut effects = Effects::default();
        let complete = {
            let mut state = self.lock();
            self.check_local_locked(&mut state, &mut effects)
        };
        self.apply(effects);
        complete
    }

    /// Look for newly stored data (e.g., after objects arrived by hash), completing the acquisition if
    /// that is enough.
    pub fn check_local(&self) {
        self.try_local();
    }

    fn check_local_locked(&self, state: &mut AcquisitionState, effects: &mut Effects) -> bool {
        if state.is_finished() {
            return state.peer_set.is_complete();
        }

        if let Some(ledger) = self.context.ledger_cache.get(&self.hash) {
            log::debug!("Ledger {} found in the ledger cache", self.hash);
            state.sequence = Some(ledger.sequence());
            state.have_base = true;
            state.have_account_state = true;
            state.have_transactions = true;
            state.ledger = None;
            self.finish_complete_locked(state, ledger, effects);
            return true;
        }

        let store = &self.context.node_store;
        let mut found = false;
        if !state.have_base {
            let Some(bytes) = store.fetch(&self.hash) else {
                return false;
            };
            match Ledger::from_header_bytes(&bytes, &self.hash) {
                Ok(ledger) => {
                    log::trace!("Ledger {} base found locally", self.hash);
                    state.install_base(ledger);
                    found = true;
                }
                Err(error) => {
                    log::warn!(
                        "Object stored under {} cannot be a ledger: {}",
                        self.hash,
                        error
                    );
                    self.fail_locked(state, effects);
                    return false;
                }
            }
        }

        for tree in [TreeKind::AccountState, TreeKind::Transactions] {
            if state.have(tree) {
                continue;
            }
            let Some(ledger) = state.ledger.as_mut() else {
                break;
            };
            let hash_tree = tree_mut(ledger, tree);
            let added = hash_tree.fill_from(|hash| store.fetch(hash));
            if added > 0 {
                log::trace!("Found {} {} nodes locally for {}", added, tree, self.hash);
                found = true;
            }
            if hash_tree.is_complete() {
                state.set_have(tree);
            }
        }

        if found {
            state.peer_set.mark_progress();
        }
        self.check_complete_locked(state, effects);
        state.peer_set.is_complete()
    }

    /* ↓↓↓ Merging data ↓↓↓ */

    /// Accept the serialized ledger header. Fails if the bytes do not hash to the ledger hash, in which
    /// case the acquisition is unchanged.
    pub fn take_base(&self, bytes: &[u8]) -> Result<(), LedgerError> {
        let mut effects = Effects::default();
        let result = {
            let mut state = self.lock();
            let result = self.take_base_locked(&mut state, bytes).map(|_| ());
            self.check_complete_locked(&mut state, &mut effects);
            result
        };
        self.apply(effects);
        result
    }

    /// Verify and insert nodes of one tree, returning what happened to each node in order. A rejected
    /// node does not prevent the other nodes of the batch from being taken.
    pub fn take_tree_nodes(&self, tree: TreeKind, nodes: Vec<(NodeId, Vec<u8>)>) -> Vec<NodeResult> {
        let mut effects = Effects::default();
        let results = {
            let mut state = self.lock();
            let results = self.take_tree_nodes_locked(&mut state, tree, nodes);
            self.check_complete_locked(&mut state, &mut effects);
            results
        };
        self.apply(effects);
        results
    }

    /// Returns whether the base was newly taken.
    fn take_base_locked(
        &self,
        state: &mut AcquisitionState,
        bytes: &[u8],
    ) -> Result<bool, LedgerError> {
        if state.is_finished() || state.have_base {
            return Ok(false);
        }
        let ledger = Ledger::from_header_bytes(bytes, &self.hash)?;
        self.context.node_store.store(
            ObjectType::Ledger,
            ledger.sequence(),
            self.hash,
            bytes.to_vec(),
        );
        state.install_base(ledger);
        state.peer_set.mark_progress();
        Ok(true)
    }

    fn take_tree_nodes_locked(
        &self,
        state: &mut AcquisitionState,
        tree: TreeKind,
        nodes: Vec<(NodeId, Vec<u8>)>,
    ) -> Vec<NodeResult> {
        if state.is_finished() || state.have(tree) {
            return vec![NodeResult::Ignored; nodes.len()];
        }
        let seq = state.sequence.unwrap_or_default();
        let Some(ledger) = state.ledger.as_mut() else {
            return vec![NodeResult::Unverifiable; nodes.len()];
        };

        let store = &self.context.node_store;
        let hash_tree = tree_mut(ledger, tree);
        let mut results = Vec::with_capacity(nodes.len());
        let mut useful = false;
        for (id, bytes) in nodes {
            let result = match hash_tree.insert_node(&id, &bytes) {
                Ok(AddNode::Useful) => {
                    if let Some(node) = hash_tree.node(&id) {
                        store.store(tree.object_type(), seq, node.hash(), bytes);
                    }
                    useful = true;
                    NodeResult::Useful
                }
                Ok(AddNode::Duplicate) => NodeResult::Duplicate,
                Ok(AddNode::Unverifiable) => NodeResult::Unverifiable,
                Err(error) => {
                    log::debug!("Rejected {} node for {}: {}", tree, self.hash, error);
                    NodeResult::Rejected(error)
                }
            };
            results.push(result);
        }
        if hash_tree.is_complete() {
            state.set_have(tree);
        }
        if useful {
            state.peer_set.mark_progress();
        }
        results
    }

    /// Handle a "ledger data" response from `origin`.
    ///
    /// The peer is penalized at most once per response: structurally invalid responses are charged as
    /// [`Penalty::InvalidRequest`], and responses carrying data that fails verification make the peer a
    /// bad peer for this acquisition and are charged as [`Penalty::InvalidData`].
    pub fn receive_ledger_data(&self, origin: VerifyingKey, data: LedgerData) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            state.peer_set.touch();
            effects
                .events
                .push(Event::ReceiveLedgerData(ReceiveLedgerDataEvent {
                    timestamp: SystemTime::now(),
                    origin,
                    ledger: self.hash,
                    item_type: data.item_type,
                    node_count: data.nodes.len(),
                }));

            if state.is_finished() {
                log::trace!("Discarding data for finished acquisition {}", self.hash);
            } else {
                match data.item_type {
                    LedgerInfoType::Base => {
                        self.receive_base_locked(&mut state, origin, data.nodes, &mut effects)
                    }
                    LedgerInfoType::AsNode => self.receive_nodes_locked(
                        &mut state,
                        origin,
                        TreeKind::AccountState,
                        data.nodes,
                        &mut effects,
                    ),
                    LedgerInfoType::TxNode => self.receive_nodes_locked(
                        &mut state,
                        origin,
                        TreeKind::Transactions,
                        data.nodes,
                        &mut effects,
                    ),
                    LedgerInfoType::Candidate => {
                        log::debug!("Unexpected candidate data for {}", self.hash);
                        effects.penalties.push((origin, Penalty::InvalidRequest));
                    }
                }
                self.check_complete_locked(&mut state, &mut effects);
            }
        }
        self.apply(effects);
    }

    fn receive_base_locked(
        &self,
        state: &mut AcquisitionState,
        origin: VerifyingKey,
        nodes: Vec<LedgerNode>,
        effects: &mut Effects,
    ) {
        let mut nodes = nodes.into_iter();
        let Some(base) = nodes.next() else {
            log::warn!("Got empty base data for {}", self.hash);
            effects.penalties.push((origin, Penalty::InvalidRequest));
            return;
        };

        if let Err(error) = self.take_base_locked(state, &base.node_data) {
            log::warn!("Got invalid base data for {}: {}", self.hash, error);
            self.reject_locked(state, origin, error.to_string(), effects);
            return;
        }

        // The base may carry the account state root and then the transaction root.
        let mut rejected = false;
        for (tree, root) in [TreeKind::AccountState, TreeKind::Transactions]
            .into_iter()
            .zip(nodes)
        {
            let results =
                self.take_tree_nodes_locked(state, tree, vec![(NodeId::root(), root.node_data)]);
            for result in results {
                if let NodeResult::Rejected(error) = result {
                    log::warn!("Included {} root for {} is invalid", tree, self.hash);
                    rejected = true;
                    effects.events.push(reject_event(origin, self.hash, error.to_string()));
                }
            }
        }

        if rejected {
            self.penalize_locked(state, origin, effects);
        } else {
            self.trigger_locked(state, Some(origin), effects);
        }
    }

    fn receive_nodes_locked(
        &self,
        state: &mut AcquisitionState,
        origin: VerifyingKey,
        tree: TreeKind,
        nodes: Vec<LedgerNode>,
        effects: &mut Effects,
    ) {
        if nodes.is_empty() {
            log::warn!("Got {} data with no nodes for {}", tree, self.hash);
            effects.penalties.push((origin, Penalty::InvalidRequest));
            return;
        }

        let mut batch = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node.node_id.as_deref().map(NodeId::from_wire) {
                Some(Ok(id)) => batch.push((id, node.node_data)),
                _ => {
                    log::warn!("Got bad {} node for {}", tree, self.hash);
                    effects.penalties.push((origin, Penalty::InvalidRequest));
                    return;
                }
            }
        }

        let mut rejected = false;
        for result in self.take_tree_nodes_locked(state, tree, batch) {
            if let NodeResult::Rejected(error) = result {
                rejected = true;
                effects.events.push(reject_event(origin, self.hash, error.to_string()));
            }
        }

        if rejected {
            log::debug!("Peer sent invalid {} nodes for {}", tree, self.hash);
            self.penalize_locked(state, origin, effects);
        } else {
            self.trigger_locked(state, Some(origin), effects);
        }
    }

    /// Handle objects a peer returned for a by-hash request. Objects that hash correctly are written to
    /// the node store and then picked up as if they had been there all along.
    pub fn receive_objects(&self, origin: VerifyingKey, objects: ObjectsByHash) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            state.peer_set.touch();
            if state.is_finished() {
                return;
            }

            let seq = state.sequence.unwrap_or_default();
            let mut stored = 0;
            let mut invalid = false;
            for object in objects.objects {
                if verify_object(objects.object_type, &object) {
                    self.context
                        .node_store
                        .store(objects.object_type, seq, object.hash, object.data);
                    stored += 1;
                } else {
                    invalid = true;
                }
            }

            if invalid {
                log::debug!("Peer sent objects with wrong hashes for {}", self.hash);
                self.reject_locked(
                    &mut state,
                    origin,
                    String::from("object hash mismatch"),
                    &mut effects,
                );
            }
            if stored > 0 {
                self.check_local_locked(&mut state, &mut effects);
            }
        }
        self.apply(effects);
    }

    /* ↓↓↓ Requesting data ↓↓↓ */

    /// Request whatever is still missing from `peer`, or from every tracked peer if `peer` is `None`.
    pub fn trigger(&self, peer: Option<VerifyingKey>) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            self.trigger_locked(&mut state, peer, &mut effects);
        }
        self.apply(effects);
    }

    fn trigger_locked(
        &self,
        state: &mut AcquisitionState,
        peer: Option<VerifyingKey>,
        effects: &mut Effects,
    ) {
        if state.is_finished() {
            log::debug!("Trigger on finished acquisition {}", self.hash);
            return;
        }
        if let Some(peer) = &peer {
            if state.peer_set.is_bad(peer) {
                log::debug!("Not asking bad peer for more of {}", self.hash);
                return;
            }
        }

        if !state.have_base {
            self.check_local_locked(state, effects);
            if state.is_finished() {
                return;
            }
        }

        let config = &self.context.config;
        let mut request = GetLedger::new(self.hash, LedgerInfoType::Base);
        request.ledger_seq = state.sequence;
        if state.peer_set.timeouts() != 0 {
            request.query_type = Some(QueryType::Indirect);
            if !state.peer_set.has_progress()
                && state.by_hash
                && state.peer_set.timeouts() > config.aggressive_timeouts
            {
                self.fetch_by_hash_locked(state, effects);
            }
        }

        if !state.have_base {
            log::trace!(
                "Sending base request for {} to {}",
                self.hash,
                if peer.is_some() { "selected peer" } else { "all peers" }
            );
            self.send_request_locked(state, request, peer, effects);
            return;
        }

        for tree in [TreeKind::Transactions, TreeKind::AccountState] {
            if state.have(tree) {
                continue;
            }
            let Some(hash_tree) = state.tree(tree) else {
                break;
            };
            if hash_tree.is_complete() {
                state.set_have(tree);
                continue;
            }
            let mut missing: Vec<NodeId> = hash_tree
                .missing_nodes(config.max_missing_nodes)
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            if !state.peer_set.is_aggressive() {
                let allow_duplicates = !state.peer_set.has_progress();
                missing = filter_nodes(
                    missing,
                    state.recent_nodes(tree),
                    config.max_nodes_per_request,
                    allow_duplicates,
                );
            }
            if missing.is_empty() {
                continue;
            }

            log::trace!(
                "Sending {} {} node requests for {}",
                missing.len(),
                tree,
                self.hash
            );
            let mut node_request = request.clone();
            node_request.item_type = tree.info_type();
            node_request.node_ids = missing.iter().map(NodeId::to_wire).collect();
            self.send_request_locked(state, node_request, peer, effects);
        }
    }

    fn send_request_locked(
        &self,
        state: &mut AcquisitionState,
        request: GetLedger,
        peer: Option<VerifyingKey>,
        effects: &mut Effects,
    ) {
        let targets = match peer {
            Some(peer) => vec![peer],
            None => self.connected_peers(state),
        };
        for target in targets {
            state.peer_set.record_request(&target);
            effects
                .events
                .push(Event::SendLedgerRequest(SendLedgerRequestEvent {
                    timestamp: SystemTime::now(),
                    peer: target,
                    ledger: self.hash,
                    item_type: request.item_type,
                    node_count: request.node_ids.len(),
                }));
            effects.outbox.push(target, request.clone());
        }
    }

    /// Ask every tracked peer for missing objects by hash. All objects in one request share a type, so
    /// only objects of the same type as the first missing object are asked for.
    fn fetch_by_hash_locked(&self, state: &mut AcquisitionState, effects: &mut Effects) {
        let needed = state.needed(self.hash, NEEDED_HASHES_PER_TREE);
        let Some((object_type, _)) = needed.first().copied() else {
            return;
        };
        let peers = self.connected_peers(state);
        if peers.is_empty() {
            return;
        }

        let request = GetObjectsByHash {
            ledger_hash: self.hash,
            object_type,
            objects: needed
                .into_iter()
                .filter(|(kind, _)| *kind == object_type)
                .map(|(_, hash)| hash)
                .collect(),
        };
        log::info!("Attempting by hash fetch for ledger {}", self.hash);
        state.by_hash = false;
        effects.outbox.push_to_all(peers, request);
    }

    /// The objects still required, in the order they would be requested.
    pub fn get_needed(&self) -> Vec<(ObjectType, CryptoHash)> {
        self.lock().needed(self.hash, NEEDED_HASHES_PER_TREE)
    }

    /// Add up to [`peers_per_round`](crate::config::Configuration::peers_per_round) connected peers
    /// that claim to have the ledger, starting from a random position among the connected peers. If no
    /// peer claims to have it, add every connected peer. Each newly added peer is asked for data.
    pub fn add_peers(&self) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            self.add_peers_locked(&mut state, &mut effects);
        }
        self.apply(effects);
    }

    fn add_peers_locked(&self, state: &mut AcquisitionState, effects: &mut Effects) {
        let network = &self.context.network;
        let peers = network.peers();
        if peers.is_empty() {
            return;
        }

        let first = rand::thread_rng().gen_range(0, peers.len());
        let mut found = 0;
        for i in 0..peers.len() {
            let peer = peers[(i + first) % peers.len()];
            if network.has_ledger(&peer, &self.hash, state.sequence) {
                self.peer_has_locked(state, peer, effects);
                found += 1;
                if found == self.context.config.peers_per_round {
                    break;
                }
            }
        }

        if found == 0 {
            for peer in peers {
                self.peer_has_locked(state, peer, effects);
            }
        }
    }

    fn peer_has_locked(&self, state: &mut AcquisitionState, peer: VerifyingKey, effects: &mut Effects) {
        if state.peer_set.is_bad(&peer) || !state.peer_set.peer_has(peer) {
            return;
        }
        self.trigger_locked(state, Some(peer), effects);
    }

    fn connected_peers(&self, state: &AcquisitionState) -> Vec<VerifyingKey> {
        state
            .peer_set
            .selectable_peers()
            .into_iter()
            .filter(|peer| self.context.network.is_connected(peer))
            .collect()
    }

    /* ↓↓↓ Timer ↓↓↓ */

    fn on_timer_locked(&self, state: &mut AcquisitionState, effects: &mut Effects) {
        if state.is_finished() {
            return;
        }
        state.recent_state_nodes.clear();
        state.recent_transaction_nodes.clear();

        match state.peer_set.tick(self.context.config.max_timeouts) {
            Tick::Progress => (),
            Tick::Timeout { timeouts } => {
                state.by_hash = true;
                effects
                    .events
                    .push(Event::AcquisitionTimeout(AcquisitionTimeoutEvent {
                        timestamp: SystemTime::now(),
                        ledger: self.hash,
                        timeouts,
                        aggressive: state.peer_set.is_aggressive(),
                    }));
                let peer_count = state.peer_set.peer_count(&self.context.network);
                log::debug!("No progress ({} peers) for ledger {}", peer_count, self.hash);
                if peer_count == 0 {
                    self.add_peers_locked(state, effects);
                } else {
                    self.trigger_locked(state, None, effects);
                }
            }
            Tick::Failed { timeouts } => {
                log::warn!("Too many timeouts ({}) for ledger {}", timeouts, self.hash);
                self.fail_locked(state, effects);
            }
        }
    }

    /* ↓↓↓ Terminal states ↓↓↓ */

    /// Stop acquiring. Responses still in flight are discarded when they arrive, and waiters are
    /// notified with [`AcquisitionOutcome::Aborted`]. Returns false if the acquisition had already
    /// ended.
    pub fn abort(&self) -> bool {
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            if state.is_finished() {
                return false;
            }
            state.aborted = true;
            effects
                .events
                .push(Event::AbortAcquisition(AbortAcquisitionEvent {
                    timestamp: SystemTime::now(),
                    ledger: self.hash,
                }));
            self.finish_locked(&mut state, AcquisitionOutcome::Aborted, &mut effects);
        }
        self.apply(effects);
        true
    }

    fn check_complete_locked(&self, state: &mut AcquisitionState, effects: &mut Effects) {
        if state.is_finished() || !state.have_all() {
            return;
        }
        let Some(mut ledger) = state.ledger.take() else {
            return;
        };
        ledger.set_immutable();
        let ledger = Arc::new(ledger);
        self.context.ledger_cache.insert(ledger.clone());
        self.finish_complete_locked(state, ledger, effects);
    }

    fn finish_complete_locked(
        &self,
        state: &mut AcquisitionState,
        ledger: Arc<Ledger>,
        effects: &mut Effects,
    ) {
        if !state.peer_set.set_complete() {
            return;
        }
        log::debug!("Acquired ledger {} ({})", self.hash, ledger.sequence());
        effects
            .events
            .push(Event::CompleteAcquisition(CompleteAcquisitionEvent {
                timestamp: SystemTime::now(),
                ledger: self.hash,
                sequence: ledger.sequence(),
            }));
        self.finish_locked(state, AcquisitionOutcome::Complete(ledger), effects);
    }

    fn fail_locked(&self, state: &mut AcquisitionState, effects: &mut Effects) {
        if state.is_finished() {
            return;
        }
        // A timeout tick has already failed the peer set.
        state.peer_set.set_failed();
        self.context.failures.insert(self.hash);
        effects
            .events
            .push(Event::FailAcquisition(FailAcquisitionEvent {
                timestamp: SystemTime::now(),
                ledger: self.hash,
                timeouts: state.peer_set.timeouts(),
            }));
        self.finish_locked(state, AcquisitionOutcome::Failed, effects);
    }

    fn finish_locked(
        &self,
        state: &mut AcquisitionState,
        outcome: AcquisitionOutcome,
        effects: &mut Effects,
    ) {
        state.outcome = Some(outcome.clone());
        effects.finished = Some(outcome);
    }

    /* ↓↓↓ Waiting ↓↓↓ */

    /// Register `callback` to be called with the outcome once the acquisition ends. Callbacks are called
    /// in registration order. If the acquisition has ended and every earlier waiter has been notified,
    /// `callback` is called immediately on the calling thread.
    pub fn add_on_complete(&self, callback: impl FnOnce(AcquisitionOutcome) + Send + 'static) {
        self.register(Waiter::Callback(Box::new(callback)))
    }

    /// Get a receiver that yields the outcome once the acquisition ends.
    pub fn subscribe(&self) -> Receiver<AcquisitionOutcome> {
        let (sender, receiver) = mpsc::channel();
        self.register(Waiter::Channel(sender));
        receiver
    }

    fn register(&self, waiter: Waiter) {
        let ready = self.waiters.lock().unwrap().register(waiter);
        if let Some((waiter, outcome)) = ready {
            waiter.notify(outcome)
        }
    }

    /* ↓↓↓ Queries ↓↓↓ */

    pub fn is_done(&self) -> bool {
        self.lock().is_finished()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().peer_set.is_complete()
    }

    pub fn is_failed(&self) -> bool {
        self.lock().peer_set.is_failed()
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// The complete ledger, if the acquisition has completed.
    pub fn ledger(&self) -> Option<Arc<Ledger>> {
        self.lock().outcome.as_ref()?.ledger().cloned()
    }

    pub fn timeouts(&self) -> u32 {
        self.lock().peer_set.timeouts()
    }

    /// The number of connected peers this acquisition may still ask.
    pub fn peer_count(&self) -> usize {
        self.lock().peer_set.peer_count(&self.context.network)
    }

    pub fn touch(&self) {
        self.lock().peer_set.touch()
    }

    pub fn last_action(&self) -> Instant {
        self.lock().peer_set.last_action()
    }

    pub fn status(&self) -> AcquisitionStatus {
        let state = self.lock();
        let needed_hashes = |tree: TreeKind| match (state.have(tree), state.tree(tree)) {
            (false, Some(hash_tree)) => hash_tree.needed_hashes(STATUS_HASHES_PER_TREE),
            _ => Vec::new(),
        };
        AcquisitionStatus {
            hash: self.hash,
            sequence: state.sequence,
            have_base: state.have_base,
            have_account_state: state.have_account_state,
            have_transactions: state.have_transactions,
            complete: state.peer_set.is_complete(),
            failed: state.peer_set.is_failed(),
            aborted: state.aborted,
            aggressive: state.peer_set.is_aggressive(),
            timeouts: state.peer_set.timeouts(),
            peers: state.peer_set.peer_count(&self.context.network),
            needed_state_hashes: needed_hashes(TreeKind::AccountState),
            needed_transaction_hashes: needed_hashes(TreeKind::Transactions),
        }
    }

    /* ↓↓↓ Helpers ↓↓↓ */

    fn lock(&self) -> MutexGuard<'_, AcquisitionState> {
        self.state.lock().unwrap()
    }

    /// Mark `origin` as a bad peer and charge it for invalid data.
    fn penalize_locked(&self, state: &mut AcquisitionState, origin: VerifyingKey, effects: &mut Effects) {
        state.peer_set.bad_peer(&origin);
        effects.penalties.push((origin, Penalty::InvalidData));
    }

    fn reject_locked(
        &self,
        state: &mut AcquisitionState,
        origin: VerifyingKey,
        reason: String,
        effects: &mut Effects,
    ) {
        effects.events.push(reject_event(origin, self.hash, reason));
        self.penalize_locked(state, origin, effects);
    }

    fn apply(&self, effects: Effects) {
        let Effects {
            outbox,
            penalties,
            events,
            finished,
        } = effects;

        self.context.sender.flush(outbox);
        for (peer, penalty) in penalties {
            self.context.network.charge(&peer, penalty);
        }
        for event in events {
            self.context.events.publish(event);
        }
        if let Some(outcome) = finished {
            if self.waiters.lock().unwrap().finish(outcome) {
                let waiters = self.waiters.clone();
                self.context.jobs.add_job(
                    JobType::Completion,
                    "notify acquisition waiters",
                    Box::new(move || {
                        // Waiters registered while a batch is being notified form the next batch.
                        loop {
                            let next = waiters.lock().unwrap().next_batch();
                            let Some((batch, outcome)) = next else {
                                break;
                            };
                            for waiter in batch {
                                waiter.notify(outcome.clone());
                            }
                        }
                    }),
                );
            }
        }
    }
}

impl<N: Network, S: NodeStore> Requestable for LedgerAcquisition<N, S> {
    fn hash(&self) -> CryptoHash {
        self.hash
    }

    fn peer_has(&self, peer: VerifyingKey) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            self.peer_has_locked(&mut state, peer, &mut effects);
        }
        self.apply(effects);
    }

    fn bad_peer(&self, peer: &VerifyingKey) {
        self.lock().peer_set.bad_peer(peer)
    }

    fn invoke_on_timer(&self) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock();
            self.on_timer_locked(&mut state, &mut effects);
        }
        self.apply(effects);
    }

    fn is_done(&self) -> bool {
        LedgerAcquisition::is_done(self)
    }

    fn timer_interval(&self) -> Duration {
        self.timer_interval
    }
}

fn tree_mut(ledger: &mut Ledger, tree: TreeKind) -> &mut HashTree {
    match tree {
        TreeKind::AccountState => ledger.account_state_mut(),
        TreeKind::Transactions => ledger.transactions_mut(),
    }
}

fn reject_event(origin: VerifyingKey, ledger: CryptoHash, reason: String) -> Event {
    Event::RejectNode(RejectNodeEvent {
        timestamp: SystemTime::now(),
        origin,
        ledger,
        reason,
    })
}

/// Choose which of the `missing` nodes to request, preferring nodes not requested recently.
///
/// If every node was requested recently, the batch is dropped unless `allow_duplicates` is set. At most
/// `max` nodes are kept, and the kept nodes are remembered in `recent`.
pub(crate) fn filter_nodes(
    missing: Vec<NodeId>,
    recent: &mut RecentNodes,
    max: usize,
    allow_duplicates: bool,
) -> Vec<NodeId> {
    let fresh: Vec<NodeId> = missing
        .iter()
        .filter(|id| !recent.contains(id))
        .cloned()
        .collect();

    let mut kept = if !fresh.is_empty() {
        fresh
    } else if allow_duplicates {
        missing
    } else {
        return Vec::new();
    };
    kept.truncate(max);
    for id in &kept {
        recent.insert(id.clone());
    }
    kept
}

/// Whether `object` hashes to the hash it claims.
fn verify_object(object_type: ObjectType, object: &HashedObject) -> bool {
    match object_type {
        ObjectType::Ledger => LedgerHeader::from_bytes(&object.data)
            .is_ok_and(|header| header.hash() == object.hash),
        ObjectType::StateNode | ObjectType::TransactionNode => {
            TreeNode::try_from_slice(&object.data).is_ok_and(|node| node.hash() == object.hash)
        }
    }
}
