/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types returned by, and used inside, a [`LedgerAcquisition`](super::LedgerAcquisition).

use std::{
    collections::{HashSet, VecDeque},
    fmt::{self, Display, Formatter},
    mem,
    sync::{mpsc::Sender, Arc},
};

use crate::{
    networking::messages::{LedgerInfoType, ObjectType},
    tree::{NodeId, TreeError},
    types::{
        data_types::{CryptoHash, LedgerSeq},
        ledger::Ledger,
    },
};

/// One of the two trees of a ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TreeKind {
    AccountState,
    Transactions,
}

impl TreeKind {
    /// The item type used to request nodes of this tree.
    pub fn info_type(&self) -> LedgerInfoType {
        match self {
            TreeKind::AccountState => LedgerInfoType::AsNode,
            TreeKind::Transactions => LedgerInfoType::TxNode,
        }
    }

    /// The object type under which nodes of this tree are stored.
    pub fn object_type(&self) -> ObjectType {
        match self {
            TreeKind::AccountState => ObjectType::StateNode,
            TreeKind::Transactions => ObjectType::TransactionNode,
        }
    }

    /// The tree whose nodes are requested with `info_type`, if any.
    pub fn from_info_type(info_type: LedgerInfoType) -> Option<TreeKind> {
        match info_type {
            LedgerInfoType::AsNode => Some(TreeKind::AccountState),
            LedgerInfoType::TxNode => Some(TreeKind::Transactions),
            LedgerInfoType::Base | LedgerInfoType::Candidate => None,
        }
    }
}

impl Display for TreeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TreeKind::AccountState => write!(f, "account state"),
            TreeKind::Transactions => write!(f, "transaction"),
        }
    }
}

/// What happened to one tree node offered to an acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeResult {
    /// The node was verified and added to its tree.
    Useful,
    /// The node was already present.
    Duplicate,
    /// The node cannot be verified yet because its parent (or the ledger header) is missing.
    Unverifiable,
    /// The acquisition is no longer merging data, or already has the whole tree.
    Ignored,
    /// The node failed verification. The peer that sent it deserves a penalty.
    Rejected(TreeError),
}

impl NodeResult {
    pub fn is_rejected(&self) -> bool {
        matches!(self, NodeResult::Rejected(_))
    }
}

/// How an acquisition ended.
#[derive(Clone, Debug)]
pub enum AcquisitionOutcome {
    /// Every part of the ledger was received and verified.
    Complete(Arc<Ledger>),
    /// The timeout budget ran out, or local data proved the hash is not a ledger.
    Failed,
    Aborted,
}

impl AcquisitionOutcome {
    pub fn ledger(&self) -> Option<&Arc<Ledger>> {
        match self {
            AcquisitionOutcome::Complete(ledger) => Some(ledger),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, AcquisitionOutcome::Complete(_))
    }
}

/// A snapshot of an acquisition's progress, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquisitionStatus {
    pub hash: CryptoHash,
    pub sequence: Option<LedgerSeq>,
    pub have_base: bool,
    pub have_account_state: bool,
    pub have_transactions: bool,
    pub complete: bool,
    pub failed: bool,
    pub aborted: bool,
    pub aggressive: bool,
    pub timeouts: u32,
    pub peers: usize,
    pub needed_state_hashes: Vec<CryptoHash>,
    pub needed_transaction_hashes: Vec<CryptoHash>,
}

/// Someone waiting for an acquisition to end. Each waiter is notified exactly once.
pub(crate) enum Waiter {
    Callback(Box<dyn FnOnce(AcquisitionOutcome) + Send>),
    Channel(Sender<AcquisitionOutcome>),
}

impl Waiter {
    pub(crate) fn notify(self, outcome: AcquisitionOutcome) {
        match self {
            Waiter::Callback(callback) => callback(outcome),
            Waiter::Channel(sender) => {
                let _ = sender.send(outcome);
            }
        }
    }
}

/// The waiters of one acquisition, shared with the job that notifies them.
///
/// Waiters are notified in registration order. Waiters registered after the acquisition ended but
/// before the notifying job drained the list join the end of the list, so they are notified after the
/// earlier ones. Only once the list has been drained are new waiters notified on the spot.
#[derive(Default)]
pub(crate) struct WaiterList {
    waiters: Vec<Waiter>,
    outcome: Option<AcquisitionOutcome>,
    notified: bool,
}

impl WaiterList {
    /// Register `waiter`. Returns it with the outcome if it must be notified by the caller right away.
    pub(crate) fn register(&mut self, waiter: Waiter) -> Option<(Waiter, AcquisitionOutcome)> {
        match &self.outcome {
            Some(outcome) if self.notified => Some((waiter, outcome.clone())),
            _ => {
                self.waiters.push(waiter);
                None
            }
        }
    }

    /// Record the outcome. Returns whether there are waiters for a notifying job to drain.
    pub(crate) fn finish(&mut self, outcome: AcquisitionOutcome) -> bool {
        self.outcome = Some(outcome);
        if self.waiters.is_empty() {
            self.notified = true;
        }
        !self.notified
    }

    /// Take the next batch of waiters to notify. Marks the list notified once there are none left.
    pub(crate) fn next_batch(&mut self) -> Option<(Vec<Waiter>, AcquisitionOutcome)> {
        let outcome = self.outcome.clone()?;
        if self.waiters.is_empty() {
            self.notified = true;
            return None;
        }
        Some((mem::take(&mut self.waiters), outcome))
    }
}

/// Recently requested node ids of one tree, oldest evicted first once `capacity` is reached.
pub(crate) struct RecentNodes {
    capacity: usize,
    members: HashSet<NodeId>,
    order: VecDeque<NodeId>,
}

impl RecentNodes {
    pub(crate) fn new(capacity: usize) -> RecentNodes {
        RecentNodes {
            capacity: capacity.max(1),
            members: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn contains(&self, id: &NodeId) -> bool {
        self.members.contains(id)
    }

    pub(crate) fn insert(&mut self, id: NodeId) {
        if !self.members.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}
