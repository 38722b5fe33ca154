/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Local storage consulted before going to the network.
//!
//! Two kinds of storage are involved in acquiring a ledger:
//! 1. A [`NodeStore`]: a hash-addressed object store holding serialized ledger headers and tree nodes.
//!    Everything an acquisition verifies is written through to it, and [`try_local`] reads from it, so a
//!    ledger that shares most of its nodes with an earlier one is mostly assembled without network
//!    traffic.
//! 2. A [`LedgerCache`]: a bounded, least-recently-used cache of complete, immutable ledgers.
//!
//! [`try_local`]: crate::acquisition::LedgerAcquisition::try_local

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use crate::{
    networking::messages::ObjectType,
    tree::{HashTree, NodeId},
    types::{
        data_types::{CryptoHash, LedgerSeq},
        ledger::Ledger,
    },
};

/// A hash-addressed object store.
pub trait NodeStore: Clone + Send + Sync + 'static {
    /// Get the bytes of the object whose hash is `hash`.
    fn fetch(&self, hash: &CryptoHash) -> Option<Vec<u8>>;

    /// Store `bytes` under `hash`. Callers only store objects they have already verified.
    fn store(&self, kind: ObjectType, seq: LedgerSeq, hash: CryptoHash, bytes: Vec<u8>);

    /// Store the header and every node of a complete `ledger`.
    fn store_ledger(&self, ledger: &Ledger) {
        let seq = ledger.sequence();
        self.store(
            ObjectType::Ledger,
            seq,
            ledger.hash(),
            ledger.header().to_bytes(),
        );
        store_tree(self, ObjectType::StateNode, seq, ledger.account_state());
        store_tree(self, ObjectType::TransactionNode, seq, ledger.transactions());
    }
}

fn store_tree<S: NodeStore + ?Sized>(store: &S, kind: ObjectType, seq: LedgerSeq, tree: &HashTree) {
    let mut stack = vec![NodeId::root()];
    while let Some(id) = stack.pop() {
        if let Some(node) = tree.node(&id) {
            stack.extend(node.children().map(|(branch, _)| id.child(branch)));
            store.store(kind, seq, node.hash(), node.to_bytes());
        }
    }
}

/// A volatile, in-memory implementation of [`NodeStore`].
#[derive(Clone, Default)]
pub struct MemNodeStore(Arc<Mutex<HashMap<CryptoHash, Vec<u8>>>>);

impl MemNodeStore {
    /// Create a new, empty `MemNodeStore`.
    pub fn new() -> MemNodeStore {
        MemNodeStore::default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        self.0.lock().unwrap().remove(hash)
    }
}

impl NodeStore for MemNodeStore {
    fn fetch(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(hash).cloned()
    }

    fn store(&self, _: ObjectType, _: LedgerSeq, hash: CryptoHash, bytes: Vec<u8>) {
        self.0.lock().unwrap().insert(hash, bytes);
    }
}

/// A bounded cache of complete ledgers, evicting the least recently used ledger when full.
#[derive(Clone)]
pub struct LedgerCache(Arc<Mutex<LruLedgers>>);

struct LruLedgers {
    capacity: usize,
    ledgers: HashMap<CryptoHash, Arc<Ledger>>,

    /// Ledger hashes from least to most recently used.
    recency: VecDeque<CryptoHash>,
}

impl LruLedgers {
    fn promote(&mut self, hash: &CryptoHash) {
        if let Some(position) = self.recency.iter().position(|h| h == hash) {
            self.recency.remove(position);
        }
        self.recency.push_back(*hash);
    }
}

impl LedgerCache {
    /// Create a cache holding at most `capacity` ledgers (at least one).
    pub fn new(capacity: usize) -> LedgerCache {
        LedgerCache(Arc::new(Mutex::new(LruLedgers {
            capacity: capacity.max(1),
            ledgers: HashMap::new(),
            recency: VecDeque::new(),
        })))
    }

    /// Get the ledger identified by `hash`, marking it as recently used.
    pub fn get(&self, hash: &CryptoHash) -> Option<Arc<Ledger>> {
        let mut lru = self.0.lock().unwrap();
        let ledger = lru.ledgers.get(hash).cloned()?;
        lru.promote(hash);
        Some(ledger)
    }

    pub fn contains(&self, hash: &CryptoHash) -> bool {
        self.0.lock().unwrap().ledgers.contains_key(hash)
    }

    /// Insert a complete `ledger`, evicting the least recently used ledger if the cache is full.
    pub fn insert(&self, ledger: Arc<Ledger>) {
        debug_assert!(ledger.is_immutable());
        let mut lru = self.0.lock().unwrap();
        let hash = ledger.hash();
        lru.ledgers.insert(hash, ledger);
        lru.promote(&hash);
        while lru.ledgers.len() > lru.capacity {
            match lru.recency.pop_front() {
                Some(evicted) => {
                    lru.ledgers.remove(&evicted);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
