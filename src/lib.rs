/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Acquisition of ledgers from an unreliable peer-to-peer network.
//!
//! A ledger is a snapshot of global account state: a [header](types::ledger::LedgerHeader) plus two
//! hash-addressed [trees](tree), one of account states and one of the transactions that produced
//! them. This crate reconstructs a ledger known only by its hash, by fetching the header and tree
//! nodes from peers that may be slow, offline, or lying, and verifying every fragment against the
//! hash it is supposed to have before accepting it.
//!
//! The crate is organized bottom-up:
//! - [`peer_set`]: generic bookkeeping of the peers asked for a hash-identified object, with timeout
//!   driven retries and escalation.
//! - [`acquisition`]: the acquisition of one ledger.
//! - [`registry`]: the table of in-flight acquisitions and the entry point for the rest of the node.
//! - [`server`]: the other side of the protocol, answering requests from peers with a local ledger.
//!
//! The collaborators of the core are behind traits, with in-process implementations:
//! [`Network`](networking::network::Network), [`NodeStore`](store::NodeStore),
//! [`JobQueue`](jobs::JobQueue) ([`WorkerPool`](jobs::WorkerPool)), and [`Timer`](timer::Timer)
//! ([`TimerThread`](timer::TimerThread)).

pub mod acquisition;

pub mod config;

pub mod events;

pub mod jobs;

pub(crate) mod logging;

pub mod networking;

pub mod peer_set;

pub mod registry;

pub mod server;

pub mod store;

pub mod timer;

pub mod tree;

pub mod types;
