/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use ed25519_dalek::VerifyingKey;

use crate::types::data_types::{CryptoHash, LedgerSeq};

use super::messages::Message;

/// The services the ledger sync core needs from the node's peer-to-peer layer.
///
/// Implementations are shared between the acquisitions, their timers, and the worker threads that
/// process peer responses, so every method takes `&self` and must not block.
pub trait Network: Clone + Send + Sync + 'static {
    /// Send a message to the specified peer without blocking. Delivery is best-effort.
    fn send(&self, peer: VerifyingKey, message: Message);

    /// The peers that are currently connected.
    fn peers(&self) -> Vec<VerifyingKey>;

    /// Whether `peer` is currently connected.
    fn is_connected(&self, peer: &VerifyingKey) -> bool;

    /// Whether `peer` has advertised that it holds the ledger identified by `hash` (and `seq`).
    fn has_ledger(&self, peer: &VerifyingKey, hash: &CryptoHash, seq: Option<LedgerSeq>) -> bool;

    /// Apply a reputation penalty to `peer`. How penalties translate into disconnections or bans is up to
    /// the implementation.
    fn charge(&self, peer: &VerifyingKey, penalty: Penalty);
}

/// Reasons a peer is charged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Penalty {
    /// The peer sent data that failed hash verification, or could not be parsed.
    InvalidData,

    /// The peer sent data for a ledger nobody asked for.
    UnwantedData,

    /// The peer sent a response that is structurally invalid (e.g., empty, or of an unknown kind).
    InvalidRequest,
}
