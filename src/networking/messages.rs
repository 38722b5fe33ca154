/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged between peers to acquire ledgers.
//!
//! The wire-encodings of these types are part of the protocol: every implementation that wishes to serve
//! or acquire ledgers must encode them in the exact same (borsh) way.
//!
//! ## Request kinds
//!
//! A [`GetLedger`] request names a ledger by hash and asks for one [kind](LedgerInfoType) of data:
//! - [`Base`](LedgerInfoType::Base): the serialized ledger header. Responders also include the roots of
//!   the account state tree and the transaction tree, if they have them.
//! - [`AsNode`](LedgerInfoType::AsNode) / [`TxNode`](LedgerInfoType::TxNode): the listed nodes of the
//!   account state / transaction tree.
//! - [`Candidate`](LedgerInfoType::Candidate): nodes of a candidate transaction set under consensus.
//!   The ledger sync core never asks for these and treats responses carrying them as invalid.
//!
//! ## Fat responses
//!
//! A request with a non-zero `query_depth` asks the responder to also include the descendants of each
//! requested node, down to `query_depth` levels, saving round trips at the cost of payload size.
//!
//! ## Relay cookies
//!
//! A request may carry a [`RelayCookie`]. A peer that relays the request on behalf of somebody else sets
//! the cookie, and the eventual response must carry the same cookie unchanged so that it can be routed
//! back to the original requester.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{CryptoHash, LedgerSeq, RelayCookie};

/// All message variants used by the ledger sync core.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`GetLedger`].
    GetLedger(GetLedger),

    /// See: [`LedgerData`].
    LedgerData(LedgerData),

    /// See: [`GetObjectsByHash`].
    GetObjectsByHash(GetObjectsByHash),

    /// See: [`ObjectsByHash`].
    ObjectsByHash(ObjectsByHash),
}

impl From<GetLedger> for Message {
    fn from(value: GetLedger) -> Self {
        Message::GetLedger(value)
    }
}

impl From<LedgerData> for Message {
    fn from(value: LedgerData) -> Self {
        Message::LedgerData(value)
    }
}

impl From<GetObjectsByHash> for Message {
    fn from(value: GetObjectsByHash) -> Self {
        Message::GetObjectsByHash(value)
    }
}

impl From<ObjectsByHash> for Message {
    fn from(value: ObjectsByHash) -> Self {
        Message::ObjectsByHash(value)
    }
}

/// Which part of a ledger a [`GetLedger`] or [`LedgerData`] message is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum LedgerInfoType {
    Base,
    TxNode,
    AsNode,
    Candidate,
}

/// How a request was routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum QueryType {
    /// The requester would accept the request being relayed to a peer that has the data.
    Indirect,
}

/// Request for part of a ledger.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetLedger {
    pub ledger_hash: CryptoHash,
    pub ledger_seq: Option<LedgerSeq>,
    pub item_type: LedgerInfoType,

    /// Wire-encoded [`NodeId`](crate::tree::NodeId)s of the requested tree nodes. Empty for
    /// [`Base`](LedgerInfoType::Base) requests.
    pub node_ids: Vec<Vec<u8>>,
    pub query_type: Option<QueryType>,
    pub request_cookie: Option<RelayCookie>,

    /// `0` for a thin response; otherwise the number of levels of descendants to include.
    pub query_depth: u8,
}

impl GetLedger {
    /// A thin request for `item_type` data of the ledger `ledger_hash`, with no node ids.
    pub fn new(ledger_hash: CryptoHash, item_type: LedgerInfoType) -> Self {
        Self {
            ledger_hash,
            ledger_seq: None,
            item_type,
            node_ids: Vec::new(),
            query_type: None,
            request_cookie: None,
            query_depth: 0,
        }
    }

    pub fn is_fat(&self) -> bool {
        self.query_depth > 0
    }
}

/// One node of a [`LedgerData`] response.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LedgerNode {
    /// Wire-encoded [`NodeId`](crate::tree::NodeId). `None` for the header of a
    /// [`Base`](LedgerInfoType::Base) response.
    pub node_id: Option<Vec<u8>>,
    pub node_data: Vec<u8>,
}

/// Response to a [`GetLedger`] request.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LedgerData {
    pub ledger_hash: CryptoHash,
    pub ledger_seq: LedgerSeq,
    pub item_type: LedgerInfoType,
    pub nodes: Vec<LedgerNode>,

    /// Echo of the request's cookie.
    pub request_cookie: Option<RelayCookie>,
}

/// Kinds of object that can be requested by hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ObjectType {
    Ledger,
    StateNode,
    TransactionNode,
}

/// Request for hashed objects (ledger headers or tree nodes) by their hashes, regardless of where they
/// sit in a tree. Used as a fallback when position-based requests keep timing out.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetObjectsByHash {
    pub ledger_hash: CryptoHash,
    pub object_type: ObjectType,
    pub objects: Vec<CryptoHash>,
}

/// An object returned in response to [`GetObjectsByHash`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HashedObject {
    pub hash: CryptoHash,
    pub data: Vec<u8>,
}

/// Response to a [`GetObjectsByHash`] request.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ObjectsByHash {
    pub ledger_hash: CryptoHash,
    pub object_type: ObjectType,
    pub objects: Vec<HashedObject>,
}
