use std::sync::Arc;

use ed25519_dalek::{SigningKey, VerifyingKey};
use ledger_sync::{
    networking::messages::{GetLedger, LedgerData, LedgerInfoType, LedgerNode},
    server::ledger_data_response,
    tree::NodeId,
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{CryptoHash, LedgerSeq},
        ledger::Ledger,
    },
};
use rand_core::OsRng;

pub(crate) fn peer() -> VerifyingKey {
    SigningKey::generate(&mut OsRng).verifying_key()
}

fn key(label: &str, index: usize) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(label.as_bytes());
    hasher.update(index.to_le_bytes());
    CryptoHash::new(hasher.finalize().into())
}

/// A complete ledger with `accounts` account entries and `transactions` transactions.
pub(crate) fn sample_ledger(seq: u32, accounts: usize, transactions: usize) -> Arc<Ledger> {
    Arc::new(Ledger::build(
        LedgerSeq::new(seq),
        key("parent", seq as usize),
        seq * 10,
        (0..accounts).map(|i| (key("account", i), format!("balance {}", i).into_bytes())),
        (0..transactions).map(|i| (key("transaction", i), format!("payment {}", i).into_bytes())),
    ))
}

/// A base response carrying only the header.
pub(crate) fn header_only(ledger: &Ledger) -> LedgerData {
    LedgerData {
        ledger_hash: ledger.hash(),
        ledger_seq: ledger.sequence(),
        item_type: LedgerInfoType::Base,
        nodes: vec![LedgerNode {
            node_id: None,
            node_data: ledger.header().to_bytes(),
        }],
        request_cookie: None,
    }
}

/// The response of an honest peer to `request`.
pub(crate) fn serve(ledger: &Ledger, request: &GetLedger) -> LedgerData {
    ledger_data_response(ledger, request).unwrap()
}

/// A response carrying every node of one tree of `ledger`, parents before children.
pub(crate) fn whole_tree(ledger: &Ledger, item_type: LedgerInfoType) -> LedgerData {
    let mut request = GetLedger::new(ledger.hash(), item_type);
    request.node_ids = vec![NodeId::root().to_wire()];
    request.query_depth = u8::MAX;
    serve(ledger, &request)
}

/// Every node of one tree of `ledger` with its id, parents before children.
pub(crate) fn tree_nodes(ledger: &Ledger, item_type: LedgerInfoType) -> Vec<(NodeId, Vec<u8>)> {
    whole_tree(ledger, item_type)
        .nodes
        .into_iter()
        .map(|node| (NodeId::from_wire(&node.node_id.unwrap()).unwrap(), node.node_data))
        .collect()
}
