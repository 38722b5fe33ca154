/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Answers "get ledger" requests from peers that are acquiring a ledger this node has.
//!
//! The response format is the counterpart of what [`LedgerAcquisition`](crate::acquisition::LedgerAcquisition)
//! expects:
//! - A [`Base`](LedgerInfoType::Base) response carries the serialized header first, then the account
//!   state root node and then the transaction root node, as far as those trees are non-empty. The
//!   transaction root is only included after an account state root, since the roots are identified by
//!   position.
//! - A [`AsNode`](LedgerInfoType::AsNode) or [`TxNode`](LedgerInfoType::TxNode) response carries every
//!   requested node, each with its id. If the request is *fat* (`query_depth > 0`), each requested node is
//!   followed by its descendants down to `query_depth` levels below it, which saves the requester round
//!   trips at the cost of a larger response.
//!
//! The request's relay cookie is echoed back unchanged.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
};

use crate::{
    networking::messages::{GetLedger, LedgerData, LedgerInfoType, LedgerNode},
    tree::{HashTree, NodeId, TreeError},
    types::{data_types::CryptoHash, ledger::Ledger},
};

/// Upper bound on the nodes in one response, fat expansion included.
pub const MAX_RESPONSE_NODES: usize = 512;

/// Enumerates the reasons a request cannot be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeError {
    /// The request is for a different ledger than the one being served.
    WrongLedger {
        requested: CryptoHash,
        served: CryptoHash,
    },

    /// The ledger being served is still being acquired.
    IncompleteLedger,

    /// Requests of this item type are not served from ledgers.
    UnsupportedItemType(LedgerInfoType),

    /// A node request without node ids.
    NoNodesRequested,

    /// A requested node id is malformed.
    MalformedNodeId(TreeError),

    /// A requested node does not exist in the tree.
    NodeNotFound(NodeId),
}

impl Display for ServeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::WrongLedger { requested, served } => write!(
                f,
                "request for ledger {} sent to server of ledger {}",
                requested, served
            ),
            ServeError::IncompleteLedger => write!(f, "ledger is incomplete"),
            ServeError::UnsupportedItemType(item_type) => {
                write!(f, "cannot serve {:?} requests", item_type)
            }
            ServeError::NoNodesRequested => write!(f, "node request without node ids"),
            ServeError::MalformedNodeId(error) => write!(f, "{}", error),
            ServeError::NodeNotFound(id) => write!(f, "no node at {}", id),
        }
    }
}

impl From<TreeError> for ServeError {
    fn from(value: TreeError) -> Self {
        ServeError::MalformedNodeId(value)
    }
}

/// Build the "ledger data" response to `request` from the complete `ledger`.
pub fn ledger_data_response(ledger: &Ledger, request: &GetLedger) -> Result<LedgerData, ServeError> {
    if request.ledger_hash != ledger.hash() {
        return Err(ServeError::WrongLedger {
            requested: request.ledger_hash,
            served: ledger.hash(),
        });
    }
    if !ledger.is_complete() {
        return Err(ServeError::IncompleteLedger);
    }

    let nodes = match request.item_type {
        LedgerInfoType::Base => base_nodes(ledger),
        LedgerInfoType::AsNode => tree_nodes(ledger.account_state(), request)?,
        LedgerInfoType::TxNode => tree_nodes(ledger.transactions(), request)?,
        LedgerInfoType::Candidate => {
            return Err(ServeError::UnsupportedItemType(request.item_type))
        }
    };

    log::trace!(
        "Serving {} {:?} nodes of ledger {}",
        nodes.len(),
        request.item_type,
        ledger.hash()
    );
    Ok(LedgerData {
        ledger_hash: ledger.hash(),
        ledger_seq: ledger.sequence(),
        item_type: request.item_type,
        nodes,
        request_cookie: request.request_cookie,
    })
}

fn base_nodes(ledger: &Ledger) -> Vec<LedgerNode> {
    let mut nodes = vec![LedgerNode {
        node_id: None,
        node_data: ledger.header().to_bytes(),
    }];
    let root = NodeId::root();
    if let Some(state_root) = ledger.account_state().get_node(&root) {
        nodes.push(LedgerNode {
            node_id: Some(root.to_wire()),
            node_data: state_root,
        });
        if let Some(transaction_root) = ledger.transactions().get_node(&root) {
            nodes.push(LedgerNode {
                node_id: Some(root.to_wire()),
                node_data: transaction_root,
            });
        }
    }
    nodes
}

fn tree_nodes(tree: &HashTree, request: &GetLedger) -> Result<Vec<LedgerNode>, ServeError> {
    if request.node_ids.is_empty() {
        return Err(ServeError::NoNodesRequested);
    }

    let mut nodes = Vec::new();
    let mut included = HashSet::new();
    for wire_id in &request.node_ids {
        let id = NodeId::from_wire(wire_id)?;
        if tree.node(&id).is_none() {
            return Err(ServeError::NodeNotFound(id));
        }

        // Breadth-first from the requested node, `query_depth` levels down.
        let mut level = vec![id];
        for depth in 0..=request.query_depth {
            let mut next_level = Vec::new();
            for id in level {
                if nodes.len() >= MAX_RESPONSE_NODES {
                    return Ok(nodes);
                }
                let Some(node) = tree.node(&id) else {
                    continue;
                };
                if depth < request.query_depth {
                    next_level.extend(node.children().map(|(branch, _)| id.child(branch)));
                }
                if included.insert(id.clone()) {
                    nodes.push(LedgerNode {
                        node_id: Some(id.to_wire()),
                        node_data: node.to_bytes(),
                    });
                }
            }
            level = next_level;
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::data_types::{LedgerSeq, RelayCookie};

    fn ledger() -> Ledger {
        let accounts = (0..40u8).map(|i| (CryptoHash::new([i.wrapping_mul(37); 32]), vec![i]));
        let transactions = (0..3u8).map(|i| (CryptoHash::new([i.wrapping_mul(91); 32]), vec![i]));
        Ledger::build(
            LedgerSeq::new(100),
            CryptoHash::new([1; 32]),
            1000,
            accounts,
            transactions,
        )
    }

    #[test]
    fn base_response_carries_header_and_roots() {
        let ledger = ledger();
        let mut request = GetLedger::new(ledger.hash(), LedgerInfoType::Base);
        request.request_cookie = Some(RelayCookie::new(42));
        let response = ledger_data_response(&ledger, &request).unwrap();
        assert_eq!(response.nodes.len(), 3);
        assert_eq!(response.nodes[0].node_data, ledger.header().to_bytes());
        assert_eq!(
            response.nodes[1].node_data,
            ledger.account_state().get_node(&NodeId::root()).unwrap()
        );
        assert_eq!(response.request_cookie, Some(RelayCookie::new(42)));
    }

    #[test]
    fn fat_response_includes_descendants() {
        let ledger = ledger();
        let mut request = GetLedger::new(ledger.hash(), LedgerInfoType::AsNode);
        request.node_ids = vec![NodeId::root().to_wire()];

        let thin = ledger_data_response(&ledger, &request).unwrap();
        assert_eq!(thin.nodes.len(), 1);

        request.query_depth = 1;
        let fat = ledger_data_response(&ledger, &request).unwrap();
        let root = ledger.account_state().node(&NodeId::root()).unwrap();
        assert_eq!(fat.nodes.len(), 1 + root.children().count());
    }

    #[test]
    fn bad_requests_are_refused() {
        let ledger = ledger();
        let mut request = GetLedger::new(CryptoHash::new([9; 32]), LedgerInfoType::Base);
        assert!(matches!(
            ledger_data_response(&ledger, &request),
            Err(ServeError::WrongLedger { .. })
        ));

        request.ledger_hash = ledger.hash();
        request.item_type = LedgerInfoType::TxNode;
        assert_eq!(
            ledger_data_response(&ledger, &request),
            Err(ServeError::NoNodesRequested)
        );

        request.node_ids = vec![vec![0x20]];
        assert!(matches!(
            ledger_data_response(&ledger, &request),
            Err(ServeError::MalformedNodeId(_))
        ));
    }
}
