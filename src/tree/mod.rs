/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Hash-addressed radix-16 Merkle trees.
//!
//! A ledger carries two of these: the account state tree and the transaction tree. The identity of every
//! node is the hash of its contents, and every inner node lists the hashes of its children, so any
//! fragment of a tree received from an untrusted peer can be verified independently as long as its parent
//! is already known.
//!
//! ## Node identifiers
//!
//! A node's position in the tree is a [`NodeId`]: the path of branch nibbles leading to it from the root.
//! The root has the empty path. A leaf holding the item with key `k` sits at some prefix of the nibbles
//! of `k`.
//!
//! ## Syncing
//!
//! A tree that is being acquired is created with [`HashTree::new_syncing`], knowing only its expected root
//! hash. Nodes are then added one at a time with [`HashTree::insert_node`], which checks the node's bytes
//! against the hash declared for that position by the node's parent (or, for the root, against the
//! expected root hash). [`HashTree::missing_nodes`] lists the positions still needed and
//! [`HashTree::is_complete`] becomes true once every node reachable from the root is present.

mod hash_tree;
pub use hash_tree::{AddNode, HashTree};

mod node;
pub use node::{NodeId, TreeNode, MAX_DEPTH};

use std::fmt::{self, Display, Formatter};

use crate::types::data_types::CryptoHash;

/// Enumerates the ways a tree fragment can fail verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The node identifier is longer than [`MAX_DEPTH`] or contains a value that is not a nibble.
    MalformedNodeId,

    /// The node bytes could not be deserialized into a [`TreeNode`], or they deserialize into a node
    /// that can never appear in a well-formed tree (e.g., an inner node without children).
    MalformedNode { id: NodeId },

    /// The node's hash differs from the hash its parent (or the ledger header) declared for its position.
    HashMismatch {
        id: NodeId,
        expected: CryptoHash,
        actual: CryptoHash,
    },

    /// The node's parent is known but has no child at the node's position.
    UnexpectedNode { id: NodeId },

    /// A leaf was supplied at a position that is not a prefix of its key.
    MisplacedLeaf { id: NodeId, key: CryptoHash },
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::MalformedNodeId => write!(f, "malformed node id"),
            TreeError::MalformedNode { id } => write!(f, "malformed node at {}", id),
            TreeError::HashMismatch {
                id,
                expected,
                actual,
            } => write!(
                f,
                "hash mismatch at {}: expected {} actual {}",
                id, expected, actual
            ),
            TreeError::UnexpectedNode { id } => write!(f, "parent declares no child at {}", id),
            TreeError::MisplacedLeaf { id, key } => {
                write!(f, "leaf with key {} cannot sit at {}", key, id)
            }
        }
    }
}
