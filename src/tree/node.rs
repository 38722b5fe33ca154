/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Node identifiers and node contents.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::{hash_with_prefix, HashPrefix},
    data_types::CryptoHash,
};

use super::TreeError;

/// Maximum depth of a node. A key has 64 nibbles, so a leaf can sit at most 64 branches below the root.
pub const MAX_DEPTH: usize = 64;

/// Position of a node in a [`HashTree`](super::HashTree), expressed as the nibble path from the root.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(Vec<u8>);

impl NodeId {
    /// The identifier of the root node.
    pub fn root() -> Self {
        NodeId(Vec::new())
    }

    /// Parse a node identifier received over the wire. Each byte is one nibble.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, TreeError> {
        if bytes.len() > MAX_DEPTH || bytes.iter().any(|nibble| *nibble > 0x0f) {
            return Err(TreeError::MalformedNodeId);
        }
        Ok(NodeId(bytes.to_vec()))
    }

    pub fn to_wire(&self) -> Vec<u8> {
        self.0.clone()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn nibbles(&self) -> &[u8] {
        &self.0
    }

    /// The identifier of the child of this node on `branch`.
    pub fn child(&self, branch: u8) -> NodeId {
        debug_assert!(branch < 16 && self.depth() < MAX_DEPTH);
        let mut path = self.0.clone();
        path.push(branch);
        NodeId(path)
    }

    /// The identifier of this node's parent, and the branch of the parent that leads here. `None` for the
    /// root.
    pub fn parent(&self) -> Option<(NodeId, u8)> {
        let (branch, path) = self.0.split_last()?;
        Some((NodeId(path.to_vec()), *branch))
    }

    /// Whether a leaf with `key` could sit at this position.
    pub fn is_prefix_of(&self, key: &CryptoHash) -> bool {
        self.0
            .iter()
            .enumerate()
            .all(|(index, nibble)| key.nibble(index) == *nibble)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID({},", self.depth())?;
        for nibble in &self.0 {
            write!(f, "{:X}", nibble)?;
        }
        write!(f, ")")
    }
}

/// Contents of a single tree node.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum TreeNode {
    /// A node with up to 16 children, one per nibble value. Each present child is referenced by hash.
    Inner { children: [Option<CryptoHash>; 16] },

    /// A node holding one item.
    Leaf { key: CryptoHash, data: Vec<u8> },
}

impl TreeNode {
    /// Deserialize a node from its wire `bytes`. The whole slice must be consumed.
    pub fn from_bytes(id: &NodeId, bytes: &[u8]) -> Result<TreeNode, TreeError> {
        let node =
            TreeNode::try_from_slice(bytes).map_err(|_| TreeError::MalformedNode { id: id.clone() })?;
        match &node {
            TreeNode::Inner { children } => {
                if id.depth() >= MAX_DEPTH || children.iter().all(Option::is_none) {
                    return Err(TreeError::MalformedNode { id: id.clone() });
                }
            }
            TreeNode::Leaf { key, .. } => {
                if !id.is_prefix_of(key) {
                    return Err(TreeError::MisplacedLeaf {
                        id: id.clone(),
                        key: *key,
                    });
                }
            }
        }
        Ok(node)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Safety: serializing into a Vec cannot fail.
        self.try_to_vec().unwrap()
    }

    pub fn hash(&self) -> CryptoHash {
        let prefix = match self {
            TreeNode::Inner { .. } => HashPrefix::INNER_NODE,
            TreeNode::Leaf { .. } => HashPrefix::LEAF_NODE,
        };
        hash_with_prefix(prefix, &self.to_bytes())
    }

    /// Iterate over the `(branch, child hash)` pairs of an inner node. Empty for leaves.
    pub fn children(&self) -> impl Iterator<Item = (u8, CryptoHash)> + '_ {
        let children: &[Option<CryptoHash>] = match self {
            TreeNode::Inner { children } => children,
            TreeNode::Leaf { .. } => &[],
        };
        children
            .iter()
            .enumerate()
            .filter_map(|(branch, child)| child.map(|hash| (branch as u8, hash)))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }
}
