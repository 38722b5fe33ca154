/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`HashTree`] type: building, serving, and syncing a radix-16 Merkle tree.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::types::data_types::CryptoHash;

use super::{node::TreeNode, NodeId, TreeError};

/// Successful outcomes of [`HashTree::insert_node`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddNode {
    /// The node was verified and added to the tree.
    Useful,

    /// The node was verified, but the tree already had it.
    Duplicate,

    /// The node's parent is not yet in the tree, so its hash cannot be checked. The node was not added.
    Unverifiable,
}

/// A radix-16 Merkle tree whose nodes are all identified by hash.
///
/// A `HashTree` is either complete (built locally with [`from_items`](Self::from_items), or fully synced)
/// or being synced (created with [`new_syncing`](Self::new_syncing) and filled in with
/// [`insert_node`](Self::insert_node)).
#[derive(Clone, Debug)]
pub struct HashTree {
    root_hash: CryptoHash,
    nodes: HashMap<NodeId, (CryptoHash, TreeNode)>,

    /// Number of nodes whose hash has been declared (by a present parent, or as the root hash) but which
    /// are not yet present.
    pending: usize,
}

impl HashTree {
    /// Build a complete tree containing `items`. If `items` contains the same key more than once, the
    /// last occurrence wins. A tree with no items has the zero root hash and no nodes.
    pub fn from_items(items: impl IntoIterator<Item = (CryptoHash, Vec<u8>)>) -> HashTree {
        let items: BTreeMap<CryptoHash, Vec<u8>> = items.into_iter().collect();
        let items: Vec<(CryptoHash, Vec<u8>)> = items.into_iter().collect();
        let mut nodes = HashMap::new();
        let root_hash = if items.is_empty() {
            CryptoHash::zero()
        } else {
            build_subtree(&items, NodeId::root(), &mut nodes)
        };
        HashTree {
            root_hash,
            nodes,
            pending: 0,
        }
    }

    /// Create an empty tree that is expected to hash to `root_hash` once all of its nodes are inserted.
    pub fn new_syncing(root_hash: CryptoHash) -> HashTree {
        HashTree {
            root_hash,
            nodes: HashMap::new(),
            pending: if root_hash.is_zero() { 0 } else { 1 },
        }
    }

    /// The root hash. For a tree being synced, this is the expected root hash.
    pub fn root_hash(&self) -> CryptoHash {
        self.root_hash
    }

    /// Whether the root node itself has been received.
    pub fn has_root(&self) -> bool {
        self.root_hash.is_zero() || self.nodes.contains_key(&NodeId::root())
    }

    pub fn node(&self, id: &NodeId) -> Option<&TreeNode> {
        self.nodes.get(id).map(|(_, node)| node)
    }

    /// Get the serialized bytes of the node at `id`, ready to be sent to a peer.
    pub fn get_node(&self, id: &NodeId) -> Option<Vec<u8>> {
        self.node(id).map(TreeNode::to_bytes)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Verify `bytes` against the hash declared for position `id` and, if they match, add the node.
    ///
    /// Verification never gets skipped: a node whose parent is not yet known is reported as
    /// [`AddNode::Unverifiable`] and is not added.
    pub fn insert_node(&mut self, id: &NodeId, bytes: &[u8]) -> Result<AddNode, TreeError> {
        let expected = if id.is_root() {
            if self.root_hash.is_zero() {
                return Err(TreeError::UnexpectedNode { id: id.clone() });
            }
            self.root_hash
        } else {
            let Some((parent_id, branch)) = id.parent() else {
                return Err(TreeError::UnexpectedNode { id: id.clone() });
            };
            match self.node(&parent_id) {
                None => return Ok(AddNode::Unverifiable),
                Some(TreeNode::Leaf { .. }) => {
                    return Err(TreeError::UnexpectedNode { id: id.clone() })
                }
                Some(TreeNode::Inner { children }) => match children[branch as usize] {
                    Some(hash) => hash,
                    None => return Err(TreeError::UnexpectedNode { id: id.clone() }),
                },
            }
        };

        let node = TreeNode::from_bytes(id, bytes)?;
        let actual = node.hash();
        if actual != expected {
            return Err(TreeError::HashMismatch {
                id: id.clone(),
                expected,
                actual,
            });
        }

        if self.nodes.contains_key(id) {
            return Ok(AddNode::Duplicate);
        }

        self.pending -= 1;
        self.pending += node.children().count();
        self.nodes.insert(id.clone(), (actual, node));
        Ok(AddNode::Useful)
    }

    /// List up to `max` nodes that are declared but not yet present, together with their expected hashes,
    /// in breadth-first order.
    pub fn missing_nodes(&self, max: usize) -> Vec<(NodeId, CryptoHash)> {
        let mut missing = Vec::new();
        if self.pending == 0 || max == 0 {
            return missing;
        }
        if !self.has_root() {
            missing.push((NodeId::root(), self.root_hash));
            return missing;
        }

        let mut queue = VecDeque::from([NodeId::root()]);
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.node(&id) else { continue };
            for (branch, hash) in node.children() {
                let child = id.child(branch);
                if self.nodes.contains_key(&child) {
                    queue.push_back(child);
                } else {
                    missing.push((child, hash));
                    if missing.len() >= max {
                        return missing;
                    }
                }
            }
        }
        missing
    }

    /// The hashes of up to `max` missing nodes.
    pub fn needed_hashes(&self, max: usize) -> Vec<CryptoHash> {
        self.missing_nodes(max)
            .into_iter()
            .map(|(_, hash)| hash)
            .collect()
    }

    /// Whether every node reachable from the root is present.
    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }

    /// Recompute every hash bottom-up and check that the tree hashes to its root hash. Only meaningful for
    /// a complete tree.
    pub fn is_valid(&self) -> bool {
        if self.root_hash.is_zero() {
            return self.nodes.is_empty();
        }
        self.subtree_is_valid(&NodeId::root(), &self.root_hash)
    }

    fn subtree_is_valid(&self, id: &NodeId, expected: &CryptoHash) -> bool {
        match self.node(id) {
            None => false,
            Some(node) => {
                node.hash() == *expected
                    && node
                        .children()
                        .all(|(branch, hash)| self.subtree_is_valid(&id.child(branch), &hash))
            }
        }
    }

    /// Repeatedly ask `fetch` for the bytes of missing nodes, by hash, and insert whatever it returns.
    /// Returns the number of nodes added.
    pub fn fill_from(&mut self, mut fetch: impl FnMut(&CryptoHash) -> Option<Vec<u8>>) -> usize {
        let mut added = 0;
        loop {
            let mut progress = false;
            for (id, hash) in self.missing_nodes(usize::MAX) {
                if let Some(bytes) = fetch(&hash) {
                    if let Ok(AddNode::Useful) = self.insert_node(&id, &bytes) {
                        added += 1;
                        progress = true;
                    }
                }
            }
            if !progress || self.is_complete() {
                return added;
            }
        }
    }

    /// All items in the tree, in key order. Nodes that are still missing are skipped.
    pub fn items(&self) -> Vec<(CryptoHash, Vec<u8>)> {
        let mut items = Vec::new();
        if self.root_hash.is_zero() {
            return items;
        }
        let mut stack = vec![NodeId::root()];
        while let Some(id) = stack.pop() {
            match self.node(&id) {
                None => (),
                Some(TreeNode::Leaf { key, data }) => items.push((*key, data.clone())),
                Some(inner) => {
                    let mut children: Vec<NodeId> =
                        inner.children().map(|(branch, _)| id.child(branch)).collect();
                    children.reverse();
                    stack.extend(children);
                }
            }
        }
        items
    }
}

/// Recursively build the subtree rooted at `id` holding `items` (sorted, unique keys, non-empty), insert
/// its nodes into `nodes`, and return the hash of its root.
fn build_subtree(
    items: &[(CryptoHash, Vec<u8>)],
    id: NodeId,
    nodes: &mut HashMap<NodeId, (CryptoHash, TreeNode)>,
) -> CryptoHash {
    let node = if let [(key, data)] = items {
        TreeNode::Leaf {
            key: *key,
            data: data.clone(),
        }
    } else {
        let depth = id.depth();
        let mut children = [None; 16];
        let mut start = 0;
        while start < items.len() {
            let branch = items[start].0.nibble(depth);
            let end = start
                + items[start..]
                    .iter()
                    .take_while(|(key, _)| key.nibble(depth) == branch)
                    .count();
            children[branch as usize] =
                Some(build_subtree(&items[start..end], id.child(branch), nodes));
            start = end;
        }
        TreeNode::Inner { children }
    };
    let hash = node.hash();
    nodes.insert(id, (hash, node));
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(first: u8, second: u8) -> CryptoHash {
        let mut bytes = [0u8; 32];
        bytes[0] = first;
        bytes[1] = second;
        CryptoHash::new(bytes)
    }

    fn sample_tree() -> HashTree {
        HashTree::from_items(vec![
            (key(0x10, 0), b"a".to_vec()),
            (key(0x11, 0), b"b".to_vec()),
            (key(0x20, 0), b"c".to_vec()),
            (key(0xF0, 1), b"d".to_vec()),
        ])
    }

    /// Copy every node of `source` into `target` in breadth-first order.
    fn sync_all(source: &HashTree, target: &mut HashTree) {
        loop {
            let missing = target.missing_nodes(16);
            if missing.is_empty() {
                return;
            }
            for (id, _) in missing {
                let bytes = source.get_node(&id).unwrap();
                assert_eq!(target.insert_node(&id, &bytes), Ok(AddNode::Useful));
            }
        }
    }

    #[test]
    fn built_tree_is_complete_and_valid() {
        let tree = sample_tree();
        assert!(tree.is_complete());
        assert!(tree.is_valid());
        assert_eq!(tree.items().len(), 4);
        assert_eq!(tree.items()[0], (key(0x10, 0), b"a".to_vec()));
        assert_eq!(tree.items()[3], (key(0xF0, 1), b"d".to_vec()));
    }

    #[test]
    fn empty_tree_has_zero_root() {
        let tree = HashTree::from_items(Vec::new());
        assert!(tree.root_hash().is_zero());
        assert!(tree.is_complete());
        assert!(HashTree::new_syncing(CryptoHash::zero()).is_complete());
    }

    #[test]
    fn sync_reproduces_source() {
        let source = sample_tree();
        let mut target = HashTree::new_syncing(source.root_hash());
        assert!(!target.is_complete());
        assert_eq!(
            target.missing_nodes(10),
            vec![(NodeId::root(), source.root_hash())]
        );
        sync_all(&source, &mut target);
        assert!(target.is_complete());
        assert!(target.is_valid());
        assert_eq!(target.items(), source.items());
    }

    #[test]
    fn corrupted_node_is_rejected_without_changing_the_tree() {
        let source = sample_tree();
        let mut target = HashTree::new_syncing(source.root_hash());
        let root = source.get_node(&NodeId::root()).unwrap();
        target.insert_node(&NodeId::root(), &root).unwrap();

        let (child, _) = target.missing_nodes(1).remove(0);
        let forged = TreeNode::Leaf {
            key: key(0x10, 0),
            data: b"forged".to_vec(),
        };
        let before = target.missing_nodes(16);
        assert!(matches!(
            target.insert_node(&child, &forged.to_bytes()),
            Err(TreeError::HashMismatch { .. }) | Err(TreeError::MisplacedLeaf { .. })
        ));
        assert_eq!(target.missing_nodes(16), before);
        assert_eq!(target.node_count(), 1);
    }

    #[test]
    fn node_without_parent_is_unverifiable() {
        let source = sample_tree();
        let mut target = HashTree::new_syncing(source.root_hash());
        let deep = NodeId::root().child(1).child(0);
        let bytes = source.get_node(&deep).unwrap();
        assert_eq!(target.insert_node(&deep, &bytes), Ok(AddNode::Unverifiable));
        assert_eq!(target.node_count(), 0);
    }

    #[test]
    fn duplicates_are_reported() {
        let source = sample_tree();
        let mut target = HashTree::new_syncing(source.root_hash());
        let root = source.get_node(&NodeId::root()).unwrap();
        assert_eq!(target.insert_node(&NodeId::root(), &root), Ok(AddNode::Useful));
        assert_eq!(target.insert_node(&NodeId::root(), &root), Ok(AddNode::Duplicate));
    }

    #[test]
    fn missing_single_leaf_keeps_tree_incomplete() {
        let source = sample_tree();
        let mut target = HashTree::new_syncing(source.root_hash());
        let withheld = NodeId::root().child(2);
        loop {
            let missing: Vec<_> = target
                .missing_nodes(16)
                .into_iter()
                .filter(|(id, _)| *id != withheld)
                .collect();
            if missing.is_empty() {
                break;
            }
            for (id, _) in missing {
                target.insert_node(&id, &source.get_node(&id).unwrap()).unwrap();
            }
        }
        assert!(!target.is_complete());
        assert_eq!(target.missing_nodes(16).len(), 1);

        let bytes = source.get_node(&withheld).unwrap();
        assert_eq!(target.insert_node(&withheld, &bytes), Ok(AddNode::Useful));
        assert!(target.is_complete());
    }

    #[test]
    fn fill_from_uses_hash_lookups() {
        let source = sample_tree();
        let by_hash: HashMap<CryptoHash, Vec<u8>> = source
            .nodes
            .values()
            .map(|(hash, node)| (*hash, node.to_bytes()))
            .collect();
        let mut target = HashTree::new_syncing(source.root_hash());
        let added = target.fill_from(|hash| by_hash.get(hash).cloned());
        assert_eq!(added, source.node_count());
        assert!(target.is_complete());
    }
}
