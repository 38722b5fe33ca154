/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate. Every hashed object (ledger headers and
//!    tree nodes) is hashed together with a four byte [`HashPrefix`] so that an object of one kind can
//!    never be passed off as an object of another kind.
//! 2. **Peer identities**: peers are identified by their [`ed25519_dalek`] verifying keys.

use super::data_types::CryptoHash;

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// Domain separator prepended to an object's bytes before hashing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashPrefix([u8; 4]);

impl HashPrefix {
    /// Prefix of a serialized [`LedgerHeader`](crate::types::ledger::LedgerHeader).
    pub const LEDGER_HEADER: HashPrefix = HashPrefix(*b"LWR\0");

    /// Prefix of an inner node of a [`HashTree`](crate::tree::HashTree).
    pub const INNER_NODE: HashPrefix = HashPrefix(*b"MIN\0");

    /// Prefix of a leaf node of a [`HashTree`](crate::tree::HashTree).
    pub const LEAF_NODE: HashPrefix = HashPrefix(*b"MLN\0");

    pub const fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

/// Hash `bytes` under the domain separator `prefix`.
pub fn hash_with_prefix(prefix: HashPrefix, bytes: &[u8]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(prefix.bytes());
    hasher.update(bytes);
    CryptoHash::new(hasher.finalize().into())
}
