/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Ledger headers and ledgers.
//!
//! A [`Ledger`] is a snapshot of global account state at a given [sequence number](LedgerSeq). It is made
//! up of a [`LedgerHeader`] and two [`HashTree`]s: the account state tree and the transaction tree. The
//! header declares the root hash of both trees, and the hash of the header is the identity of the whole
//! ledger, so verifying the header against a ledger hash transitively pins down every node of both trees.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::tree::HashTree;

use super::{
    crypto_primitives::{hash_with_prefix, HashPrefix},
    data_types::{CryptoHash, LedgerSeq},
};

/// The root record of a ledger.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LedgerHeader {
    pub sequence: LedgerSeq,
    pub total_coins: u64,
    pub parent_hash: CryptoHash,
    pub transaction_hash: CryptoHash,
    pub account_state_hash: CryptoHash,
    pub parent_close_time: u32,
    pub close_time: u32,
    pub close_time_resolution: u8,
    pub close_flags: u8,
}

impl LedgerHeader {
    /// Deserialize a header from `bytes`. The whole slice must be consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<LedgerHeader, LedgerError> {
        LedgerHeader::try_from_slice(bytes).map_err(|_| LedgerError::MalformedHeader)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Safety: serializing into a Vec cannot fail.
        self.try_to_vec().unwrap()
    }

    /// The hash of this header, which is the hash of the ledger.
    pub fn hash(&self) -> CryptoHash {
        hash_with_prefix(HashPrefix::LEDGER_HEADER, &self.to_bytes())
    }
}

/// Enumerates the ways a received ledger header can be unacceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The bytes do not deserialize into a [`LedgerHeader`].
    MalformedHeader,

    /// The header deserializes, but does not hash to the ledger hash being acquired.
    HashMismatch {
        expected: CryptoHash,
        actual: CryptoHash,
    },
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::MalformedHeader => write!(f, "malformed ledger header"),
            LedgerError::HashMismatch { expected, actual } => write!(
                f,
                "ledger hash mismatch: expected {} actual {}",
                expected, actual
            ),
        }
    }
}

/// A ledger, either complete or in the process of being acquired.
///
/// Once [`set_immutable`](Self::set_immutable) has been called, the ledger's trees are never mutated
/// again and it may be shared freely between threads.
#[derive(Clone, Debug)]
pub struct Ledger {
    header: LedgerHeader,
    hash: CryptoHash,
    account_state: HashTree,
    transactions: HashTree,
    immutable: bool,
}

impl Ledger {
    /// Build a complete, immutable ledger from its items. The header's tree hashes are taken from the
    /// trees.
    pub fn build(
        sequence: LedgerSeq,
        parent_hash: CryptoHash,
        close_time: u32,
        accounts: impl IntoIterator<Item = (CryptoHash, Vec<u8>)>,
        transactions: impl IntoIterator<Item = (CryptoHash, Vec<u8>)>,
    ) -> Ledger {
        let account_state = HashTree::from_items(accounts);
        let transactions = HashTree::from_items(transactions);
        let header = LedgerHeader {
            sequence,
            total_coins: 100_000_000_000,
            parent_hash,
            transaction_hash: transactions.root_hash(),
            account_state_hash: account_state.root_hash(),
            parent_close_time: close_time.saturating_sub(10),
            close_time,
            close_time_resolution: 30,
            close_flags: 0,
        };
        Ledger {
            hash: header.hash(),
            header,
            account_state,
            transactions,
            immutable: true,
        }
    }

    /// Create a ledger from a serialized header that must hash to `expected`. Both trees start out empty
    /// and syncing towards the root hashes declared in the header.
    pub fn from_header_bytes(bytes: &[u8], expected: &CryptoHash) -> Result<Ledger, LedgerError> {
        let header = LedgerHeader::from_bytes(bytes)?;
        let actual = header.hash();
        if actual != *expected {
            return Err(LedgerError::HashMismatch {
                expected: *expected,
                actual,
            });
        }
        Ok(Ledger {
            account_state: HashTree::new_syncing(header.account_state_hash),
            transactions: HashTree::new_syncing(header.transaction_hash),
            hash: actual,
            header,
            immutable: false,
        })
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn hash(&self) -> CryptoHash {
        self.hash
    }

    pub fn sequence(&self) -> LedgerSeq {
        self.header.sequence
    }

    pub fn account_state(&self) -> &HashTree {
        &self.account_state
    }

    pub fn transactions(&self) -> &HashTree {
        &self.transactions
    }

    pub(crate) fn account_state_mut(&mut self) -> &mut HashTree {
        debug_assert!(!self.immutable, "mutating an immutable ledger");
        &mut self.account_state
    }

    pub(crate) fn transactions_mut(&mut self) -> &mut HashTree {
        debug_assert!(!self.immutable, "mutating an immutable ledger");
        &mut self.transactions
    }

    /// Whether both trees are complete.
    pub fn is_complete(&self) -> bool {
        self.account_state.is_complete() && self.transactions.is_complete()
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub(crate) fn set_immutable(&mut self) {
        self.immutable = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_and_verifies() {
        let ledger = Ledger::build(
            LedgerSeq::new(7),
            CryptoHash::new([9u8; 32]),
            1000,
            vec![(CryptoHash::new([1u8; 32]), b"alice".to_vec())],
            Vec::new(),
        );
        let bytes = ledger.header().to_bytes();
        let rebuilt = Ledger::from_header_bytes(&bytes, &ledger.hash()).unwrap();
        assert_eq!(rebuilt.header(), ledger.header());
        assert!(!rebuilt.account_state().is_complete());
        assert!(rebuilt.transactions().is_complete());
    }

    #[test]
    fn header_with_wrong_hash_is_rejected() {
        let ledger = Ledger::build(LedgerSeq::new(7), CryptoHash::zero(), 1000, Vec::new(), Vec::new());
        let other = CryptoHash::new([3u8; 32]);
        assert!(matches!(
            Ledger::from_header_bytes(&ledger.header().to_bytes(), &other),
            Err(LedgerError::HashMismatch { .. })
        ));
        assert_eq!(
            Ledger::from_header_bytes(&[1, 2, 3], &other).unwrap_err(),
            LedgerError::MalformedHeader
        );
    }
}
