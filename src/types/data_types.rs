/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::fmt::{self, Debug, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

/// A 256-bit hash. Identifies ledgers (the hash of their header) as well as the nodes of the account
/// state and transaction trees.
///
/// The all-zero hash is reserved to mean "nothing", e.g., the transaction tree root of a ledger that
/// contains no transactions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping around `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The reserved all-zero hash.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Get the inner bytes of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }

    /// Get the `index`-th nibble (half-byte) of this hash, counting from the most significant nibble of
    /// the first byte. Used to route keys through a radix-16 tree.
    ///
    /// # Panics
    ///
    /// Panics if `index >= 64`.
    pub fn nibble(&self, index: usize) -> u8 {
        let byte = self.0[index / 2];
        if index % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0f
        }
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Position of a ledger in the chain. The genesis ledger has sequence number 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct LedgerSeq(u32);

impl LedgerSeq {
    /// Create a new `LedgerSeq` with an `int` inner value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the inner `u32` value of this `LedgerSeq`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for LedgerSeq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Opaque token attached to a request so that a relayed response can be routed back to the peer that
/// originally asked for it. Responders must echo it back unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct RelayCookie(u64);

impl RelayCookie {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibbles_are_read_most_significant_first() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xAB;
        bytes[31] = 0x0C;
        let hash = CryptoHash::new(bytes);
        assert_eq!(hash.nibble(0), 0xA);
        assert_eq!(hash.nibble(1), 0xB);
        assert_eq!(hash.nibble(62), 0x0);
        assert_eq!(hash.nibble(63), 0xC);
    }

    #[test]
    fn zero_hash() {
        assert!(CryptoHash::zero().is_zero());
        assert!(!CryptoHash::new([1u8; 32]).is_zero());
        assert_eq!(CryptoHash::default(), CryptoHash::zero());
    }
}
