/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across multiple components of the ledger sync core.
//!
//! Types that are specific to a single component, for example the wire messages exchanged with peers,
//! live next to that component, e.g., [`crate::networking::messages`].

pub mod crypto_primitives;

pub mod data_types;

pub mod ledger;
