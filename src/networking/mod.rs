/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! The ledger sync core does not manage connections itself. The embedding node provides an implementation
//! of [`Network`](network::Network) that delivers [`Message`](messages::Message)s to peers, reports which
//! peers are connected, and applies reputation penalties to misbehaving peers. Incoming messages are
//! handed to the core through [`AcquisitionRegistry`](crate::registry::AcquisitionRegistry).

pub mod network;

pub mod messages;

pub(crate) mod sending;
