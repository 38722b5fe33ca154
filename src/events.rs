/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted while acquiring ledgers.
//!
//! An event for a given action indicates that the action has been completed. Events are logged (see
//! [`logging`](crate::logging)) if [`Configuration::log_events`](crate::config::Configuration::log_events)
//! is set, and sent to the event publisher passed to the
//! [registry](crate::registry::RegistrySpec) if there is one.

use std::{sync::mpsc::Sender, time::SystemTime};

use ed25519_dalek::VerifyingKey;

use crate::{
    networking::messages::LedgerInfoType,
    types::data_types::{CryptoHash, LedgerSeq},
};

#[derive(Clone, Debug)]
pub enum Event {
    // Acquisition lifecycle events.
    StartAcquisition(StartAcquisitionEvent),
    AcquisitionTimeout(AcquisitionTimeoutEvent),
    CompleteAcquisition(CompleteAcquisitionEvent),
    FailAcquisition(FailAcquisitionEvent),
    AbortAcquisition(AbortAcquisitionEvent),
    // Events that involve exchanging messages with peers.
    SendLedgerRequest(SendLedgerRequestEvent),
    ReceiveLedgerData(ReceiveLedgerDataEvent),
    RejectNode(RejectNodeEvent),
    // Registry maintenance events.
    SweepRegistry(SweepRegistryEvent),
}

/// Logs events and forwards them to an optional subscriber.
#[derive(Clone)]
pub(crate) struct EventPublisher {
    sender: Option<Sender<Event>>,
    log_events: bool,
}

impl EventPublisher {
    pub(crate) fn new(sender: Option<Sender<Event>>, log_events: bool) -> Self {
        Self { sender, log_events }
    }

    pub(crate) fn publish(&self, event: Event) {
        if self.log_events {
            event.log();
        }
        if let Some(sender) = &self.sender {
            // The subscriber going away must not disturb acquisitions.
            let _ = sender.send(event);
        }
    }
}

/// A new acquisition was registered and started requesting data.
#[derive(Clone, Debug)]
pub struct StartAcquisitionEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub sequence: LedgerSeq,
}

/// A timer tick of an acquisition passed without the acquisition completing.
#[derive(Clone, Debug)]
pub struct AcquisitionTimeoutEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub timeouts: u32,
    pub aggressive: bool,
}

#[derive(Clone, Debug)]
pub struct CompleteAcquisitionEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub sequence: LedgerSeq,
}

#[derive(Clone, Debug)]
pub struct FailAcquisitionEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
    pub timeouts: u32,
}

#[derive(Clone, Debug)]
pub struct AbortAcquisitionEvent {
    pub timestamp: SystemTime,
    pub ledger: CryptoHash,
}

/// A request for part of a ledger was queued for sending to `peer`.
#[derive(Clone, Debug)]
pub struct SendLedgerRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub ledger: CryptoHash,
    pub item_type: LedgerInfoType,
    pub node_count: usize,
}

#[derive(Clone, Debug)]
pub struct ReceiveLedgerDataEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub ledger: CryptoHash,
    pub item_type: LedgerInfoType,
    pub node_count: usize,
}

/// A header or tree node received from `origin` failed verification.
#[derive(Clone, Debug)]
pub struct RejectNodeEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub ledger: CryptoHash,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct SweepRegistryEvent {
    pub timestamp: SystemTime,
    pub removed: usize,
    pub remaining: usize,
}
