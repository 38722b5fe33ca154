/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via
//! [`Configuration::log_events`](crate::config::Configuration::log_events).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveLedgerData](crate::events::ReceiveLedgerDataEvent) is printed:
//!
//! ```text
//! ReceiveLedgerData, 1701329264, Id5u7f6, fNGCJyk, AsNode, 12
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the public address of the
//!   peer that sent the data.
//! - The fourth value is the first seven characters of the Base64 encoding of the ledger hash.
//! - The fifth value is the kind of data received.
//! - The sixth value is the number of nodes in the message.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START_ACQUISITION: &str = "StartAcquisition";
pub const ACQUISITION_TIMEOUT: &str = "AcquisitionTimeout";
pub const COMPLETE_ACQUISITION: &str = "CompleteAcquisition";
pub const FAIL_ACQUISITION: &str = "FailAcquisition";
pub const ABORT_ACQUISITION: &str = "AbortAcquisition";

pub const SEND_LEDGER_REQUEST: &str = "SendLedgerRequest";
pub const RECEIVE_LEDGER_DATA: &str = "ReceiveLedgerData";
pub const REJECT_NODE: &str = "RejectNode";

pub const SWEEP_REGISTRY: &str = "SweepRegistry";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Event {
    /// Log this event with the default logging handler of its type.
    pub(crate) fn log(&self) {
        match self {
            Event::StartAcquisition(event) => StartAcquisitionEvent::get_logger()(event),
            Event::AcquisitionTimeout(event) => AcquisitionTimeoutEvent::get_logger()(event),
            Event::CompleteAcquisition(event) => CompleteAcquisitionEvent::get_logger()(event),
            Event::FailAcquisition(event) => FailAcquisitionEvent::get_logger()(event),
            Event::AbortAcquisition(event) => AbortAcquisitionEvent::get_logger()(event),
            Event::SendLedgerRequest(event) => SendLedgerRequestEvent::get_logger()(event),
            Event::ReceiveLedgerData(event) => ReceiveLedgerDataEvent::get_logger()(event),
            Event::RejectNode(event) => RejectNodeEvent::get_logger()(event),
            Event::SweepRegistry(event) => SweepRegistryEvent::get_logger()(event),
        }
    }
}

impl Logger for StartAcquisitionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_acquisition_event: &StartAcquisitionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_ACQUISITION,
                secs_since_unix_epoch(start_acquisition_event.timestamp),
                first_seven_base64_chars(&start_acquisition_event.ledger.bytes()),
                start_acquisition_event.sequence
            )
        };
        Box::new(logger)
    }
}

impl Logger for AcquisitionTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |acquisition_timeout_event: &AcquisitionTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ACQUISITION_TIMEOUT,
                secs_since_unix_epoch(acquisition_timeout_event.timestamp),
                first_seven_base64_chars(&acquisition_timeout_event.ledger.bytes()),
                acquisition_timeout_event.timeouts,
                acquisition_timeout_event.aggressive
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompleteAcquisitionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |complete_acquisition_event: &CompleteAcquisitionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMPLETE_ACQUISITION,
                secs_since_unix_epoch(complete_acquisition_event.timestamp),
                first_seven_base64_chars(&complete_acquisition_event.ledger.bytes()),
                complete_acquisition_event.sequence
            )
        };
        Box::new(logger)
    }
}

impl Logger for FailAcquisitionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fail_acquisition_event: &FailAcquisitionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FAIL_ACQUISITION,
                secs_since_unix_epoch(fail_acquisition_event.timestamp),
                first_seven_base64_chars(&fail_acquisition_event.ledger.bytes()),
                fail_acquisition_event.timeouts
            )
        };
        Box::new(logger)
    }
}

impl Logger for AbortAcquisitionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |abort_acquisition_event: &AbortAcquisitionEvent| {
            log::info!(
                "{}, {}, {}",
                ABORT_ACQUISITION,
                secs_since_unix_epoch(abort_acquisition_event.timestamp),
                first_seven_base64_chars(&abort_acquisition_event.ledger.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendLedgerRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_ledger_request_event: &SendLedgerRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {}",
                SEND_LEDGER_REQUEST,
                secs_since_unix_epoch(send_ledger_request_event.timestamp),
                first_seven_base64_chars(&send_ledger_request_event.peer.to_bytes()),
                first_seven_base64_chars(&send_ledger_request_event.ledger.bytes()),
                send_ledger_request_event.item_type,
                send_ledger_request_event.node_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveLedgerDataEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_ledger_data_event: &ReceiveLedgerDataEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {}",
                RECEIVE_LEDGER_DATA,
                secs_since_unix_epoch(receive_ledger_data_event.timestamp),
                first_seven_base64_chars(&receive_ledger_data_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_ledger_data_event.ledger.bytes()),
                receive_ledger_data_event.item_type,
                receive_ledger_data_event.node_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectNodeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_node_event: &RejectNodeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REJECT_NODE,
                secs_since_unix_epoch(reject_node_event.timestamp),
                first_seven_base64_chars(&reject_node_event.origin.to_bytes()),
                first_seven_base64_chars(&reject_node_event.ledger.bytes()),
                reject_node_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for SweepRegistryEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |sweep_registry_event: &SweepRegistryEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SWEEP_REGISTRY,
                secs_since_unix_epoch(sweep_registry_event.timestamp),
                sweep_registry_event.removed,
                sweep_registry_event.remaining
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_prefix_is_seven_chars() {
        assert_eq!(first_seven_base64_chars(&[0u8; 32]), "AAAAAAA");
        assert_eq!(first_seven_base64_chars(&[0u8; 3]), "AAAA");
    }
}
