/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use ed25519_dalek::VerifyingKey;

use super::{messages::Message, network::Network};

/// Messages produced while an acquisition's lock is held.
///
/// Nothing is transmitted while the lock is held. Mutating operations push their requests into an
/// `Outbox`, and the caller flushes it through a [`SenderHandle`] once the lock is released.
#[derive(Default)]
pub(crate) struct Outbox(Vec<(VerifyingKey, Message)>);

impl Outbox {
    pub(crate) fn push<S: Into<Message>>(&mut self, peer: VerifyingKey, msg: S) {
        self.0.push((peer, msg.into()))
    }

    /// Queue a copy of `msg` for each of `peers`.
    pub(crate) fn push_to_all<S: Into<Message>>(
        &mut self,
        peers: impl IntoIterator<Item = VerifyingKey>,
        msg: S,
    ) {
        let msg = msg.into();
        for peer in peers {
            self.0.push((peer, msg.clone()))
        }
    }
}

/// Handle for sending messages to the [`Network`].
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    /// Send everything queued in `outbox`, in order.
    pub(crate) fn flush(&self, outbox: Outbox) {
        for (peer, msg) in outbox.0 {
            self.network.send(peer, msg)
        }
    }
}
