use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use ed25519_dalek::VerifyingKey;
use ledger_sync::{
    networking::{
        messages::{GetLedger, LedgerData, Message},
        network::{Network, Penalty},
    },
    server::ledger_data_response,
    types::{
        data_types::{CryptoHash, LedgerSeq},
        ledger::Ledger,
    },
};

type DataSink = Arc<dyn Fn(VerifyingKey, LedgerData) + Send + Sync>;

/// A mock network that records everything sent to it.
///
/// Peers registered with `add_responder` answer every `GetLedger` for their ledger immediately, by
/// passing the response to the sink installed with `set_sink`.
#[derive(Clone, Default)]
pub(crate) struct MockNetwork(Arc<Mutex<MockNetworkState>>);

#[derive(Default)]
struct MockNetworkState {
    connected: Vec<VerifyingKey>,
    holders: HashSet<VerifyingKey>,
    sent: Vec<(VerifyingKey, Message)>,
    charges: Vec<(VerifyingKey, Penalty)>,
    responders: HashMap<VerifyingKey, Arc<Ledger>>,
    sink: Option<DataSink>,
}

impl MockNetwork {
    pub(crate) fn with_peers(peers: &[VerifyingKey]) -> MockNetwork {
        let network = MockNetwork::default();
        network.0.lock().unwrap().connected = peers.to_vec();
        network
    }

    pub(crate) fn disconnect(&self, peer: &VerifyingKey) {
        self.0.lock().unwrap().connected.retain(|p| p != peer)
    }

    /// Make `peer` claim to have every ledger.
    pub(crate) fn advertise(&self, peer: VerifyingKey) {
        self.0.lock().unwrap().holders.insert(peer);
    }

    pub(crate) fn add_responder(&self, peer: VerifyingKey, ledger: Arc<Ledger>) {
        self.0.lock().unwrap().responders.insert(peer, ledger);
    }

    pub(crate) fn set_sink(&self, sink: impl Fn(VerifyingKey, LedgerData) + Send + Sync + 'static) {
        self.0.lock().unwrap().sink = Some(Arc::new(sink));
    }

    /// Take every message sent so far.
    pub(crate) fn take_sent(&self) -> Vec<(VerifyingKey, Message)> {
        std::mem::take(&mut self.0.lock().unwrap().sent)
    }

    /// Take every `GetLedger` sent so far.
    pub(crate) fn take_requests(&self) -> Vec<(VerifyingKey, GetLedger)> {
        self.take_sent()
            .into_iter()
            .filter_map(|(peer, message)| match message {
                Message::GetLedger(request) => Some((peer, request)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn charges(&self) -> Vec<(VerifyingKey, Penalty)> {
        self.0.lock().unwrap().charges.clone()
    }
}

impl Network for MockNetwork {
    fn send(&self, peer: VerifyingKey, message: Message) {
        let response = {
            let mut state = self.0.lock().unwrap();
            let response = match (&message, state.responders.get(&peer), &state.sink) {
                (Message::GetLedger(request), Some(ledger), Some(sink)) => {
                    ledger_data_response(ledger, request)
                        .ok()
                        .map(|data| (sink.clone(), data))
                }
                _ => None,
            };
            state.sent.push((peer, message));
            response
        };
        if let Some((sink, data)) = response {
            sink(peer, data)
        }
    }

    fn peers(&self) -> Vec<VerifyingKey> {
        self.0.lock().unwrap().connected.clone()
    }

    fn is_connected(&self, peer: &VerifyingKey) -> bool {
        self.0.lock().unwrap().connected.contains(peer)
    }

    fn has_ledger(&self, peer: &VerifyingKey, _: &CryptoHash, _: Option<LedgerSeq>) -> bool {
        self.0.lock().unwrap().holders.contains(peer)
    }

    fn charge(&self, peer: &VerifyingKey, penalty: Penalty) {
        self.0.lock().unwrap().charges.push((*peer, penalty))
    }
}
