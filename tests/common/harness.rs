use std::sync::{
    mpsc::{self, Receiver},
    Arc,
};

use ed25519_dalek::VerifyingKey;
use ledger_sync::{
    config::Configuration,
    events::Event,
    networking::messages::LedgerInfoType,
    registry::{AcquisitionRegistry, RegistrySpec},
    store::MemNodeStore,
    types::ledger::Ledger,
};

use super::{
    ledgers::serve,
    network::MockNetwork,
    services::{InlineJobQueue, ManualTimer},
};

/// A registry wired to a mock network, an inline job queue, and a manual timer.
pub(crate) struct Harness {
    pub(crate) network: MockNetwork,
    pub(crate) node_store: MemNodeStore,
    pub(crate) jobs: Arc<InlineJobQueue>,
    pub(crate) timer: Arc<ManualTimer>,
    pub(crate) registry: AcquisitionRegistry<MockNetwork, MemNodeStore>,
    pub(crate) events: Receiver<Event>,
}

impl Harness {
    pub(crate) fn new(peers: &[VerifyingKey], configuration: Configuration) -> Harness {
        Harness::with_store(peers, configuration, MemNodeStore::new())
    }

    pub(crate) fn with_store(
        peers: &[VerifyingKey],
        configuration: Configuration,
        node_store: MemNodeStore,
    ) -> Harness {
        let network = MockNetwork::with_peers(peers);
        let jobs = Arc::new(InlineJobQueue::default());
        let timer = Arc::new(ManualTimer::default());
        let (event_publisher, events) = mpsc::channel();
        let registry = RegistrySpec::builder()
            .network(network.clone())
            .node_store(node_store.clone())
            .job_queue(jobs.clone())
            .timer(timer.clone())
            .configuration(configuration)
            .event_publisher(event_publisher)
            .build()
            .start();
        Harness {
            network,
            node_store,
            jobs,
            timer,
            registry,
            events,
        }
    }

    /// Answer the requests sent so far with the data of `ledger`, as long as they keep coming, but only
    /// from the peers in `responders` and only for item types accepted by `filter`. Returns the number
    /// of responses delivered.
    pub(crate) fn respond(
        &self,
        ledger: &Ledger,
        responders: &[VerifyingKey],
        filter: impl Fn(LedgerInfoType) -> bool,
    ) -> usize {
        let mut delivered = 0;
        loop {
            let requests: Vec<_> = self
                .network
                .take_requests()
                .into_iter()
                .filter(|(peer, request)| {
                    responders.contains(peer)
                        && request.ledger_hash == ledger.hash()
                        && filter(request.item_type)
                })
                .collect();
            if requests.is_empty() {
                return delivered;
            }
            for (peer, request) in requests {
                self.registry.on_peer_data(peer, serve(ledger, &request));
                delivered += 1;
            }
        }
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.try_iter().collect()
    }
}
