use std::{sync::Arc, time::Duration};

use log::LevelFilter;

use ledger_sync::{
    acquisition::AcquisitionOutcome,
    config::Configuration,
    jobs::WorkerPool,
    networking::messages::{GetLedger, LedgerInfoType},
    registry::RegistrySpec,
    server::ledger_data_response,
    store::MemNodeStore,
    timer::TimerThread,
};

mod common;

use common::{
    ledgers::{peer, sample_ledger},
    logging::setup_logger,
    network::MockNetwork,
};

/// Tests acquiring a ledger with real worker threads and a real timer.
///
/// One peer answers every request as soon as it is sent, a second peer never answers. Responses are
/// handed to the registry from the "network thread" through `dispatch_peer_data`, so all verification
/// happens on the worker pool.
#[test]
fn end_to_end_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components.

    // 1.1. Create the ledger to acquire, and a network where peer A serves it and peer B stays silent.
    let (a, b) = (peer(), peer());
    let ledger = sample_ledger(1000, 300, 40);
    let network = MockNetwork::with_peers(&[a, b]);
    network.add_responder(a, ledger.clone());

    // 1.2. Start the registry on a worker pool and a timer thread.
    let configuration = Configuration::builder()
        .timer_interval(Duration::from_millis(50))
        .build();
    let registry = RegistrySpec::builder()
        .network(network.clone())
        .node_store(MemNodeStore::new())
        .job_queue(Arc::new(WorkerPool::start(4)))
        .timer(Arc::new(TimerThread::start()))
        .configuration(configuration)
        .build()
        .start();

    // 1.3. Route responses back into the registry.
    let sink = registry.clone();
    network.set_sink(move |origin, data| sink.dispatch_peer_data(origin, data));

    // 2. Acquire the ledger and wait for the outcome.
    let acquisition = registry
        .find_or_create(ledger.hash(), ledger.sequence())
        .unwrap();
    let outcome = acquisition
        .subscribe()
        .recv_timeout(Duration::from_secs(20))
        .unwrap();

    // 3. The acquired ledger serves the same data as the source ledger.
    let AcquisitionOutcome::Complete(acquired) = outcome else {
        panic!("acquisition did not complete");
    };
    assert_eq!(acquired.hash(), ledger.hash());
    assert!(acquired.account_state().is_valid());
    assert!(acquired.transactions().is_valid());
    let request = GetLedger::new(ledger.hash(), LedgerInfoType::Base);
    assert_eq!(
        ledger_data_response(&acquired, &request),
        ledger_data_response(&ledger, &request)
    );
    assert!(network.charges().is_empty());

    // 4. The ended acquisition is swept from the registry.
    assert_eq!(registry.sweep(), 1);
    assert!(registry.is_empty());
}
