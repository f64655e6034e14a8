use std::time::Duration;

use querybench::benchmark;
use querybench::config::{Batch, Config, Remote, Timeouts};
use querybench::workload::QueryWorkload;
use querybench_protocol::transport::TcpTransport;
use querybench_protocol::{DispatchOptions, Dispatcher, Error, Payload};
use querybench_test::worker::TestWorker;

#[tokio::test]
async fn replies_match_their_queries() {
    querybench_test::tracing::init();
    let worker = TestWorker::with_delay(Duration::from_millis(1), Duration::from_millis(20)).await;

    let transport = TcpTransport::connect(&worker.addr(), "client_loopback")
        .await
        .unwrap();
    let mut dispatcher = Dispatcher::new(transport, DispatchOptions::default());

    let mut workload = QueryWorkload::builder("person").seed(3).build();
    let items = dispatcher
        .generate_batch(200, || workload.next_query())
        .unwrap();
    let expected: Vec<_> = items
        .iter()
        .map(|item| (item.id.clone(), item.query.clone()))
        .collect();

    let (pending, _) = dispatcher.dispatch_all(items).await.unwrap();
    let collection = dispatcher.collect_until_complete(pending).await.unwrap();

    assert_eq!(collection.results.len(), 200);
    assert_eq!(collection.stats.strays(), 0);
    for (id, query) in expected {
        assert_eq!(collection.results.get(&id), Some(&query));
    }
}

#[tokio::test]
async fn benchmark_runs_all_rounds() {
    querybench_test::tracing::init();
    let worker = TestWorker::new().await;

    let config = Config {
        remote: Remote::Tcp { addr: worker.addr() },
        batch: Batch {
            count: 50,
            seed: Some(11),
            ..Default::default()
        },
        rounds: 3,
        ..Default::default()
    };

    let metrics = benchmark::run(&config, false).await.unwrap();

    assert_eq!(metrics.dispatched, 150);
    assert_eq!(metrics.collected, 150);
    assert_eq!(metrics.strays, 0);
    assert_eq!(metrics.latency.count(), 150);
    assert!(metrics.bytes_sent > 0);
    assert!(metrics.bytes_received > 0);
}

#[tokio::test]
async fn slow_worker_hits_deadline() {
    querybench_test::tracing::init();
    let worker =
        TestWorker::with_delay(Duration::from_millis(500), Duration::from_millis(500)).await;

    let transport = TcpTransport::connect(&worker.addr(), "client_slow")
        .await
        .unwrap();
    let options = DispatchOptions {
        deadline: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(transport, options);

    let result = dispatcher
        .run(5, || Payload::from("SELECT 1"))
        .await;

    let Err(Error::Timeout { pending, .. }) = result else {
        panic!("expected a timeout, got {result:?}");
    };
    assert_eq!(pending.len(), 5);
}

#[tokio::test]
async fn benchmark_fails_on_timeout() {
    let worker =
        TestWorker::with_delay(Duration::from_millis(500), Duration::from_millis(500)).await;

    let config = Config {
        remote: Remote::Tcp { addr: worker.addr() },
        batch: Batch {
            count: 3,
            ..Default::default()
        },
        timeouts: Timeouts {
            deadline: Some(Duration::from_millis(50)),
            idle: None,
        },
        ..Default::default()
    };

    let err = benchmark::run(&config, false).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Timeout { .. })
    ));
}
