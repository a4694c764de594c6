// src/tests/lifecycle_tests.rs

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing_test::traced_test;

use crate::backend::{DeliveryBackend, MockBackend};
use crate::config::MockBackendConfig;
use crate::dispatcher::Dispatcher;
use crate::message::{DeliveryStatus, EmailContent};
use crate::test_utils::{as_backends, call_log, content, fast_config, ScriptedBackend};

async fn wait_until_drained(dispatcher: &Dispatcher) {
    for _ in 0..1_000 {
        if dispatcher.is_drained().await {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("dispatcher did not drain");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_pair_end_to_end() {
    let backends: Vec<Arc<dyn DeliveryBackend>> = vec![
        Arc::new(MockBackend::new(MockBackendConfig::provider_a())),
        Arc::new(MockBackend::new(MockBackendConfig::provider_b())),
    ];
    let dispatcher = Dispatcher::new(backends, fast_config()).unwrap();
    let tasks = dispatcher.start();

    let email = EmailContent::new("a@x.com", "b@x.com", "S", "B");
    let first = dispatcher.submit(email.clone()).await.unwrap();
    let second = dispatcher.submit(email).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(dispatcher.list_all().await.len(), 1);

    wait_until_drained(&dispatcher).await;

    let records = dispatcher.list_all().await;
    assert_eq!(records.len(), 1);
    assert!(matches!(
        records[0].status,
        DeliveryStatus::Sent | DeliveryStatus::Failed
    ));

    dispatcher.shutdown();
    tasks.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_loops_deliver_and_publish_metrics() {
    let log = call_log();
    let a = ScriptedBackend::always_ok("a", &log);
    let dispatcher = Dispatcher::new(as_backends(&[a.clone()]), fast_config()).unwrap();
    let tasks = dispatcher.start();

    for n in 0..5 {
        dispatcher.submit(content(n)).await.unwrap();
    }
    wait_until_drained(&dispatcher).await;

    // Give the metrics loop a tick to publish
    time::sleep(Duration::from_millis(50)).await;
    let metrics = dispatcher.metrics().await;
    assert_eq!(metrics.total_sent, 5);
    assert_eq!(metrics.queue_length, 0);
    assert_eq!(metrics.success_rate, 100.0);

    dispatcher.shutdown();
    tasks.join().await;
    assert_eq!(a.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_new_dispatches() {
    let log = call_log();
    let a = ScriptedBackend::always_ok("a", &log);
    let dispatcher = Dispatcher::new(as_backends(&[a.clone()]), fast_config()).unwrap();

    let tasks = dispatcher.start();
    dispatcher.shutdown();
    tasks.join().await;

    let id = dispatcher.submit(content(1)).await.unwrap().id;
    time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        dispatcher.get_status(&id).await.unwrap().status,
        DeliveryStatus::Pending
    );
    assert_eq!(a.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_submissions_create_one_record() {
    let log = call_log();
    let a = ScriptedBackend::always_ok("a", &log);
    let dispatcher = Dispatcher::new(as_backends(&[a]), fast_config()).unwrap();

    let handles = (0..32).map(|_| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.submit(content(7)).await.unwrap().id })
    });
    let ids: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(dispatcher.list_all().await.len(), 1);
    assert_eq!(dispatcher.queue_len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_interleave_with_dispatch_loop() {
    let log = call_log();
    let a = Arc::new(ScriptedBackend::new("a", true, &log).with_delay(Duration::from_millis(20)));
    let dispatcher = Dispatcher::new(as_backends(&[a]), fast_config()).unwrap();
    let tasks = dispatcher.start();

    let submitters: Vec<_> = (0..20)
        .map(|n| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit(content(n)).await.unwrap() })
        })
        .collect();
    let readers: Vec<_> = (0..20)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let records = dispatcher.list_all().await;
                let _ = dispatcher.refresh_metrics().await;
                let _ = dispatcher.backend_status().await;
                records.len()
            })
        })
        .collect();

    join_all(submitters).await;
    for count in join_all(readers).await {
        assert!(count.unwrap() <= 20);
    }

    wait_until_drained(&dispatcher).await;
    dispatcher.shutdown();
    tasks.join().await;

    let metrics = dispatcher.refresh_metrics().await;
    assert_eq!(metrics.total_sent, 20);
    assert!(dispatcher
        .list_all()
        .await
        .iter()
        .all(|r| r.status == DeliveryStatus::Sent));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_transitions_reach_tracing() {
    let log = call_log();
    let a = ScriptedBackend::always_failing("a", &log);
    let dispatcher = Dispatcher::new(as_backends(&[a]), fast_config()).unwrap();

    let id = dispatcher.submit(content(1)).await.unwrap().id;
    dispatcher.dispatch_next().await;

    assert!(logs_contain(&format!("Email {id} queued for sending")));
    assert!(logs_contain("Provider a failed"));
    assert!(logs_contain("All providers failed"));
}
