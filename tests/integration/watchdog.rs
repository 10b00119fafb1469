//! Integration test: the memory watchdog shutting down a live node.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reef_integration_tests::TestNode;
use reef_node::{MemorySampler, MemoryWatchdog, ProcessMemorySampler, WatchdogState};

/// Reports whatever the test stores in it.
#[derive(Default)]
struct DialSampler(AtomicU64);

impl MemorySampler for DialSampler {
    fn sample(&self) -> Option<u64> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

#[tokio::test]
async fn test_crossing_threshold_stops_server() {
    let node = TestNode::start().await;
    let sampler = Arc::new(DialSampler::default());
    sampler.0.store(10, Ordering::SeqCst);

    let watchdog = MemoryWatchdog::new(100, sampler.clone(), Arc::new(node.shutdown.clone()))
        .with_interval(Duration::from_millis(5))
        .spawn();

    // Below the limit the node keeps serving.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let client = node.client();
    assert!(client.set(b"k", b"v", false).await.unwrap());
    assert!(!node.shutdown.is_shutdown());

    sampler.0.store(100, Ordering::SeqCst);
    let state = tokio::time::timeout(Duration::from_secs(5), watchdog)
        .await
        .expect("watchdog did not fire")
        .unwrap();
    assert_eq!(state, WatchdogState::ShuttingDown);
    assert!(node.shutdown.is_shutdown());

    let addr = node.addr;
    node.wait_stopped().await;
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_process_sampler_over_tiny_limit() {
    let node = TestNode::start().await;
    let watchdog = MemoryWatchdog::new(
        1,
        Arc::new(ProcessMemorySampler::new()),
        Arc::new(node.shutdown.clone()),
    )
    .with_interval(Duration::from_millis(5))
    .spawn();

    assert_eq!(watchdog.await.unwrap(), WatchdogState::ShuttingDown);
    node.wait_stopped().await;
}

#[tokio::test]
async fn test_generous_limit_never_fires() {
    let node = TestNode::start().await;
    let watchdog = MemoryWatchdog::new(
        u64::MAX,
        Arc::new(ProcessMemorySampler::new()),
        Arc::new(node.shutdown.clone()),
    )
    .with_interval(Duration::from_millis(5))
    .spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!watchdog.is_finished());
    assert!(!node.is_stopped());

    watchdog.abort();
    node.stop().await;
}
