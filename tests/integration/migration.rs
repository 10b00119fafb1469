//! Integration test: range migration between two live nodes.
//!
//! A source node is seeded over the wire, receives a migration directive as
//! a `get`, and pushes the matching records to a destination node.

use reef_node::{ACK, MigrationDirective};
use reef_partition::KeyRange;
use reef_integration_tests::{
    TestNode, keys_where, seed, send_directive, stored_keys, wait_for_len,
};

#[tokio::test]
async fn test_migrate_contiguous_range() {
    let source = TestNode::start().await;
    let dest = TestNode::start().await;
    let hashes = seed(&source, 300).await;

    let (left, right) = (0, u32::MAX / 3);
    let expected = keys_where(&hashes, |h| h >= left && h < right);
    assert!(!expected.is_empty());

    let directive = MigrationDirective::new(dest.host(), KeyRange::new(left, right));
    let reply = send_directive(&source, &directive.encode()).await;
    assert_eq!(reply.as_deref(), Some(ACK));

    wait_for_len(&dest, expected.len() as u64).await;
    assert_eq!(stored_keys(dest.store()).await, expected);

    // Values arrive intact and the source keeps its copy.
    let client = dest.client();
    for key in &expected {
        let i: usize = key.trim_start_matches("key-").parse().unwrap();
        assert_eq!(
            client.get(key.as_bytes()).await.unwrap().as_deref(),
            Some(format!("value-{i}").as_bytes())
        );
    }
    assert_eq!(source.len().await, 300);

    source.stop().await;
    dest.stop().await;
}

#[tokio::test]
async fn test_migrate_wrapping_range() {
    let source = TestNode::start().await;
    let dest = TestNode::start().await;
    let hashes = seed(&source, 300).await;

    let (left, right) = (3 << 30, 1 << 30);
    let expected = keys_where(&hashes, |h| h >= left || h < right);
    assert!(!expected.is_empty() && expected.len() < 300);

    let directive = MigrationDirective::new(dest.host(), KeyRange::new(left, right));
    assert_eq!(
        send_directive(&source, &directive.encode()).await.as_deref(),
        Some(ACK)
    );

    wait_for_len(&dest, expected.len() as u64).await;
    assert_eq!(stored_keys(dest.store()).await, expected);

    source.stop().await;
    dest.stop().await;
}

#[tokio::test]
async fn test_migrate_from_fjall_node() {
    let source = TestNode::start_fjall().await;
    let dest = TestNode::start_fjall().await;
    let hashes = seed(&source, 120).await;

    let everything = keys_where(&hashes, |h| h < u32::MAX);
    let directive = MigrationDirective::new(dest.host(), KeyRange::new(0, u32::MAX));
    assert_eq!(
        send_directive(&source, &directive.encode()).await.as_deref(),
        Some(ACK)
    );

    wait_for_len(&dest, everything.len() as u64).await;
    assert_eq!(stored_keys(dest.store()).await, everything);

    source.stop().await;
    dest.stop().await;
}

#[tokio::test]
async fn test_disjoint_ranges_partition_the_keyspace() {
    let source = TestNode::start().await;
    let low = TestNode::start().await;
    let high = TestNode::start().await;
    let hashes = seed(&source, 200).await;

    let split = 1 << 31;
    for (dest, range) in [
        (&low, KeyRange::new(0, split)),
        (&high, KeyRange::new(split, 0)),
    ] {
        let directive = MigrationDirective::new(dest.host(), range);
        assert_eq!(
            send_directive(&source, &directive.encode()).await.as_deref(),
            Some(ACK)
        );
    }

    let expected_low = keys_where(&hashes, |h| h < split);
    let expected_high = keys_where(&hashes, |h| h >= split);
    wait_for_len(&low, expected_low.len() as u64).await;
    wait_for_len(&high, expected_high.len() as u64).await;
    assert_eq!(stored_keys(low.store()).await, expected_low);
    assert_eq!(stored_keys(high.store()).await, expected_high);

    source.stop().await;
    low.stop().await;
    high.stop().await;
}

#[tokio::test]
async fn test_unreachable_destination_leaves_source_intact() {
    let source = TestNode::start().await;
    seed(&source, 50).await;

    // Nothing listens on the discard port of loopback.
    let directive = MigrationDirective::new("127.0.0.1:9", KeyRange::new(0, u32::MAX));
    assert_eq!(
        send_directive(&source, &directive.encode()).await.as_deref(),
        Some(ACK)
    );

    // The node keeps serving while the migration fails in the background.
    let client = source.client();
    assert!(client.set(b"later", b"ok", false).await.unwrap());
    assert_eq!(source.len().await, 51);

    source.stop().await;
}
