//! Integration test: directive handling on the read path, over the wire.

use reef_node::ACK;
use reef_integration_tests::{TestNode, seed, send_directive};

#[tokio::test]
async fn test_malformed_directive_is_a_miss() {
    let node = TestNode::start().await;
    seed(&node, 10).await;

    for key in [
        &b"@#$"[..],
        b"@#$nonsense",
        b"@#$host-1",
        b"@#$host-one-2",
        b"@#$-1-2",
        b"@#$host-1-99999999999",
    ] {
        assert_eq!(
            send_directive(&node, key).await,
            None,
            "{}",
            String::from_utf8_lossy(key)
        );
    }

    // The connection and the node are still healthy.
    let client = node.client();
    assert_eq!(
        client.get(b"key-0003").await.unwrap().as_deref(),
        Some(&b"value-3"[..])
    );
    assert_eq!(node.len().await, 10);

    node.stop().await;
}

#[tokio::test]
async fn test_directive_never_returns_stored_value() {
    let node = TestNode::start().await;
    let key = b"@#$127.0.0.1:9-5-5";
    let client = node.client();
    assert!(client.set(key, b"shadowed", false).await.unwrap());

    assert_eq!(send_directive(&node, key).await.as_deref(), Some(ACK));

    node.stop().await;
}

#[tokio::test]
async fn test_ordinary_keys_unaffected() {
    let node = TestNode::start().await;
    let client = node.client();

    assert!(client.set(b"@#", b"short", false).await.unwrap());
    assert!(client.set(b"x@#$y-1-2", b"inner", false).await.unwrap());
    assert_eq!(
        client.get(b"@#").await.unwrap().as_deref(),
        Some(&b"short"[..])
    );
    assert_eq!(
        client.get(b"x@#$y-1-2").await.unwrap().as_deref(),
        Some(&b"inner"[..])
    );
    assert!(client.delete(b"@#").await.unwrap());
    assert_eq!(client.get(b"@#").await.unwrap(), None);

    node.stop().await;
}
