//! Integration tests for the spool-directory queue

use channel_stats_harvester::queue::{FileQueue, QueueError, WorkQueue};
use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;

const HOUR: Duration = Duration::from_secs(3600);

/// An unacknowledged message comes back once its visibility timeout expired
#[tokio::test]
async fn test_unacked_message_is_redelivered() {
    let dir = TempDir::new().unwrap();
    let queue = FileQueue::open(dir.path(), "work", Duration::ZERO)
        .await
        .unwrap();
    let id = queue.send(r#"[{"channel_id":"UC1"}]"#).await.unwrap();

    let first = queue.receive().await.unwrap().unwrap();
    assert_eq!(first.message_id, id);

    // Worker died before acking: the next receive sees the message again.
    // Receipts carry the claim millisecond, so step past it.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = queue.receive().await.unwrap().unwrap();
    assert_eq!(second.message_id, id);
    assert_eq!(second.body, first.body);

    // The stale receipt no longer refers to a claimed message
    assert!(matches!(
        queue.ack(&first.receipt).await,
        Err(QueueError::UnknownReceipt(_))
    ));
    queue.ack(&second.receipt).await.unwrap();
    assert!(queue.receive().await.unwrap().is_none());
}

/// Purge drops both waiting and claimed messages
#[tokio::test]
async fn test_purge_clears_ready_and_in_flight() {
    let dir = TempDir::new().unwrap();
    let queue = FileQueue::open(dir.path(), "work", HOUR).await.unwrap();
    for i in 0..3 {
        queue.send(&format!("message-{i}")).await.unwrap();
    }
    queue.receive().await.unwrap().unwrap();
    assert_eq!(queue.pending().await.unwrap(), 2);
    assert_eq!(queue.in_flight().await.unwrap(), 1);

    assert_eq!(queue.purge().await.unwrap(), 3);
    assert_eq!(queue.pending().await.unwrap(), 0);
    assert_eq!(queue.in_flight().await.unwrap(), 0);
}

/// Two handles on the same spool never claim the same message
#[tokio::test]
async fn test_competing_consumers_claim_disjoint_messages() {
    let dir = TempDir::new().unwrap();
    let producer = FileQueue::open(dir.path(), "work", HOUR).await.unwrap();
    for i in 0..20 {
        producer.send(&format!("batch-{i}")).await.unwrap();
    }

    let a = FileQueue::open(dir.path(), "work", HOUR).await.unwrap();
    let b = FileQueue::open(dir.path(), "work", HOUR).await.unwrap();

    let drain = |queue: FileQueue| async move {
        let mut bodies = Vec::new();
        while let Some(delivery) = queue.receive().await.unwrap() {
            bodies.push(delivery.body);
            queue.ack(&delivery.receipt).await.unwrap();
        }
        bodies
    };
    let (from_a, from_b) = tokio::join!(
        tokio::spawn(drain(a)),
        tokio::spawn(drain(b))
    );
    let from_a = from_a.unwrap();
    let from_b = from_b.unwrap();

    let mut seen = HashSet::new();
    for body in from_a.iter().chain(from_b.iter()) {
        assert!(seen.insert(body.clone()), "{body} delivered twice");
    }
    assert_eq!(seen.len(), 20);
    assert_eq!(producer.pending().await.unwrap(), 0);
}

/// Released messages are immediately visible again
#[tokio::test]
async fn test_release_returns_message() {
    let dir = TempDir::new().unwrap();
    let queue = FileQueue::open(dir.path(), "creds", HOUR).await.unwrap();
    queue.send("payload").await.unwrap();

    let delivery = queue.receive().await.unwrap().unwrap();
    assert!(queue.receive().await.unwrap().is_none());
    queue.release(&delivery.receipt).await.unwrap();

    let again = queue.receive().await.unwrap().unwrap();
    assert_eq!(again.message_id, delivery.message_id);
}

#[tokio::test]
async fn test_rejects_unsafe_queue_names() {
    let dir = TempDir::new().unwrap();
    for name in ["", "../escape", ".hidden", "a/b"] {
        assert!(matches!(
            FileQueue::open(dir.path(), name, HOUR).await,
            Err(QueueError::InvalidName(_))
        ));
    }
}

/// Workers sharing a spool all read the credential set, even while one of
/// them holds a claim on it
#[tokio::test]
async fn test_parallel_workers_read_credentials() {
    use channel_stats_harvester::credentials::Credential;
    use channel_stats_harvester::queue::encode_credentials;
    use channel_stats_harvester::worker::receive_credentials;

    let dir = TempDir::new().unwrap();
    let queue = FileQueue::open(dir.path(), "creds", HOUR).await.unwrap();
    let creds = vec![
        Credential::new("k1", "a@example.com", "p1"),
        Credential::new("k2", "b@example.com", "p2"),
    ];
    queue.send(&encode_credentials(&creds).unwrap()).await.unwrap();

    let held = queue.receive().await.unwrap().unwrap();
    assert_eq!(receive_credentials(&queue).await.unwrap(), creds);

    queue.release(&held.receipt).await.unwrap();
    let readers = (0..4).map(|_| {
        let queue = queue.clone();
        tokio::spawn(async move { receive_credentials(&queue).await })
    });
    for reader in readers.collect::<Vec<_>>() {
        assert_eq!(reader.await.unwrap().unwrap(), creds);
    }
    assert_eq!(queue.pending().await.unwrap(), 1);
    assert_eq!(queue.in_flight().await.unwrap(), 0);
}
