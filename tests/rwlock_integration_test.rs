//! Read-write lock behavior across independent clients sharing one store.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use atoma::AtomaError;
use atoma::CancellationToken;
use atoma::CoordinationStore;
use atoma::InMemoryCoordinationStore;
use atoma::LockMode;
use atoma::ResourceRecord;
use atoma::pure::rwlock::rwlock_key;
use common::client_with_lease;
use common::init_tracing;
use tokio::sync::Barrier;
use tokio::task::JoinSet;

async fn read_resource(store: &InMemoryCoordinationStore, resource: &str) -> ResourceRecord {
    let raw = store.read_record(&rwlock_key(resource)).await.unwrap().unwrap();
    serde_json::from_str(&raw.value).unwrap()
}

async fn wait_for_pending(store: &InMemoryCoordinationStore, resource: &str, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while read_resource(store, resource).await.pending.len() != expected {
        assert!(Instant::now() < deadline, "pending queue never reached {expected} entries");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writers_are_mutually_exclusive() {
    init_tracing();
    let store = InMemoryCoordinationStore::new();
    let inside = Arc::new(AtomicU32::new(0));
    let entered = Arc::new(AtomicU32::new(0));
    let mut tasks = JoinSet::new();

    for _ in 0..4 {
        let (client, lease) = client_with_lease(&store).await;
        let inside = inside.clone();
        let entered = entered.clone();
        tasks.spawn(async move {
            let write = lease.read_write_lock("counter").unwrap().write_lock();
            for _ in 0..5 {
                write.lock().await.unwrap();
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two writers inside");
                entered.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                write.unlock().await.unwrap();
            }
            client.close().await;
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
    assert_eq!(entered.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn test_readers_share_and_block_writer() {
    let store = InMemoryCoordinationStore::new();
    let mut clients = Vec::new();
    let mut readers = Vec::new();

    for _ in 0..3 {
        let (client, lease) = client_with_lease(&store).await;
        let read = lease.read_write_lock("doc").unwrap().read_lock();
        assert!(read.try_lock().await.unwrap());
        readers.push(read);
        clients.push(client);
    }

    let (writer_client, writer_lease) = client_with_lease(&store).await;
    let write = writer_lease.read_write_lock("doc").unwrap().write_lock();
    assert!(!write.try_lock().await.unwrap());

    for read in &readers {
        read.unlock().await.unwrap();
    }
    assert!(write.try_lock().await.unwrap());

    writer_client.close().await;
    for client in clients {
        client.close().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiting_writer_blocks_new_readers() {
    let store = InMemoryCoordinationStore::new();
    let (c1, first_reader_lease) = client_with_lease(&store).await;
    let (c2, writer_lease) = client_with_lease(&store).await;
    let (c3, late_reader_lease) = client_with_lease(&store).await;

    let first_read = first_reader_lease.read_write_lock("doc").unwrap().read_lock();
    first_read.lock().await.unwrap();

    let write = writer_lease.read_write_lock("doc").unwrap().write_lock();
    let writer = tokio::spawn(async move {
        write.lock_timeout(Duration::from_secs(10)).await.unwrap();
        write.unlock().await.unwrap();
    });

    // Wait for the writer's queue entry
    let deadline = Instant::now() + Duration::from_secs(5);
    while read_resource(&store, "doc").await.pending.is_empty() {
        assert!(Instant::now() < deadline, "writer never enqueued");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let late_read = late_reader_lease.read_write_lock("doc").unwrap().read_lock();
    assert!(!late_read.try_lock().await.unwrap(), "reader overtook a waiting writer");

    first_read.unlock().await.unwrap();
    writer.await.unwrap();

    late_read.lock_timeout(Duration::from_secs(5)).await.unwrap();
    late_read.unlock().await.unwrap();

    for client in [c1, c2, c3] {
        client.close().await;
    }
}

#[tokio::test]
async fn test_reentrancy_requires_matching_unlocks() {
    let store = InMemoryCoordinationStore::new();
    let (client, lease) = client_with_lease(&store).await;
    let (other_client, other_lease) = client_with_lease(&store).await;

    let write = lease.read_write_lock("res").unwrap().write_lock();
    for _ in 0..3 {
        write.lock().await.unwrap();
    }
    assert_eq!(write.hold_count(), 3);

    let other = other_lease.read_write_lock("res").unwrap().write_lock();
    for _ in 0..3 {
        assert!(!other.try_lock().await.unwrap());
        write.unlock().await.unwrap();
    }
    assert!(other.try_lock().await.unwrap());

    let err = write.unlock().await.unwrap_err();
    assert!(matches!(err, AtomaError::IllegalMonitorState { mode: LockMode::Write, .. }));
    assert!(err.to_string().contains("does not hold the lock"));

    client.close().await;
    other_client.close().await;
}

#[tokio::test]
async fn test_writer_may_also_read() {
    let store = InMemoryCoordinationStore::new();
    let (client, lease) = client_with_lease(&store).await;
    let rwlock = lease.read_write_lock("res").unwrap();
    let (write, read) = (rwlock.write_lock(), rwlock.read_lock());

    write.lock().await.unwrap();
    assert!(read.try_lock().await.unwrap());
    write.unlock().await.unwrap();
    read.unlock().await.unwrap();

    let record = read_resource(&store, "res").await;
    assert!(record.holders.is_empty());
    client.close().await;
}

#[tokio::test]
async fn test_unlock_from_other_task_is_rejected() {
    let store = InMemoryCoordinationStore::new();
    let (client, lease) = client_with_lease(&store).await;
    let rwlock = lease.read_write_lock("res").unwrap();

    rwlock.write_lock().lock().await.unwrap();

    let shared = rwlock.clone();
    let err = tokio::spawn(async move { shared.write_lock().unlock().await })
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, AtomaError::IllegalMonitorState { .. }));

    rwlock.write_lock().unlock().await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn test_unlock_without_lock_fails() {
    let store = InMemoryCoordinationStore::new();
    let (client, lease) = client_with_lease(&store).await;
    let read = lease.read_write_lock("res").unwrap().read_lock();

    let err = read.unlock().await.unwrap_err();
    assert!(matches!(err, AtomaError::IllegalMonitorState { mode: LockMode::Read, .. }));
    client.close().await;
}

#[tokio::test]
async fn test_zero_timeout_fails_fast_without_enqueueing() {
    let store = InMemoryCoordinationStore::new();
    let (c1, holder_lease) = client_with_lease(&store).await;
    let (c2, waiter_lease) = client_with_lease(&store).await;

    holder_lease.read_write_lock("res").unwrap().write_lock().lock().await.unwrap();

    let started = Instant::now();
    let err = waiter_lease
        .read_write_lock("res")
        .unwrap()
        .write_lock()
        .lock_timeout(Duration::ZERO)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(read_resource(&store, "res").await.pending.is_empty());

    c1.close().await;
    c2.close().await;
}

#[tokio::test]
async fn test_bounded_wait_honors_timeout() {
    let store = InMemoryCoordinationStore::new();
    let (c1, holder_lease) = client_with_lease(&store).await;
    let (c2, waiter_lease) = client_with_lease(&store).await;

    holder_lease.read_write_lock("res").unwrap().read_lock().lock().await.unwrap();
    let write = waiter_lease.read_write_lock("res").unwrap().write_lock();

    let started = Instant::now();
    let err = write.lock_timeout(Duration::from_millis(300)).await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, AtomaError::Timeout { .. }));
    assert!(waited >= Duration::from_millis(300));
    assert!(waited < Duration::from_secs(2));
    assert!(read_resource(&store, "res").await.pending.is_empty());

    // Uncontended bounded acquisition returns promptly
    let free = waiter_lease.read_write_lock("other").unwrap().write_lock();
    let started = Instant::now();
    free.lock_timeout(Duration::from_secs(5)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    c1.close().await;
    c2.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_wait_withdraws_queue_entry() {
    let store = InMemoryCoordinationStore::new();
    let (c1, holder_lease) = client_with_lease(&store).await;
    let (c2, waiter_lease) = client_with_lease(&store).await;

    holder_lease.read_write_lock("res").unwrap().write_lock().lock().await.unwrap();

    let cancel = CancellationToken::new();
    let write = waiter_lease.read_write_lock("res").unwrap().write_lock();
    let token = cancel.clone();
    let waiter = tokio::spawn(async move { write.lock_interruptibly(&token).await });

    let deadline = Instant::now() + Duration::from_secs(5);
    while read_resource(&store, "res").await.pending.is_empty() {
        assert!(Instant::now() < deadline, "waiter never enqueued");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    cancel.cancel();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, AtomaError::Cancelled { .. }));
    assert!(read_resource(&store, "res").await.pending.is_empty());

    c1.close().await;
    c2.close().await;
}

#[tokio::test]
async fn test_closed_handle_rejects_operations() {
    let store = InMemoryCoordinationStore::new();
    let (client, lease) = client_with_lease(&store).await;
    let write = lease.read_write_lock("res").unwrap().write_lock();

    assert!(!write.is_closed());
    write.close();
    assert!(write.is_closed());
    assert!(matches!(write.lock().await, Err(AtomaError::HandleClosed { .. })));
    client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_acquisition_withdraws_queue_entry() {
    let store = InMemoryCoordinationStore::new();
    let (c1, holder_lease) = client_with_lease(&store).await;
    let (c2, waiter_lease) = client_with_lease(&store).await;

    holder_lease.read_write_lock("res").unwrap().write_lock().lock().await.unwrap();
    let write = waiter_lease.read_write_lock("res").unwrap().write_lock();

    // The lock future is dropped as soon as its entry shows up
    tokio::select! {
        result = write.lock() => panic!("granted while held: {result:?}"),
        _ = wait_for_pending(&store, "res", 1) => {}
    }
    wait_for_pending(&store, "res", 0).await;

    let timed_out = tokio::time::timeout(Duration::from_millis(100), write.lock()).await;
    assert!(timed_out.is_err());
    wait_for_pending(&store, "res", 0).await;
    assert_eq!(write.hold_count(), 0);

    c1.close().await;
    c2.close().await;
}

#[tokio::test]
async fn test_lost_grant_acknowledgement_counts_once() {
    let store = InMemoryCoordinationStore::new();
    let (c1, lease) = client_with_lease(&store).await;
    let (c2, other_lease) = client_with_lease(&store).await;
    let write = lease.read_write_lock("res").unwrap().write_lock();

    store.lose_next_acks(1);
    write.lock_timeout(Duration::from_secs(2)).await.unwrap();
    assert_eq!(write.hold_count(), 1);
    assert_eq!(read_resource(&store, "res").await.holders[0].count, 1);

    write.unlock().await.unwrap();
    assert!(read_resource(&store, "res").await.holders.is_empty());

    let other = other_lease.read_write_lock("res").unwrap().write_lock();
    assert!(other.try_lock().await.unwrap());

    c1.close().await;
    c2.close().await;
}

#[tokio::test]
async fn test_abandoned_acquisition_rolls_back_applied_grant() {
    let store = InMemoryCoordinationStore::new();
    let (c1, lease) = client_with_lease(&store).await;
    let (c2, other_lease) = client_with_lease(&store).await;
    let read = lease.read_write_lock("res").unwrap().read_lock();

    // The grant lands, its reply is lost and no time is left to retry
    store.lose_next_acks(1);
    let err = read.lock_timeout(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, AtomaError::StoreUnavailable { .. }));
    assert_eq!(read.hold_count(), 0);
    assert!(read_resource(&store, "res").await.holders.is_empty());

    let write = other_lease.read_write_lock("res").unwrap().write_lock();
    assert!(write.try_lock().await.unwrap());

    c1.close().await;
    c2.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_opposite_lock_order_recovers_with_timeouts() {
    let store = InMemoryCoordinationStore::new();
    let (c1, first_lease) = client_with_lease(&store).await;
    let (c2, second_lease) = client_with_lease(&store).await;
    let all_hold = Arc::new(Barrier::new(2));
    let all_gave_up = Arc::new(Barrier::new(2));

    let mut tasks = JoinSet::new();
    for (lease, own, other) in [(first_lease, "a", "b"), (second_lease, "b", "a")] {
        let (all_hold, all_gave_up) = (all_hold.clone(), all_gave_up.clone());
        tasks.spawn(async move {
            let own = lease.read_write_lock(own).unwrap().write_lock();
            let other = lease.read_write_lock(other).unwrap().write_lock();

            own.lock().await.unwrap();
            all_hold.wait().await;
            let err = other.lock_timeout(Duration::from_millis(300)).await.unwrap_err();
            assert!(err.is_timeout());
            all_gave_up.wait().await;

            own.unlock().await.unwrap();
            other.lock_timeout(Duration::from_secs(5)).await.unwrap();
            other.unlock().await.unwrap();
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
    for resource in ["a", "b"] {
        let record = read_resource(&store, resource).await;
        assert!(record.holders.is_empty() && record.pending.is_empty());
    }

    c1.close().await;
    c2.close().await;
}
