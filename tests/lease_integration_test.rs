//! Lease lifecycle: renewal, expiry, close, and store outages.

mod common;

use std::time::Duration;
use std::time::Instant;

use atoma::AtomaClient;
use atoma::AtomaConfig;
use atoma::AtomaError;
use atoma::CoordinationStore;
use atoma::InMemoryCoordinationStore;
use atoma::LeaseState;
use atoma::pure::lease::lease_key;
use common::client;
use common::client_with_lease;
use common::fast_config;
use common::init_tracing;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crashed_holder_is_released_after_ttl() {
    init_tracing();
    let store = InMemoryCoordinationStore::new();

    let crashed = client(&store);
    let lease = crashed.grant_lease(Duration::from_millis(500)).await.unwrap();
    let write = lease.read_write_lock("jobs").unwrap().write_lock();
    write.lock().await.unwrap();
    // No close: renewal stops, the hold stays behind
    drop(write);
    drop(lease);
    drop(crashed);

    let (survivor, survivor_lease) = client_with_lease(&store).await;
    let write = survivor_lease.read_write_lock("jobs").unwrap().write_lock();
    assert!(!write.try_lock().await.unwrap());

    let started = Instant::now();
    write.lock_timeout(Duration::from_secs(5)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    write.unlock().await.unwrap();
    survivor.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_renewal_keeps_hold_past_ttl() {
    let store = InMemoryCoordinationStore::new();
    let holder = client(&store);
    let lease = holder.grant_lease(Duration::from_millis(600)).await.unwrap();
    let write = lease.read_write_lock("jobs").unwrap().write_lock();
    write.lock().await.unwrap();
    let first_deadline = lease.deadline_ms();

    let (other, other_lease) = client_with_lease(&store).await;
    let contender = other_lease.read_write_lock("jobs").unwrap().write_lock();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(lease.state(), LeaseState::Active);
    assert!(lease.deadline_ms() > first_deadline);
    assert!(!contender.try_lock().await.unwrap());

    write.unlock().await.unwrap();
    assert!(contender.try_lock().await.unwrap());

    holder.close().await;
    other.close().await;
}

#[tokio::test]
async fn test_lease_close_releases_holds() {
    let store = InMemoryCoordinationStore::new();
    let (c1, lease) = client_with_lease(&store).await;
    let (c2, other_lease) = client_with_lease(&store).await;

    let rwlock = lease.read_write_lock("res").unwrap();
    rwlock.write_lock().lock().await.unwrap();
    rwlock.read_lock().lock().await.unwrap();

    let mut state = lease.subscribe();
    lease.close().await;

    assert_eq!(*state.borrow_and_update(), LeaseState::Closed);
    assert!(store.read_record(&lease_key(lease.id())).await.unwrap().is_none());
    assert!(matches!(
        rwlock.write_lock().lock().await,
        Err(AtomaError::LeaseNotActive {
            state: LeaseState::Closed,
            ..
        })
    ));

    let write = other_lease.read_write_lock("res").unwrap().write_lock();
    assert!(write.try_lock().await.unwrap());

    c1.close().await;
    c2.close().await;
}

#[tokio::test]
async fn test_lost_lease_record_expires_lease() {
    let store = InMemoryCoordinationStore::new();
    let client = client(&store);
    let lease = client.grant_lease(Duration::from_millis(300)).await.unwrap();
    let mut state = lease.subscribe();

    store.delete(&lease_key(lease.id())).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == LeaseState::Expired))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(lease.read_write_lock("res"), Err(AtomaError::LeaseNotActive { .. })));
    client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrenewable_lease_expires_and_stays_expired() {
    let store = InMemoryCoordinationStore::new();
    let (other, other_lease) = client_with_lease(&store).await;
    let holder = client(&store);
    let lease = holder.grant_lease(Duration::from_millis(300)).await.unwrap();
    lease.read_write_lock("jobs").unwrap().write_lock().lock().await.unwrap();
    let mut state = lease.subscribe();

    store.set_unavailable(true);
    tokio::time::timeout(Duration::from_secs(3), state.wait_for(|s| *s == LeaseState::Expired))
        .await
        .unwrap()
        .unwrap();
    store.set_unavailable(false);

    // Renewal does not bring it back once the store recovers
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(lease.state(), LeaseState::Expired);
    assert!(matches!(lease.read_write_lock("jobs"), Err(AtomaError::LeaseNotActive { .. })));

    let write = other_lease.read_write_lock("jobs").unwrap().write_lock();
    write.lock_timeout(Duration::from_secs(5)).await.unwrap();
    write.unlock().await.unwrap();

    holder.close().await;
    other.close().await;
}

#[tokio::test]
async fn test_store_outage_surfaces_unavailable_then_recovers() {
    let store = InMemoryCoordinationStore::new();
    let config = AtomaConfig {
        max_consecutive_store_failures: 3,
        ..fast_config()
    };
    let client = AtomaClient::with_config(store.clone(), config).unwrap();
    let lease = client.grant_lease(common::LONG_TTL).await.unwrap();
    let write = lease.read_write_lock("res").unwrap().write_lock();

    store.set_unavailable(true);
    let err = write.lock_timeout(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, AtomaError::StoreUnavailable { attempts: 3, .. }));
    assert!(err.is_retryable());

    store.set_unavailable(false);
    write.lock_timeout(Duration::from_secs(5)).await.unwrap();
    write.unlock().await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let store = InMemoryCoordinationStore::new();
    let (client, lease) = client_with_lease(&store).await;
    let write = lease.read_write_lock("res").unwrap().write_lock();

    store.fail_next(2);
    write.lock_timeout(Duration::from_secs(5)).await.unwrap();
    write.unlock().await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn test_outage_past_deadline_reports_unavailable() {
    let store = InMemoryCoordinationStore::new();
    let (client, lease) = client_with_lease(&store).await;
    let write = lease.read_write_lock("res").unwrap().write_lock();

    store.set_unavailable(true);
    let err = write.lock_timeout(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, AtomaError::StoreUnavailable { .. }));

    store.set_unavailable(false);
    client.close().await;
}

#[tokio::test]
async fn test_ttl_below_minimum_rejected() {
    let store = InMemoryCoordinationStore::new();
    let client = client(&store);
    let err = client.grant_lease(Duration::from_millis(10)).await.unwrap_err();
    assert!(matches!(err, AtomaError::InvalidArgument { .. }));
    client.close().await;
}
