//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use atoma::AtomaClient;
use atoma::AtomaConfig;
use atoma::InMemoryCoordinationStore;
use atoma::Lease;

/// TTL long enough that no test lease expires by accident.
pub const LONG_TTL: Duration = Duration::from_secs(30);

/// Install a test-friendly subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("atoma_coordination=debug,atoma_store=info")
        .with_test_writer()
        .try_init();
}

/// Configuration with short backoffs so contended tests finish quickly.
pub fn fast_config() -> AtomaConfig {
    AtomaConfig {
        poll_initial_backoff_ms: 5,
        poll_max_backoff_ms: 50,
        store_retry_initial_backoff_ms: 5,
        store_retry_max_backoff_ms: 20,
        ..Default::default()
    }
}

/// A client on `store` with [`fast_config`].
pub fn client(store: &Arc<InMemoryCoordinationStore>) -> AtomaClient {
    AtomaClient::with_config(store.clone(), fast_config()).unwrap()
}

/// A client on `store` together with a long-lived lease.
pub async fn client_with_lease(store: &Arc<InMemoryCoordinationStore>) -> (AtomaClient, Lease) {
    let client = client(store);
    let lease = client.grant_lease(LONG_TTL).await.unwrap();
    (client, lease)
}
