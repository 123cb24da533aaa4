//! Client façade: the entry point of the library.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use atoma_store::CoordinationStore;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::AtomaConfig;
use crate::config::ConfigError;
use crate::contention::ContentionQueue;
use crate::error::AtomaError;
use crate::error::Result;
use crate::lease::Lease;
use crate::lease::LeaseManager;
use crate::lease::LeaseState;

/// Client bound to one coordination store.
///
/// Grants leases and owns their background renewal. Call [`close`](Self::close)
/// to release everything held through this client. Dropping a client without
/// closing it stops renewal only: its holds stay in the store until their
/// leases expire, exactly as if the process had crashed.
pub struct AtomaClient {
    client_id: String,
    config: Arc<AtomaConfig>,
    manager: LeaseManager,
    leases: Mutex<Vec<Lease>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for AtomaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomaClient")
            .field("client_id", &self.client_id)
            .field("leases", &self.leases.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AtomaClient {
    /// Create a client with the default configuration.
    pub fn new<S: CoordinationStore>(store: Arc<S>) -> Self {
        Self::build(store, AtomaConfig::default())
    }

    /// Create a client with a custom configuration.
    pub fn with_config<S: CoordinationStore>(store: Arc<S>, config: AtomaConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(store, config))
    }

    fn build<S: CoordinationStore>(store: Arc<S>, config: AtomaConfig) -> Self {
        let client_id = Uuid::new_v4().to_string();
        let config = Arc::new(config);
        let queue = ContentionQueue::new(store, config.clone());
        info!(client_id = %client_id, "coordination client created");

        Self {
            manager: LeaseManager::new(client_id.clone(), queue),
            client_id,
            config,
            leases: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Unique identifier of this client, recorded as the owner of its leases.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Effective configuration.
    pub fn config(&self) -> &AtomaConfig {
        &self.config
    }

    /// Lease manager backing this client.
    pub fn lease_manager(&self) -> &LeaseManager {
        &self.manager
    }

    /// Grant a lease renewed in the background until closed or lost.
    pub async fn grant_lease(&self, ttl: Duration) -> Result<Lease> {
        if self.is_closed() {
            return Err(AtomaError::HandleClosed {
                what: format!("client '{}'", self.client_id),
            });
        }

        let lease = self.manager.grant(ttl).await?;
        let mut leases = self.leases.lock();
        leases.retain(|l| l.state() == LeaseState::Active);
        leases.push(lease.clone());
        Ok(lease)
    }

    /// Grant a lease with the configured default TTL.
    pub async fn grant_default_lease(&self) -> Result<Lease> {
        self.grant_lease(self.config.default_lease_ttl()).await
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every lease granted here and stop the renewal scheduler. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let leases = std::mem::take(&mut *self.leases.lock());
        let count = leases.len();
        for lease in leases {
            lease.close().await;
        }
        self.manager.shutdown().await;

        info!(client_id = %self.client_id, leases = count, "coordination client closed");
    }
}
