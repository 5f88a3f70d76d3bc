//! Admission policy in front of connection task spawn
//!
//! The default admits every connection. A connection limit holds the accept
//! loop until a running connection finishes.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Held by a connection task for its lifetime
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionPermit {
    /// Permit that tracks nothing
    pub fn unbounded() -> Self {
        Self { _permit: None }
    }
}

/// Decides when an accepted connection may start
#[async_trait]
pub trait AdmissionPolicy: Send + Sync {
    /// Wait until the connection may be spawned
    async fn admit(&self) -> AdmissionPermit;
}

/// Admit every connection immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

#[async_trait]
impl AdmissionPolicy for Unbounded {
    async fn admit(&self) -> AdmissionPermit {
        AdmissionPermit::unbounded()
    }
}

/// At most `max` connections run at once
#[derive(Debug, Clone)]
pub struct ConnectionLimit {
    semaphore: Arc<Semaphore>,
}

impl ConnectionLimit {
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
        }
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl AdmissionPolicy for ConnectionLimit {
    async fn admit(&self) -> AdmissionPermit {
        match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => AdmissionPermit {
                _permit: Some(permit),
            },
            // Only reachable if the semaphore is closed, which this type never does
            Err(_) => AdmissionPermit::unbounded(),
        }
    }
}

/// Policy for `max_connections` (0 = unbounded)
pub fn admission_policy(max_connections: usize) -> Arc<dyn AdmissionPolicy> {
    if max_connections == 0 {
        Arc::new(Unbounded)
    } else {
        Arc::new(ConnectionLimit::new(max_connections))
    }
}
