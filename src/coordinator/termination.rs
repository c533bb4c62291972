use std::sync::Arc;
use chrono::Utc;
use log::{debug, info};
use tokio::sync::watch;
use crate::dependency_provider::SwarmDeps;

/// Process-wide, one-shot stop flag observed by every task.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        return ShutdownSignal { tx: Arc::new(tx) };
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        return *self.tx.borrow();
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        return self.tx.subscribe();
    }

    /// Resolves once the signal has been triggered, immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        return ShutdownSignal::new();
    }
}

/// Triggers shutdown once the whole swarm holds the file.
///
/// The host must own every block, every neighbor must be known to be complete,
/// and no initiator session may still be waiting for its completion to be acknowledged.
pub async fn check(deps: &Arc<dyn SwarmDeps>) {
    let shutdown = deps.shutdown();
    if shutdown.is_triggered() {
        return;
    }
    if !deps.block_store().is_complete().await {
        return;
    }
    let registry = deps.registry();
    if !registry.all_neighbors_complete().await {
        return;
    }
    let open_initiators = registry.open_initiators().await;
    if open_initiators > 0 {
        debug!("Swarm complete, waiting for {} initiator sessions to close", open_initiators);
        return;
    }

    info!("Peer {} :: every peer has the complete file, shutting down at {}", deps.config().host_id, Utc::now());
    shutdown.trigger();
}
