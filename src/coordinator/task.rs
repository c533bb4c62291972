use std::io;
use std::sync::Arc;
use chrono::Utc;
use log::info;
use thiserror::Error;
use tokio::task::JoinHandle;
use crate::choke;
use crate::coordinator::{listener, termination};
use crate::dependency_provider::SwarmDeps;
use crate::p2p::models::P2PError;
use crate::p2p::task;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("could not listen on port {port}: {source}")]
    Bind { port: u16, source: io::Error },
}

/// Runs the host peer until the whole swarm holds the file.
pub async fn run(deps: Arc<dyn SwarmDeps>) -> Result<(), SwarmError> {
    let config = deps.config();
    info!("Peer {} starting at {}", config.host_id, Utc::now());

    let listener = listener::bind(config).await
        .map_err(|source| SwarmError::Bind { port: config.listening_port(), source })?;
    let listener_handle = listener::spawn(listener, deps.clone());
    let choke_handles = choke::task::spawn(deps.clone());
    let initiator_handles = spawn_initiators(&deps).await;

    termination::check(&deps).await;
    deps.shutdown().wait().await;

    choke_handles.iter().for_each(|handle| handle.abort());
    let _ = listener_handle.await;
    for handle in initiator_handles {
        let _ = handle.await;
    }

    info!("Peer {} finished at {} with {} of {} pieces",
        config.host_id, Utc::now(), deps.block_store().owned_count().await, deps.block_store().layout().block_count);
    return Ok(());
}

// a host that starts with the file never downloads, so it dials nobody
async fn spawn_initiators(deps: &Arc<dyn SwarmDeps>) -> Vec<JoinHandle<Result<(), P2PError>>> {
    if deps.block_store().is_complete().await {
        return Vec::new();
    }
    return deps.config().neighbors()
        .map(|neighbor| task::spawn_initiator(neighbor.clone(), deps.clone()))
        .collect();
}
