use std::sync::Arc;
use log::info;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use crate::choke::handler;
use crate::choke::models::ChokeState;
use crate::core_models::events::{ChokeDecision, SessionCommand};
use crate::dependency_provider::SwarmDeps;

/// Starts the preferred-neighbor and optimistic-unchoke timers.
pub fn spawn(deps: Arc<dyn SwarmDeps>) -> Vec<JoinHandle<()>> {
    let choke_state = Arc::new(Mutex::new(ChokeState::new()));
    return vec![
        tokio::spawn(preferred_neighbors_scheduler(deps.clone(), choke_state.clone())),
        tokio::spawn(optimistic_unchoke_scheduler(deps, choke_state)),
    ];
}

async fn preferred_neighbors_scheduler(deps: Arc<dyn SwarmDeps>, choke_state: Arc<Mutex<ChokeState>>) {
    let config = deps.config();
    let registry = deps.registry();
    let block_store = deps.block_store();
    let mut interval = time::interval(config.unchoking_interval);
    loop {
        interval.tick().await;
        let local_complete = block_store.is_complete().await;
        let decisions = {
            let mut choke_state = choke_state.lock().await;
            let previous = choke_state.preferred.clone();
            let decisions = registry.update(|peers| {
                handler::select_preferred(peers, &mut choke_state, config.preferred_neighbors, local_complete)
            }).await;
            if choke_state.preferred != previous {
                info!("Peer {} has the preferred neighbors {:?}", config.host_id, handler::sorted(&choke_state.preferred));
            }
            decisions
        };
        deliver(&deps, decisions).await;

        let obtained = block_store.drain_obtained_blocks().await;
        registry.broadcast_have(&obtained).await;
    }
}

async fn optimistic_unchoke_scheduler(deps: Arc<dyn SwarmDeps>, choke_state: Arc<Mutex<ChokeState>>) {
    let config = deps.config();
    let registry = deps.registry();
    let mut interval = time::interval(config.optimistic_unchoking_interval);
    loop {
        interval.tick().await;
        let decisions = {
            let mut choke_state = choke_state.lock().await;
            let previous = choke_state.optimistic;
            let decisions = registry.update(|peers| handler::optimistic_unchoke(peers, &mut choke_state)).await;
            if let Some(optimistic) = choke_state.optimistic.filter(|optimistic| previous != Some(*optimistic)) {
                info!("Peer {} has the optimistically unchoked neighbor {}", config.host_id, optimistic);
            }
            decisions
        };
        deliver(&deps, decisions).await;
    }
}

async fn deliver(deps: &Arc<dyn SwarmDeps>, decisions: Vec<ChokeDecision>) {
    let registry = deps.registry();
    for decision in decisions {
        registry.send_to_acceptor(decision.peer(), SessionCommand::Deliver(decision.message())).await;
    }
}
