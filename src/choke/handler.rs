use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use rand::prelude::{IteratorRandom, SliceRandom};
use crate::choke::models::ChokeState;
use crate::core_models::entities::PeerId;
use crate::core_models::events::ChokeDecision;
use crate::peer_registry::PeerState;

/// Recomputes the preferred neighbors and returns the choke transitions it causes.
///
/// Candidates are ranked by download rate (ties by ascending id); once the host
/// holds the whole file rates are meaningless and the ranking is random.
pub fn select_preferred(peers: &mut HashMap<PeerId, PeerState>,
                        choke_state: &mut ChokeState,
                        preferred_count: usize,
                        local_complete: bool) -> Vec<ChokeDecision> {
    let mut candidates: Vec<&PeerState> = peers.values()
        .filter(|peer| peer.is_unchoke_candidate())
        .collect();
    if local_complete {
        candidates.shuffle(&mut rand::thread_rng());
    } else {
        candidates.sort_by_key(|peer| peer.id());
        candidates.sort_by(|a, b| b.download_rate.partial_cmp(&a.download_rate).unwrap_or(Ordering::Equal));
    }

    choke_state.preferred = candidates.iter()
        .take(preferred_count)
        .map(|peer| peer.id())
        .collect();

    return apply(peers, choke_state);
}

/// Picks a new optimistically unchoked neighbor uniformly among the candidates.
pub fn optimistic_unchoke(peers: &mut HashMap<PeerId, PeerState>, choke_state: &mut ChokeState) -> Vec<ChokeDecision> {
    choke_state.optimistic = peers.values()
        .filter(|peer| peer.is_unchoke_candidate())
        .map(|peer| peer.id())
        .choose(&mut rand::thread_rng());

    return apply(peers, choke_state);
}

// Brings every neighbor's serving state in line with the choke state; only transitions are reported
fn apply(peers: &mut HashMap<PeerId, PeerState>, choke_state: &ChokeState) -> Vec<ChokeDecision> {
    let mut decisions: Vec<ChokeDecision> = Vec::new();
    for peer in peers.values_mut() {
        let unchoke = choke_state.keeps_unchoked(peer.id()) && peer.serving;
        if unchoke && peer.choked_by_local {
            peer.choked_by_local = false;
            decisions.push(ChokeDecision::Unchoke(peer.id()));
        } else if !unchoke && !peer.choked_by_local {
            peer.choked_by_local = true;
            decisions.push(ChokeDecision::Choke(peer.id()));
        }
    }
    decisions.sort_by_key(|decision| decision.peer());
    return decisions;
}

pub fn sorted(ids: &HashSet<PeerId>) -> Vec<PeerId> {
    let mut ids: Vec<PeerId> = ids.iter().copied().collect();
    ids.sort();
    return ids;
}
