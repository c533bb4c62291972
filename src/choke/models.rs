use std::collections::HashSet;
use crate::core_models::entities::PeerId;

/// What the scheduler decided in its previous rounds.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChokeState {
    pub preferred: HashSet<PeerId>,
    pub optimistic: Option<PeerId>,
}

impl ChokeState {
    pub fn new() -> Self {
        return ChokeState::default();
    }

    pub fn keeps_unchoked(&self, peer_id: PeerId) -> bool {
        return self.preferred.contains(&peer_id) || self.optimistic == Some(peer_id);
    }
}
