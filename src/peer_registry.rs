use std::collections::HashMap;
use std::time::Duration;
use log::{debug, info};
use tokio::sync::Mutex;
use tokio::sync::mpsc::Sender;
use crate::core_models::entities::{BlockIndex, PeerId, PeerIdentity};
use crate::core_models::events::{have_commands, SessionCommand};

// Weight of the newest sample in the download rate estimate
const RATE_SMOOTHING: f64 = 0.5;

/// Transfer state the host keeps for one neighbor.
///
/// `choked_by_local` is the host's serving decision and belongs to the choking
/// scheduler; `local_is_choked_by_remote` is the host's permission to download
/// from the neighbor and belongs to the initiator session.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerState {
    pub identity: PeerIdentity,
    pub interested: bool,
    pub choked_by_local: bool,
    pub local_is_choked_by_remote: bool,
    pub local_interested: bool,
    pub is_complete: bool,
    pub download_rate: f64,
    pub serving: bool,
}

impl PeerState {
    pub fn new(identity: PeerIdentity) -> Self {
        let is_complete = identity.has_file_at_start;
        return PeerState {
            identity,
            interested: false,
            choked_by_local: true,
            local_is_choked_by_remote: true,
            local_interested: false,
            is_complete,
            download_rate: 0.0,
            serving: false,
        };
    }

    pub fn id(&self) -> PeerId {
        return self.identity.id;
    }

    /// Whether the choking scheduler may pick this neighbor at all.
    pub fn is_unchoke_candidate(&self) -> bool {
        return self.interested && !self.is_complete && self.serving;
    }
}

#[derive(Default)]
struct ConnectionHandles {
    acceptor: Option<Sender<SessionCommand>>,
    initiator: Option<Sender<SessionCommand>>,
}

pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, PeerState>>,
    connections: Mutex<HashMap<PeerId, ConnectionHandles>>,
}

impl PeerRegistry {
    pub fn new<'a>(neighbors: impl Iterator<Item = &'a PeerIdentity>) -> Self {
        let peers: HashMap<PeerId, PeerState> = neighbors
            .map(|identity| (identity.id, PeerState::new(identity.clone())))
            .collect();
        return PeerRegistry {
            peers: Mutex::new(peers),
            connections: Mutex::new(HashMap::new()),
        };
    }

    /// Runs `f` over every neighbor's state while holding the registry lock.
    pub async fn update<R>(&self, f: impl FnOnce(&mut HashMap<PeerId, PeerState>) -> R) -> R {
        let mut peers = self.peers.lock().await;
        return f(&mut peers);
    }

    pub async fn get(&self, peer_id: PeerId) -> Option<PeerState> {
        return self.peers.lock().await.get(&peer_id).cloned();
    }

    pub async fn set_interested(&self, peer_id: PeerId, interested: bool) {
        self.modify(peer_id, |peer| peer.interested = interested).await;
    }

    pub async fn set_local_choked(&self, peer_id: PeerId, choked: bool) {
        self.modify(peer_id, |peer| peer.local_is_choked_by_remote = choked).await;
    }

    pub async fn set_local_interested(&self, peer_id: PeerId, interested: bool) {
        self.modify(peer_id, |peer| peer.local_interested = interested).await;
    }

    pub async fn is_choked_by_local(&self, peer_id: PeerId) -> bool {
        return self.peers.lock().await.get(&peer_id).map_or(true, |peer| peer.choked_by_local);
    }

    pub async fn record_download(&self, peer_id: PeerId, bytes: usize, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64().max(1e-6);
        let sample = bytes as f64 / seconds;
        self.modify(peer_id, |peer| {
            peer.download_rate = if peer.download_rate == 0.0 {
                sample
            } else {
                RATE_SMOOTHING * sample + (1.0 - RATE_SMOOTHING) * peer.download_rate
            };
        }).await;
    }

    /// Marks a neighbor as holding the whole file; returns true on the first transition.
    pub async fn mark_complete(&self, peer_id: PeerId) -> bool {
        let mut peers = self.peers.lock().await;
        return match peers.get_mut(&peer_id) {
            Some(peer) if !peer.is_complete => {
                peer.is_complete = true;
                info!("Peer {} has completed the file", peer_id);
                true
            }
            _ => false,
        };
    }

    pub async fn is_complete(&self, peer_id: PeerId) -> bool {
        return self.peers.lock().await.get(&peer_id).map_or(false, |peer| peer.is_complete);
    }

    pub async fn all_neighbors_complete(&self) -> bool {
        return self.peers.lock().await.values().all(|peer| peer.is_complete);
    }

    pub async fn register_acceptor(&self, peer_id: PeerId, tx: Sender<SessionCommand>) {
        self.modify(peer_id, |peer| {
            peer.serving = true;
            peer.choked_by_local = true;
        }).await;
        self.connections.lock().await.entry(peer_id).or_default().acceptor = Some(tx);
    }

    /// Forgets a closed acceptor session; the neighbor stops being a choking candidate.
    pub async fn deregister_acceptor(&self, peer_id: PeerId, tx: &Sender<SessionCommand>) {
        {
            let mut connections = self.connections.lock().await;
            let handles = connections.entry(peer_id).or_default();
            // a newer session for the same neighbor may already be registered
            if !handles.acceptor.as_ref().map_or(false, |current| current.same_channel(tx)) {
                return;
            }
            handles.acceptor = None;
        }
        self.modify(peer_id, |peer| {
            peer.serving = false;
            peer.interested = false;
            peer.choked_by_local = true;
        }).await;
    }

    pub async fn register_initiator(&self, peer_id: PeerId, tx: Sender<SessionCommand>) {
        self.connections.lock().await.entry(peer_id).or_default().initiator = Some(tx);
    }

    pub async fn deregister_initiator(&self, peer_id: PeerId) {
        if let Some(handles) = self.connections.lock().await.get_mut(&peer_id) {
            handles.initiator = None;
        }
        self.modify(peer_id, |peer| peer.local_is_choked_by_remote = true).await;
    }

    pub async fn open_initiators(&self) -> usize {
        return self.connections.lock().await.values()
            .filter(|handles| handles.initiator.is_some())
            .count();
    }

    pub async fn send_to_acceptor(&self, peer_id: PeerId, command: SessionCommand) -> bool {
        let tx = match self.connections.lock().await.get(&peer_id) {
            Some(ConnectionHandles { acceptor: Some(tx), .. }) => tx.clone(),
            _ => return false,
        };
        return tx.send(command).await.is_ok();
    }

    pub async fn broadcast_to_initiators(&self, command: SessionCommand) {
        let txs: Vec<Sender<SessionCommand>> = self.connections.lock().await.values()
            .filter_map(|handles| handles.initiator.clone())
            .collect();
        for tx in txs {
            let _ = tx.send(command.clone()).await;
        }
    }

    /// Sends HAVE for every block in `blocks` to each live, not yet complete neighbor.
    pub async fn broadcast_have(&self, blocks: &[BlockIndex]) {
        if blocks.is_empty() {
            return;
        }
        let recipients: Vec<PeerId> = self.peers.lock().await.values()
            .filter(|peer| peer.serving && !peer.is_complete)
            .map(|peer| peer.id())
            .collect();
        for peer_id in recipients {
            for command in have_commands(blocks) {
                if !self.send_to_acceptor(peer_id, command).await {
                    break;
                }
            }
            debug!("Announced {} new blocks to peer {}", blocks.len(), peer_id);
        }
    }

    async fn modify(&self, peer_id: PeerId, f: impl FnOnce(&mut PeerState)) {
        if let Some(peer) = self.peers.lock().await.get_mut(&peer_id) {
            f(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::sync::mpsc;
    use crate::core_models::entities::{Message, PeerIdentity};
    use crate::core_models::events::SessionCommand;
    use crate::peer_registry::PeerRegistry;

    fn registry() -> PeerRegistry {
        let peers = vec![
            PeerIdentity::new(1001, "localhost", 6001, true),
            PeerIdentity::new(1002, "localhost", 6002, false),
            PeerIdentity::new(1003, "localhost", 6003, false),
        ];
        return PeerRegistry::new(peers.iter());
    }

    #[tokio::test]
    async fn seeds_start_complete() {
        let registry = registry();
        assert!(registry.is_complete(1001).await);
        assert!(!registry.is_complete(1002).await);
        assert!(!registry.all_neighbors_complete().await);

        assert!(registry.mark_complete(1002).await);
        assert!(!registry.mark_complete(1002).await);
        assert!(registry.mark_complete(1003).await);
        assert!(registry.all_neighbors_complete().await);
    }

    #[tokio::test]
    async fn new_peers_start_choked_and_uninterested() {
        let registry = registry();
        let peer = registry.get(1002).await.unwrap();
        assert!(peer.choked_by_local);
        assert!(peer.local_is_choked_by_remote);
        assert!(!peer.interested);
        assert!(!peer.serving);
        assert!(registry.is_choked_by_local(1002).await);
        assert!(registry.is_choked_by_local(4242).await);
    }

    #[tokio::test]
    async fn download_rate_is_smoothed() {
        let registry = registry();
        registry.record_download(1002, 1000, Duration::from_secs(1)).await;
        assert_eq!(registry.get(1002).await.unwrap().download_rate, 1000.0);
        registry.record_download(1002, 3000, Duration::from_secs(1)).await;
        assert_eq!(registry.get(1002).await.unwrap().download_rate, 2000.0);
    }

    #[tokio::test]
    async fn acceptor_registration_controls_candidacy() {
        let registry = registry();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register_acceptor(1002, tx.clone()).await;
        registry.set_interested(1002, true).await;
        assert!(registry.get(1002).await.unwrap().is_unchoke_candidate());

        assert!(registry.send_to_acceptor(1002, SessionCommand::Deliver(Message::Unchoke)).await);
        assert_eq!(rx.recv().await.unwrap(), SessionCommand::Deliver(Message::Unchoke));

        registry.deregister_acceptor(1002, &tx).await;
        let peer = registry.get(1002).await.unwrap();
        assert!(!peer.serving && !peer.interested && peer.choked_by_local);
        assert!(!registry.send_to_acceptor(1002, SessionCommand::Deliver(Message::Choke)).await);
    }

    #[tokio::test]
    async fn stale_acceptor_does_not_evict_newer_session() {
        let registry = registry();
        let (old_tx, _old_rx) = mpsc::channel(8);
        let (new_tx, _new_rx) = mpsc::channel(8);
        registry.register_acceptor(1002, old_tx.clone()).await;
        registry.register_acceptor(1002, new_tx).await;

        registry.deregister_acceptor(1002, &old_tx).await;

        assert!(registry.get(1002).await.unwrap().serving);
    }

    #[tokio::test]
    async fn have_broadcast_skips_complete_and_offline_neighbors() {
        let registry = registry();
        let (seed_tx, mut seed_rx) = mpsc::channel(8);
        let (leech_tx, mut leech_rx) = mpsc::channel(8);
        registry.register_acceptor(1001, seed_tx).await;
        registry.register_acceptor(1002, leech_tx).await;

        registry.broadcast_have(&[0, 2]).await;

        assert_eq!(leech_rx.recv().await.unwrap(), SessionCommand::Deliver(Message::Have(0)));
        assert_eq!(leech_rx.recv().await.unwrap(), SessionCommand::Deliver(Message::Have(2)));
        assert!(seed_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn initiators_are_counted_and_notified() {
        let registry = registry();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register_initiator(1002, tx).await;
        assert_eq!(registry.open_initiators().await, 1);

        registry.broadcast_to_initiators(SessionCommand::AnnounceComplete).await;
        assert_eq!(rx.recv().await.unwrap(), SessionCommand::AnnounceComplete);

        registry.deregister_initiator(1002).await;
        assert_eq!(registry.open_initiators().await, 0);
    }
}
