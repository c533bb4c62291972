use std::sync::Arc;
use crate::block_store::BlockStore;
use crate::config::Config;
use crate::coordinator::termination::ShutdownSignal;
use crate::p2p::conn::{PeerConnector, TcpPeerConnector};
use crate::peer_registry::PeerRegistry;

pub trait SwarmDeps: Send + Sync {
    fn config(&self) -> &Config;
    fn block_store(&self) -> Arc<BlockStore>;
    fn registry(&self) -> Arc<PeerRegistry>;
    fn shutdown(&self) -> ShutdownSignal;
    fn peer_connector(&self) -> Arc<dyn PeerConnector>;
}

pub struct DependencyProvider {
    config: Config,
    block_store: Arc<BlockStore>,
    registry: Arc<PeerRegistry>,
    shutdown: ShutdownSignal,
    peer_connector: Arc<dyn PeerConnector>,
}

impl DependencyProvider {
    pub fn init(config: Config, block_store: BlockStore) -> Self {
        return DependencyProvider::with_connector(config, block_store, Arc::new(TcpPeerConnector {}));
    }

    pub fn with_connector(config: Config, block_store: BlockStore, peer_connector: Arc<dyn PeerConnector>) -> Self {
        let registry = PeerRegistry::new(config.neighbors());
        return DependencyProvider {
            config,
            block_store: Arc::new(block_store),
            registry: Arc::new(registry),
            shutdown: ShutdownSignal::new(),
            peer_connector,
        };
    }
}

impl SwarmDeps for DependencyProvider {
    fn config(&self) -> &Config {
        return &self.config;
    }

    fn block_store(&self) -> Arc<BlockStore> {
        return self.block_store.clone();
    }

    fn registry(&self) -> Arc<PeerRegistry> {
        return self.registry.clone();
    }

    fn shutdown(&self) -> ShutdownSignal {
        return self.shutdown.clone();
    }

    fn peer_connector(&self) -> Arc<dyn PeerConnector> {
        return self.peer_connector.clone();
    }
}
