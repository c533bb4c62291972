pub mod choke {
    pub mod handler;
    pub mod models;
    pub mod task;
}

pub mod coordinator {
    pub mod listener;
    pub mod task;
    pub mod termination;
}

pub mod core_models {
    pub mod entities;
    pub mod events;
}

pub mod p2p {
    pub mod codec;
    pub mod conn;
    pub mod handlers;
    pub mod models;
    pub mod task;
}

pub mod block_store;
pub mod config;
pub mod dependency_provider;
pub mod file_provider;
pub mod mocks;
pub mod peer_registry;
