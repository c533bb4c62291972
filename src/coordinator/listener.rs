use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use log::{debug, warn};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use crate::config::Config;
use crate::dependency_provider::SwarmDeps;
use crate::p2p::models::P2PError;
use crate::p2p::task;

pub async fn bind(config: &Config) -> io::Result<TcpListener> {
    return TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.listening_port())).await;
}

/// Accepts inbound connections until shutdown, then waits for every acceptor session to end.
pub fn spawn(listener: TcpListener, deps: Arc<dyn SwarmDeps>) -> JoinHandle<()> {
    return tokio::spawn(async move {
        run(listener, deps).await;
    });
}

async fn run(listener: TcpListener, deps: Arc<dyn SwarmDeps>) {
    let shutdown = deps.shutdown();
    let mut sessions: Vec<JoinHandle<Result<(), P2PError>>> = Vec::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => {
                    debug!("Accepted a connection from {}", address);
                    sessions.retain(|session| !session.is_finished());
                    sessions.push(task::spawn_acceptor(stream, deps.clone()));
                }
                Err(err) => warn!("Failed to accept a connection: {}", err),
            },
            _ = shutdown.wait() => break,
        }
    }

    drop(listener);
    for session in sessions {
        let _ = session.await;
    }
}
