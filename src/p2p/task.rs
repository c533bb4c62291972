use std::sync::Arc;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time;
use tokio::time::timeout;
use crate::coordinator::termination;
use crate::core_models::entities::{Message, PeerIdentity};
use crate::core_models::events::SessionCommand;
use crate::dependency_provider::SwarmDeps;
use crate::p2p;
use crate::p2p::conn::{self, PeerConnection, PeerReceiver, PeerSender};
use crate::p2p::models::{P2PError, P2PEvent, Role, SessionFlow, SessionState};

const COMMAND_CHANNEL_SIZE: usize = 256;
const FUNNEL_CHANNEL_SIZE: usize = 128;

/// Spawns the session that downloads from `neighbor`, reconnecting after failures.
pub fn spawn_initiator(neighbor: PeerIdentity, deps: Arc<dyn SwarmDeps>) -> JoinHandle<Result<(), P2PError>> {
    return tokio::spawn(async move {
        return run_initiator(neighbor, deps).await;
    });
}

/// Spawns the session that serves the neighbor behind an accepted connection.
pub fn spawn_acceptor(stream: TcpStream, deps: Arc<dyn SwarmDeps>) -> JoinHandle<Result<(), P2PError>> {
    return tokio::spawn(async move {
        return run_acceptor(stream, deps).await;
    });
}

async fn run_initiator(neighbor: PeerIdentity, deps: Arc<dyn SwarmDeps>) -> Result<(), P2PError> {
    let host_id = deps.config().host_id;
    let shutdown = deps.shutdown();
    let registry = deps.registry();
    let block_store = deps.block_store();

    loop {
        let connection = tokio::select! {
            connection = connect(&neighbor, &deps) => connection?,
            _ = shutdown.wait() => return Ok(()),
        };
        let (receiver, sender) = match connection {
            Some(connection) => connection,
            None => {
                info!("Peer {} holds the whole file and stops dialing peer {}", host_id, neighbor.id);
                return Ok(());
            }
        };

        let (tx, rx) = mpsc::channel::<SessionCommand>(COMMAND_CHANNEL_SIZE);
        registry.register_initiator(neighbor.id, tx).await;
        let mut state = SessionState::new(Role::Initiator, neighbor.id);
        let mut greeting = Vec::new();
        if block_store.is_complete().await {
            state.complete_announced = true;
            greeting.push(Message::Complete);
        }

        let result = run_session(receiver, sender, rx, &mut state, &deps, greeting).await;

        if let Some(pending) = state.pending_request.take() {
            block_store.release_block(pending.block_idx).await;
        }
        registry.deregister_initiator(neighbor.id).await;
        termination::check(&deps).await;

        let err = match result {
            Ok(()) => {
                info!("Peer {} closed its connection to {}", host_id, neighbor.id);
                return Ok(());
            }
            Err(err) => err,
        };
        if shutdown.is_triggered() || block_store.is_complete().await {
            warn!("Connection from peer {} to {} ended: {}", host_id, neighbor.id, err);
            return Err(err);
        }
        warn!("Connection from peer {} to {} lost, reconnecting: {}", host_id, neighbor.id, err);
        tokio::select! {
            _ = time::sleep(deps.config().retry_interval) => {}
            _ = shutdown.wait() => return Ok(()),
        }
    }
}

/// Dials `neighbor` until a handshake succeeds.
///
/// Refused connections are retried for as long as the host still misses blocks and
/// resolve to `None` once it does not; only failed handshakes count against `retry_limit`.
async fn connect(neighbor: &PeerIdentity, deps: &Arc<dyn SwarmDeps>) -> Result<Option<PeerConnection>, P2PError> {
    let config = deps.config();
    let connector = deps.peer_connector();
    let block_store = deps.block_store();
    let mut failed_handshakes = 0;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let connection = timeout(
            config.retry_interval,
            connector.connect_to(config.host_id, neighbor.clone()),
        ).await;
        match connection {
            Ok(Ok(connection)) => {
                info!("Peer {} makes a connection to Peer {}", config.host_id, neighbor.id);
                return Ok(Some(connection));
            }
            Ok(Err(P2PError::TCPConnectionNotEstablished)) => {
                debug!("Attempt {} to reach peer {} was refused", attempt, neighbor.id);
            }
            Ok(Err(err)) => {
                failed_handshakes += 1;
                debug!("Handshake {} with peer {} failed: {}", failed_handshakes, neighbor.id, err);
            }
            Err(_) => {
                failed_handshakes += 1;
                debug!("Handshake {} with peer {} timed out", failed_handshakes, neighbor.id);
            }
        }

        if failed_handshakes >= config.retry_limit {
            warn!("Peer {} gave up on peer {} after {} failed handshakes", config.host_id, neighbor.id, failed_handshakes);
            return Err(P2PError::HandshakeFailed);
        }
        if block_store.is_complete().await {
            return Ok(None);
        }
        time::sleep(config.retry_interval).await;
    }
}

async fn run_acceptor(stream: TcpStream, deps: Arc<dyn SwarmDeps>) -> Result<(), P2PError> {
    let host_id = deps.config().host_id;
    let shutdown = deps.shutdown();
    let registry = deps.registry();

    let handshake = tokio::select! {
        handshake = conn::accept_handshake(stream, deps.config()) => handshake,
        _ = shutdown.wait() => return Ok(()),
    };
    let (neighbor, (receiver, sender)) = match handshake {
        Ok(accepted) => accepted,
        Err(err) => {
            warn!("Peer {} rejected an inbound connection: {}", host_id, err);
            return Err(err);
        }
    };
    info!("Peer {} is connected from Peer {}", host_id, neighbor);

    // registering before the bitfield snapshot keeps later HAVE messages ordered after it
    let (tx, rx) = mpsc::channel::<SessionCommand>(COMMAND_CHANNEL_SIZE);
    registry.register_acceptor(neighbor, tx.clone()).await;
    let bitfield = deps.block_store().own_bitfield().await;
    let mut state = SessionState::new(Role::Acceptor, neighbor);

    let result = run_session(receiver, sender, rx, &mut state, &deps, vec![Message::Bitfield(bitfield.to_bytes())]).await;

    registry.deregister_acceptor(neighbor, &tx).await;
    match &result {
        Ok(()) => info!("Peer {} stopped serving {}", host_id, neighbor),
        Err(err) => warn!("Peer {} lost the connection from {}: {}", host_id, neighbor, err),
    }
    return result;
}

async fn run_session(receiver: Box<dyn PeerReceiver>,
                     mut sender: Box<dyn PeerSender>,
                     commands_rx: Receiver<SessionCommand>,
                     state: &mut SessionState,
                     deps: &Arc<dyn SwarmDeps>,
                     greeting: Vec<Message>) -> Result<(), P2PError> {
    deliver(&mut sender, greeting).await?;

    // merge peer messages and commands into one stream of events
    let (funnel_tx, mut funnel_rx) = mpsc::channel::<P2PEvent>(FUNNEL_CHANNEL_SIZE);
    let peer_handle = tokio::spawn(recv_peer_messages(receiver, funnel_tx.clone()));
    let commands_handle = tokio::spawn(recv_commands(commands_rx, funnel_tx));
    let shutdown = deps.shutdown();

    let result = loop {
        let event = tokio::select! {
            event = funnel_rx.recv() => event,
            _ = shutdown.wait() => break Ok(()),
        };
        let event = match event {
            Some(event) => event,
            None => break Ok(()),
        };
        let handler_result = match p2p::handlers::handle(event, state, deps).await {
            Ok(handler_result) => handler_result,
            Err(err) => break Err(err),
        };
        if let Err(err) = deliver(&mut sender, handler_result.messages_for_peer).await {
            break Err(err);
        }
        if handler_result.outcome == SessionFlow::Close {
            break Ok(());
        }
    };

    peer_handle.abort();
    commands_handle.abort();
    return result;
}

async fn deliver(sender: &mut Box<dyn PeerSender>, messages: Vec<Message>) -> Result<(), P2PError> {
    for message in messages {
        sender.send(message).await?;
    }
    return Ok(());
}

async fn recv_peer_messages(mut conn: Box<dyn PeerReceiver>, tx: Sender<P2PEvent>) {
    loop {
        match conn.receive().await {
            Ok(message) => {
                if tx.send(P2PEvent::PeerMessageReceived(Ok(message))).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(P2PEvent::PeerMessageReceived(Err(err))).await;
                break;
            }
        }
    }
}

async fn recv_commands(mut commands_rx: Receiver<SessionCommand>, tx: Sender<P2PEvent>) {
    while let Some(command) = commands_rx.recv().await {
        if tx.send(P2PEvent::Command(command)).await.is_err() {
            break;
        }
    }
}
