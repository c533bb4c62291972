use std::sync::Arc;
use std::time::Instant;
use log::{debug, info, warn};
use crate::block_store::StorageError;
use crate::coordinator::termination;
use crate::core_models::entities::{BlockIndex, Message};
use crate::core_models::events::{SessionCommand, WriteOutcome};
use crate::dependency_provider::SwarmDeps;
use crate::p2p::codec::CodecError;
use crate::p2p::models::{P2PError, P2PEvent, PendingRequest, Role, SessionFlow, SessionState};

pub struct HandlerResult {
    pub messages_for_peer: Vec<Message>,
    pub outcome: SessionFlow,
}

impl HandlerResult {
    pub fn new() -> Self {
        return HandlerResult {
            messages_for_peer: Vec::new(),
            outcome: SessionFlow::Continue,
        };
    }
    pub fn msg(&mut self, message: Message) {
        self.messages_for_peer.push(message);
    }
    pub fn close(&mut self) {
        self.outcome = SessionFlow::Close;
    }
}

pub async fn handle(event: P2PEvent, state: &mut SessionState, deps: &Arc<dyn SwarmDeps>)
                    -> Result<HandlerResult, P2PError> {
    return match event {
        P2PEvent::Command(command) => Ok(handle_command(command, state)),
        P2PEvent::PeerMessageReceived(message) => {
            let message = message?;
            match state.role {
                Role::Acceptor => handle_acceptor_message(message, state, deps).await,
                Role::Initiator => handle_initiator_message(message, state, deps).await,
            }
        }
    };
}

fn handle_command(command: SessionCommand, state: &mut SessionState) -> HandlerResult {
    let mut result = HandlerResult::new();
    match (command, state.role) {
        (SessionCommand::Deliver(message), Role::Acceptor) => {
            result.msg(message);
        }
        (SessionCommand::AnnounceComplete, Role::Initiator) => {
            if !state.complete_announced {
                state.complete_announced = true;
                result.msg(Message::Complete);
            }
        }
        (command, role) => {
            warn!("Command {:?} does not apply to the {:?} session with peer {}", command, role, state.neighbor);
        }
    }
    return result;
}

async fn handle_acceptor_message(message: Message, state: &mut SessionState, deps: &Arc<dyn SwarmDeps>)
                                 -> Result<HandlerResult, P2PError> {
    let mut result = HandlerResult::new();
    let host_id = deps.config().host_id;
    let registry = deps.registry();

    match message {
        Message::Interested => {
            info!("Peer {} received the 'interested' message from {}", host_id, state.neighbor);
            registry.set_interested(state.neighbor, true).await;
        }
        Message::NotInterested => {
            info!("Peer {} received the 'not interested' message from {}", host_id, state.neighbor);
            registry.set_interested(state.neighbor, false).await;
        }
        Message::Request(block_idx) => {
            serve_request(block_idx, state, deps, &mut result).await?;
        }
        Message::Complete => {
            // acknowledge before anything else so the neighbor's initiator can finish
            result.msg(Message::Complete);
            registry.mark_complete(state.neighbor).await;
            termination::check(deps).await;
            result.close();
        }
        other => {
            warn!("Ignoring {} from peer {}: not valid towards a serving session", other.name(), state.neighbor);
        }
    }

    return Ok(result);
}

async fn serve_request(block_idx: BlockIndex, state: &SessionState, deps: &Arc<dyn SwarmDeps>, result: &mut HandlerResult)
                       -> Result<(), P2PError> {
    if deps.registry().is_choked_by_local(state.neighbor).await {
        debug!("Ignoring REQUEST for block {} from choked peer {}", block_idx, state.neighbor);
        return Ok(());
    }
    let block_store = deps.block_store();
    if !block_store.has_block(block_idx).await {
        warn!("Peer {} requested block {} which is not owned", state.neighbor, block_idx);
        return Ok(());
    }
    let data = block_store.read_block(block_idx).await?;
    result.msg(Message::Piece(block_idx, data));
    return Ok(());
}

async fn handle_initiator_message(message: Message, state: &mut SessionState, deps: &Arc<dyn SwarmDeps>)
                                  -> Result<HandlerResult, P2PError> {
    let mut result = HandlerResult::new();
    let host_id = deps.config().host_id;
    let block_store = deps.block_store();
    let registry = deps.registry();

    match message {
        Message::Bitfield(bytes) => {
            let expected = block_store.layout().bitfield_length();
            if bytes.len() != expected {
                return Err(P2PError::Protocol(CodecError::MalformedMessage(
                    format!("bitfield of {} bytes, expected {}", bytes.len(), expected),
                )));
            }
            block_store.record_remote_bitfield(state.neighbor, &bytes).await;
            update_interest(state, deps, &mut result, true).await;
            check_neighbor_complete(state, deps).await;
        }
        Message::Have(block_idx) => {
            info!("Peer {} received the 'have' message from {} for the piece {}", host_id, state.neighbor, block_idx);
            block_store.record_remote_have(state.neighbor, block_idx).await;
            update_interest(state, deps, &mut result, false).await;
            check_neighbor_complete(state, deps).await;
            request_next_block(state, deps, &mut result).await;
        }
        Message::Choke => {
            info!("Peer {} is choked by {}", host_id, state.neighbor);
            state.local_is_choked = true;
            registry.set_local_choked(state.neighbor, true).await;
            if let Some(pending) = state.pending_request.take() {
                block_store.release_block(pending.block_idx).await;
            }
        }
        Message::Unchoke => {
            info!("Peer {} is unchoked by {}", host_id, state.neighbor);
            state.local_is_choked = false;
            registry.set_local_choked(state.neighbor, false).await;
            request_next_block(state, deps, &mut result).await;
        }
        Message::Piece(block_idx, data) => {
            store_piece(block_idx, data, state, deps).await;
            update_interest(state, deps, &mut result, false).await;
            request_next_block(state, deps, &mut result).await;
        }
        Message::Complete => {
            if state.complete_announced {
                debug!("Peer {} acknowledged our completion", state.neighbor);
                result.close();
            } else {
                warn!("Ignoring unsolicited COMPLETE from peer {}", state.neighbor);
            }
        }
        other => {
            warn!("Ignoring {} from peer {}: not valid towards a downloading session", other.name(), state.neighbor);
        }
    }

    return Ok(result);
}

async fn store_piece(block_idx: BlockIndex, data: Vec<u8>, state: &mut SessionState, deps: &Arc<dyn SwarmDeps>) {
    let host_id = deps.config().host_id;
    let block_store = deps.block_store();
    let length = data.len();

    let pending = state.pending_request.filter(|pending| pending.block_idx == block_idx);
    if pending.is_some() {
        state.pending_request = None;
    }

    match block_store.write_block(block_idx, data).await {
        Ok(WriteOutcome::Duplicate) => {
            debug!("Block {} from peer {} was already owned", block_idx, state.neighbor);
        }
        Ok(outcome) => {
            if let Some(pending) = pending {
                deps.registry().record_download(state.neighbor, length, pending.sent_at.elapsed()).await;
            }
            info!("Peer {} has downloaded the piece {} from {}. Now the number of pieces it has is {}",
                host_id, block_idx, state.neighbor, block_store.owned_count().await);
            if outcome.is_completed() {
                info!("Peer {} has downloaded the complete file", host_id);
                deps.registry().broadcast_to_initiators(SessionCommand::AnnounceComplete).await;
                termination::check(deps).await;
            }
        }
        Err(err @ StorageError::Io(_)) => {
            warn!("Could not store block {} from peer {}: {}", block_idx, state.neighbor, err);
        }
        Err(err) => {
            warn!("Dropping PIECE {} of {} bytes from peer {}: {}", block_idx, length, state.neighbor, err);
            if let Some(pending) = pending {
                block_store.release_block(pending.block_idx).await;
            }
        }
    }
}

// Bitfields always get an answer, everything else only on a change of interest
async fn update_interest(state: &mut SessionState, deps: &Arc<dyn SwarmDeps>, result: &mut HandlerResult, always_answer: bool) {
    let interested = deps.block_store().is_interested_in(state.neighbor).await;
    if interested == state.local_interested && !always_answer {
        return;
    }
    state.local_interested = interested;
    deps.registry().set_local_interested(state.neighbor, interested).await;
    result.msg(if interested { Message::Interested } else { Message::NotInterested });
}

async fn request_next_block(state: &mut SessionState, deps: &Arc<dyn SwarmDeps>, result: &mut HandlerResult) {
    if state.local_is_choked || state.pending_request.is_some() {
        return;
    }
    if let Some(block_idx) = deps.block_store().select_block_to_request(state.neighbor).await {
        state.pending_request = Some(PendingRequest { block_idx, sent_at: Instant::now() });
        result.msg(Message::Request(block_idx));
    }
}

async fn check_neighbor_complete(state: &SessionState, deps: &Arc<dyn SwarmDeps>) {
    if deps.block_store().remote_has_all(state.neighbor).await && deps.registry().mark_complete(state.neighbor).await {
        termination::check(deps).await;
    }
}
