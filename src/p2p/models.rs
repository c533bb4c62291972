use std::time::Instant;
use thiserror::Error;
use crate::block_store::StorageError;
use crate::core_models::entities::{BlockIndex, Message, PeerId};
use crate::core_models::events::SessionCommand;
use crate::p2p::codec::CodecError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    // dialed out, downloads from the neighbor
    Initiator,
    // accepted, serves the neighbor
    Acceptor,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PendingRequest {
    pub block_idx: BlockIndex,
    pub sent_at: Instant,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    pub role: Role,
    pub neighbor: PeerId,
    pub local_is_choked: bool,
    pub local_interested: bool,
    pub pending_request: Option<PendingRequest>,
    pub complete_announced: bool,
}

impl SessionState {
    pub fn new(role: Role, neighbor: PeerId) -> Self {
        return SessionState {
            role,
            neighbor,
            local_is_choked: true,
            local_interested: false,
            pending_request: None,
            complete_announced: false,
        };
    }
}

#[derive(Debug, Error)]
pub enum P2PError {
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),
    #[error("peer {0} is not a configured neighbor")]
    UnknownNeighbor(PeerId),
    #[error("handshake failed")]
    HandshakeFailed,
    #[error("tcp connection could not be established")]
    TCPConnectionNotEstablished,
    #[error("network error: {0}")]
    Network(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl P2PError {
    pub fn is_protocol_violation(&self) -> bool {
        return match self {
            P2PError::Protocol(err) => err.is_protocol_violation(),
            P2PError::UnknownNeighbor(_) => true,
            _ => false,
        };
    }
}

// Everything a running session reacts to, funneled into a single channel
#[derive(Debug)]
pub enum P2PEvent {
    PeerMessageReceived(Result<Message, P2PError>),
    Command(SessionCommand),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionFlow {
    Continue,
    Close,
}
