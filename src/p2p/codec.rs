use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use crate::core_models::entities::{Message, PeerId};

pub const HANDSHAKE_HEADER: &[u8; 18] = b"P2PFILESHARINGPROJ";
pub const HANDSHAKE_LENGTH: usize = 32;
const ZERO_BITS_LENGTH: usize = 10;
const PEER_ID_LENGTH: usize = 4;
pub const MAX_PEER_ID: PeerId = 9999;
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;
// tag byte plus block index in front of the block data of a PIECE frame
const PIECE_HEADER_LENGTH: usize = 5;
pub const MAX_BLOCK_SIZE: usize = MAX_FRAME_LENGTH - PIECE_HEADER_LENGTH;

const COMPLETE: u8 = 0;
const CHOKE: u8 = 1;
const UNCHOKE: u8 = 2;
const INTERESTED: u8 = 3;
const NOT_INTERESTED: u8 = 4;
const HAVE: u8 = 5;
const BITFIELD: u8 = 6;
const REQUEST: u8 = 7;
const PIECE: u8 = 8;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("handshake header does not match the protocol header")]
    InvalidHeader,
    #[error("truncated input: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("handshake peer id is not a number of at most 4 digits")]
    InvalidPeerId,
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("connection closed by remote")]
    ConnectionClosed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    pub fn is_protocol_violation(&self) -> bool {
        return !matches!(self, CodecError::ConnectionClosed | CodecError::Io(_));
    }
}

pub fn encode_handshake(peer_id: PeerId) -> Result<[u8; HANDSHAKE_LENGTH], CodecError> {
    if peer_id > MAX_PEER_ID {
        return Err(CodecError::InvalidPeerId);
    }
    let mut handshake = [0u8; HANDSHAKE_LENGTH];
    handshake[..HANDSHAKE_HEADER.len()].copy_from_slice(HANDSHAKE_HEADER);
    let id_field = format!("{:04}", peer_id);
    handshake[HANDSHAKE_LENGTH - PEER_ID_LENGTH..].copy_from_slice(id_field.as_bytes());
    return Ok(handshake);
}

pub fn decode_handshake(bytes: &[u8]) -> Result<PeerId, CodecError> {
    if bytes.len() < HANDSHAKE_LENGTH {
        return Err(CodecError::Truncated { expected: HANDSHAKE_LENGTH, actual: bytes.len() });
    }
    if &bytes[..HANDSHAKE_HEADER.len()] != HANDSHAKE_HEADER {
        return Err(CodecError::InvalidHeader);
    }

    let id_start = HANDSHAKE_HEADER.len() + ZERO_BITS_LENGTH;
    let digits: String = bytes[id_start..HANDSHAKE_LENGTH].iter()
        .skip_while(|byte| **byte == 0 || **byte == b' ')
        .map(|byte| *byte as char)
        .collect();
    if digits.is_empty() {
        return Ok(0);
    }
    return digits.parse::<PeerId>().map_err(|_| CodecError::InvalidPeerId);
}

pub async fn read_handshake<T: AsyncRead + Unpin>(stream: &mut T) -> Result<PeerId, CodecError> {
    let mut buffer = [0u8; HANDSHAKE_LENGTH];
    read_exact_or_closed(stream, &mut buffer).await?;
    return decode_handshake(&buffer);
}

/// Encodes a message as a full frame, length prefix included.
pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut body = Vec::with_capacity(5);
    match message {
        Message::Complete => body.push(COMPLETE),
        Message::Choke => body.push(CHOKE),
        Message::Unchoke => body.push(UNCHOKE),
        Message::Interested => body.push(INTERESTED),
        Message::NotInterested => body.push(NOT_INTERESTED),
        Message::Have(block_idx) => {
            body.push(HAVE);
            body.extend_from_slice(&(*block_idx as u32).to_be_bytes());
        }
        Message::Bitfield(bitfield) => {
            body.push(BITFIELD);
            body.extend_from_slice(bitfield);
        }
        Message::Request(block_idx) => {
            body.push(REQUEST);
            body.extend_from_slice(&(*block_idx as u32).to_be_bytes());
        }
        Message::Piece(block_idx, data) => {
            body.push(PIECE);
            body.extend_from_slice(&(*block_idx as u32).to_be_bytes());
            body.extend_from_slice(data);
        }
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend(body);
    return frame;
}

/// Decodes the bytes that follow the length prefix of a frame.
pub fn decode_frame(body: &[u8]) -> Result<Message, CodecError> {
    let (tag, payload) = match body.split_first() {
        Some(split) => split,
        None => return Err(CodecError::MalformedMessage("empty frame".to_string())),
    };

    return match *tag {
        COMPLETE | CHOKE | UNCHOKE | INTERESTED | NOT_INTERESTED => {
            if !payload.is_empty() {
                return Err(malformed_length(*tag, body.len()));
            }
            Ok(match *tag {
                COMPLETE => Message::Complete,
                CHOKE => Message::Choke,
                UNCHOKE => Message::Unchoke,
                INTERESTED => Message::Interested,
                _ => Message::NotInterested,
            })
        }
        HAVE | REQUEST => {
            if payload.len() != 4 {
                return Err(malformed_length(*tag, body.len()));
            }
            let block_idx = block_index_from_be_bytes(payload);
            Ok(if *tag == HAVE { Message::Have(block_idx) } else { Message::Request(block_idx) })
        }
        BITFIELD => Ok(Message::Bitfield(payload.to_vec())),
        PIECE => {
            if payload.len() < 4 {
                return Err(malformed_length(*tag, body.len()));
            }
            let block_idx = block_index_from_be_bytes(&payload[..4]);
            Ok(Message::Piece(block_idx, payload[4..].to_vec()))
        }
        unknown => Err(CodecError::MalformedMessage(format!("unknown message type {}", unknown))),
    };
}

pub async fn decode_message<T: AsyncRead + Unpin>(stream: &mut T) -> Result<Message, CodecError> {
    let mut len = [0u8; 4];
    read_exact_or_closed(stream, &mut len).await?;
    let len = u32::from_be_bytes(len) as usize;
    if len == 0 || len > MAX_FRAME_LENGTH {
        return Err(CodecError::MalformedMessage(format!("frame length {} out of bounds", len)));
    }

    let mut body = vec![0u8; len];
    read_exact_or_closed(stream, &mut body).await?;
    return decode_frame(&body);
}

async fn read_exact_or_closed<T: AsyncRead + Unpin>(stream: &mut T, buffer: &mut [u8]) -> Result<(), CodecError> {
    return match stream.read_exact(buffer).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(CodecError::ConnectionClosed),
        Err(err) => Err(CodecError::Io(err)),
    };
}

fn block_index_from_be_bytes(bytes: &[u8]) -> usize {
    return u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
}

fn malformed_length(tag: u8, len: usize) -> CodecError {
    return CodecError::MalformedMessage(format!("length {} does not fit message type {}", len, tag));
}
