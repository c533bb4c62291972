use async_trait::async_trait;
use log::warn;
use mockall::automock;
use tokio::io;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use crate::config::Config;
use crate::core_models::entities::{Message, PeerId, PeerIdentity};
use crate::p2p::codec;
use crate::p2p::models::P2PError;

#[async_trait]
pub trait PeerReceiver: Send {
    async fn receive(&mut self) -> Result<Message, P2PError>;
}

#[async_trait]
pub trait PeerSender: Send {
    async fn send(&mut self, message: Message) -> Result<(), P2PError>;
}

pub struct PeerReadConn {
    stream: ReadHalf<TcpStream>,
}

#[async_trait]
impl PeerReceiver for PeerReadConn {
    async fn receive(&mut self) -> Result<Message, P2PError> {
        return Ok(codec::decode_message(&mut self.stream).await?);
    }
}

pub struct PeerWriteConn {
    stream: WriteHalf<TcpStream>,
}

#[async_trait]
impl PeerSender for PeerWriteConn {
    async fn send(&mut self, message: Message) -> Result<(), P2PError> {
        return match self.stream.write_all(&codec::encode_message(&message)).await {
            Ok(_) => Ok(()),
            Err(err) => Err(P2PError::Network(format!("{} delivery failed: {}", message.name(), err))),
        };
    }
}

pub type PeerConnection = (Box<dyn PeerReceiver>, Box<dyn PeerSender>);

#[automock]
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Dials `neighbor` and completes the handshake exchange as `host_id`.
    async fn connect_to(&self, host_id: PeerId, neighbor: PeerIdentity) -> Result<PeerConnection, P2PError>;
}

pub struct TcpPeerConnector {}

#[async_trait]
impl PeerConnector for TcpPeerConnector {
    async fn connect_to(&self, host_id: PeerId, neighbor: PeerIdentity) -> Result<PeerConnection, P2PError> {
        let handshake = codec::encode_handshake(host_id)?;
        let mut tcp_stream = establish_tcp_connection(&neighbor).await?;
        if tcp_stream.write_all(&handshake).await.is_err() {
            return Err(P2PError::HandshakeFailed);
        }
        let remote_id = match codec::read_handshake(&mut tcp_stream).await {
            Ok(remote_id) => remote_id,
            Err(err) => {
                warn!("Handshake with peer {} failed: {}", neighbor.id, err);
                return Err(P2PError::HandshakeFailed);
            }
        };
        if remote_id != neighbor.id {
            warn!("Dialed peer {} but peer {} answered", neighbor.id, remote_id);
            return Err(P2PError::HandshakeFailed);
        }

        return Ok(split(tcp_stream));
    }
}

/// Reads the handshake of an inbound connection and answers it.
///
/// Fails with `UnknownNeighbor` when the remote id is not a configured neighbor.
pub async fn accept_handshake(mut tcp_stream: TcpStream, config: &Config) -> Result<(PeerId, PeerConnection), P2PError> {
    let remote_id = codec::read_handshake(&mut tcp_stream).await?;
    if config.neighbor(remote_id).is_none() {
        return Err(P2PError::UnknownNeighbor(remote_id));
    }
    if tcp_stream.write_all(&codec::encode_handshake(config.host_id)?).await.is_err() {
        return Err(P2PError::HandshakeFailed);
    }
    return Ok((remote_id, split(tcp_stream)));
}

async fn establish_tcp_connection(peer: &PeerIdentity) -> Result<TcpStream, P2PError> {
    return match TcpStream::connect((peer.host.as_str(), peer.port)).await {
        Ok(stream) => Ok(stream),
        Err(_) => Err(P2PError::TCPConnectionNotEstablished),
    };
}

fn split(tcp_stream: TcpStream) -> PeerConnection {
    let (read_stream, write_stream) = io::split(tcp_stream);
    let receiver = Box::new(PeerReadConn { stream: read_stream });
    let sender = Box::new(PeerWriteConn { stream: write_stream });
    return (receiver, sender);
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use crate::core_models::entities::{Message, PeerIdentity};
    use crate::mocks::test_config;
    use crate::p2p::codec;
    use crate::p2p::conn::{accept_handshake, PeerConnector, PeerReadConn, PeerReceiver, TcpPeerConnector};
    use crate::p2p::models::P2PError;

    #[tokio::test]
    async fn test_receive_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, _) = tokio::io::split(stream);
            let mut receiver = PeerReadConn { stream: read_half };
            return receiver.receive().await.unwrap();
        });

        let mut client_stream = TcpStream::connect(&local_addr).await.unwrap();
        // a piece message for block 0 carrying one byte
        let piece_msg = vec![0, 0, 0, 6, 8, 0, 0, 0, 0, 9];
        client_stream.write_all(&piece_msg).await.unwrap();

        let received_message = task.await.unwrap();
        assert_eq!(received_message, Message::Piece(0, vec![9]));
    }

    #[tokio::test]
    async fn test_handshake_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peers = vec![
            PeerIdentity::new(1001, "127.0.0.1", port, true),
            PeerIdentity::new(1002, "127.0.0.1", 0, false),
        ];
        let config = test_config(1001, peers.clone(), 10, 4);

        let acceptor = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (remote_id, (mut receiver, _sender)) = accept_handshake(stream, &config).await.unwrap();
            return (remote_id, receiver.receive().await.unwrap());
        });

        let (_receiver, mut sender) = TcpPeerConnector {}.connect_to(1002, peers[0].clone()).await.unwrap();
        sender.send(Message::Interested).await.unwrap();

        assert_eq!(acceptor.await.unwrap(), (1002, Message::Interested));
    }

    #[tokio::test]
    async fn test_unknown_neighbor_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let peers = vec![PeerIdentity::new(1001, "127.0.0.1", local_addr.port(), true)];
        let config = test_config(1001, peers, 10, 4);

        let acceptor = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            return accept_handshake(stream, &config).await.map(|(remote_id, _)| remote_id);
        });

        let mut client_stream = TcpStream::connect(&local_addr).await.unwrap();
        client_stream.write_all(&codec::encode_handshake(4242).unwrap()).await.unwrap();

        let result = acceptor.await.unwrap();
        assert!(matches!(result, Err(P2PError::UnknownNeighbor(4242))));
        assert!(result.unwrap_err().is_protocol_violation());
        // nothing was answered before the connection dropped
        let mut buffer = Vec::new();
        client_stream.read_to_end(&mut buffer).await.unwrap();
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_peer_answering_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            codec::read_handshake(&mut stream).await.unwrap();
            stream.write_all(&codec::encode_handshake(1003).unwrap()).await.unwrap();
        });

        let neighbor = PeerIdentity::new(1001, "127.0.0.1", port, true);
        let result = TcpPeerConnector {}.connect_to(1002, neighbor).await;
        assert!(matches!(result, Err(P2PError::HandshakeFailed)));
    }

    #[tokio::test]
    async fn test_closed_port_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let neighbor = PeerIdentity::new(1001, "127.0.0.1", port, true);
        let result = TcpPeerConnector {}.connect_to(1002, neighbor).await;
        assert!(matches!(result, Err(P2PError::TCPConnectionNotEstablished)));
    }
}
