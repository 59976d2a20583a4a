use super::handshake;
use super::message::read_message;
use super::{BlockInfo, PeerMessage};
use crate::client::ClientConfig;
use crate::error::{BittorrentError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// One handshaken connection to a remote peer.
///
/// Starts out choked; only `Choke`/`Unchoke` messages from the peer
/// change that.
pub struct PeerConnection<S = TcpStream> {
    addr: SocketAddr,
    stream: S,
    choked: bool,
    remote_peer_id: [u8; 20],
}

impl PeerConnection<TcpStream> {
    /// Dial `addr` and perform the handshake. Either failure drops the
    /// socket; nothing is retried here.
    pub async fn connect(addr: SocketAddr, info_hash: [u8; 20], config: &ClientConfig) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BittorrentError::Timeout(config.connect_timeout))?
            .map_err(|e| BittorrentError::PeerError(format!("Failed to connect to {}: {}", addr, e)))?;

        let connection =
            Self::handshake(stream, addr, info_hash, config.peer_id, config.handshake_timeout).await?;
        info!("Completed handshake with {}", addr);
        Ok(connection)
    }
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Handshake over an already established stream.
    pub async fn handshake(
        mut stream: S,
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        deadline: Duration,
    ) -> Result<Self> {
        let theirs = handshake::exchange(&mut stream, info_hash, peer_id, deadline).await?;

        Ok(Self {
            addr,
            stream,
            choked: true,
            remote_peer_id: theirs.peer_id,
        })
    }

    pub async fn send_message(&mut self, message: &PeerMessage) -> Result<()> {
        self.stream.write_all(&message.to_bytes()).await?;
        debug!("Sent message to {}: {:?}", self.addr, message);
        Ok(())
    }

    pub async fn send_interested(&mut self) -> Result<()> {
        self.send_message(&PeerMessage::Interested).await
    }

    pub async fn send_unchoke(&mut self) -> Result<()> {
        self.send_message(&PeerMessage::Unchoke).await
    }

    pub async fn send_request(&mut self, piece_index: u32, offset: u32, length: u32) -> Result<()> {
        self.send_message(&PeerMessage::Request {
            block: BlockInfo::new(piece_index, offset, length),
        })
        .await
    }

    /// Read the next message, tracking choke state from it.
    pub async fn receive_message(&mut self) -> Result<PeerMessage> {
        let message = read_message(&mut self.stream).await?;

        match message {
            PeerMessage::Choke => self.choked = true,
            PeerMessage::Unchoke => self.choked = false,
            _ => {}
        }

        debug!("Received message from {}: {:?}", self.addr, message);
        Ok(message)
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn remote_peer_id(&self) -> &[u8; 20] {
        &self.remote_peer_id
    }
}
