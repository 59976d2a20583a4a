use crate::error::{BittorrentError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

const RESERVED_LEN: usize = 8;

/// Handshake frame: `<pstrlen><pstr><8 reserved><info_hash><peer_id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: Vec<u8>,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol: PROTOCOL_STRING.to_vec(),
            info_hash,
            peer_id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.protocol.len() + RESERVED_LEN + 40);
        buf.push(self.protocol.len() as u8);
        buf.extend_from_slice(&self.protocol);
        buf.extend_from_slice(&[0u8; RESERVED_LEN]);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }

    /// Read one handshake frame. The protocol name is taken as sent;
    /// only its length is validated.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let pstrlen = reader.read_u8().await? as usize;
        if pstrlen == 0 {
            return Err(BittorrentError::EmptyProtocolName);
        }

        let mut rest = vec![0u8; pstrlen + RESERVED_LEN + 40];
        reader.read_exact(&mut rest).await?;

        let hashes = &rest[pstrlen + RESERVED_LEN..];
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&hashes[..20]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&hashes[20..]);

        Ok(Handshake {
            protocol: rest[..pstrlen].to_vec(),
            info_hash,
            peer_id,
        })
    }
}

/// Send our handshake, read the peer's, and check it is for the same
/// torrent. The whole exchange must finish within `deadline`; later I/O
/// on the stream is not bound by it.
pub async fn exchange<S>(
    stream: &mut S,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    deadline: Duration,
) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ours = Handshake::new(info_hash, peer_id);

    let theirs = timeout(deadline, send_and_receive(stream, &ours))
        .await
        .map_err(|_| BittorrentError::Timeout(deadline))??;

    if theirs.info_hash != info_hash {
        return Err(BittorrentError::InfoHashMismatch {
            expected: info_hash,
            actual: theirs.info_hash,
        });
    }

    Ok(theirs)
}

async fn send_and_receive<S>(stream: &mut S, ours: &Handshake) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&ours.to_bytes()).await?;
    debug!("Sent handshake");
    Handshake::read(stream).await
}
