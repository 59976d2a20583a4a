use super::ClientConfig;
use crate::error::Result;
use crate::peer::PeerConnection;
use crate::piece::{download_piece, verify_piece, PieceDescriptor, PieceOutcome};
use crate::tracker::Peer;
use async_channel::Receiver;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};

/// A queued piece and how many times it has been tried already.
#[derive(Debug, Clone, Copy)]
pub struct PieceWork {
    pub piece: PieceDescriptor,
    pub attempt: u32,
}

impl PieceWork {
    pub fn new(piece: PieceDescriptor) -> Self {
        Self { piece, attempt: 0 }
    }
}

/// What a worker tells the orchestrator.
#[derive(Debug)]
pub enum WorkerEvent {
    Completed(PieceOutcome),
    /// The worker could not deliver this piece and has stopped.
    Failed(PieceWork),
}

/// Downloads pieces from a single peer for as long as work is queued.
pub struct Worker {
    peer: Peer,
    info_hash: [u8; 20],
    config: ClientConfig,
}

impl Worker {
    pub fn new(peer: Peer, info_hash: [u8; 20], config: ClientConfig) -> Self {
        Self {
            peer,
            info_hash,
            config,
        }
    }

    /// Connect, then pull pieces off `work` until the queue closes or an
    /// attempt fails. A failure ends this worker only.
    pub async fn run(self, work: Receiver<PieceWork>, results: Sender<WorkerEvent>) {
        let mut conn = match PeerConnection::connect(self.peer.addr, self.info_hash, &self.config).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Dropping peer {}: {}", self.peer, e);
                return;
            }
        };

        if let Err(e) = self.announce_interest(&mut conn).await {
            warn!("Dropping peer {}: {}", self.peer, e);
            return;
        }

        while let Ok(job) = work.recv().await {
            let index = job.piece.index;
            match self.fetch(&mut conn, &job.piece).await {
                Ok(data) => {
                    debug!("Peer {} delivered piece {}", self.peer, index);
                    if results
                        .send(WorkerEvent::Completed(PieceOutcome { index, data }))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    error!("Peer {} failed piece {}: {}", self.peer, index, e);
                    let _ = results.send(WorkerEvent::Failed(job)).await;
                    return;
                }
            }
        }

        info!("Work queue closed, disconnecting from {}", self.peer);
    }

    async fn announce_interest<S>(&self, conn: &mut PeerConnection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.send_unchoke().await?;
        conn.send_interested().await
    }

    /// One attempt at one piece: download, then verify before it may leave
    /// the worker.
    async fn fetch<S>(&self, conn: &mut PeerConnection<S>, piece: &PieceDescriptor) -> Result<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let data = download_piece(
            conn,
            piece,
            self.config.max_in_flight,
            self.config.piece_timeout,
        )
        .await?;
        verify_piece(piece, &data)?;
        Ok(data)
    }
}
