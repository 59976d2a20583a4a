mod config;
mod worker;

pub use config::{ClientConfig, RetryPolicy, DEFAULT_LISTEN_PORT};

use crate::error::{BittorrentError, Result};
use crate::piece::{PieceDescriptor, PieceLayout, PieceOutcome};
use crate::torrent::Metainfo;
use crate::tracker::Peer;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use worker::{PieceWork, Worker, WorkerEvent};

/// What the orchestrator needs to know about the content.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub name: String,
    pub info_hash: [u8; 20],
    pub piece_length: usize,
    pub length: usize,
    pub piece_hashes: Vec<[u8; 20]>,
}

impl DownloadTarget {
    pub fn layout(&self) -> PieceLayout {
        PieceLayout::new(self.piece_length, self.length)
    }
}

impl From<&Metainfo> for DownloadTarget {
    fn from(metainfo: &Metainfo) -> Self {
        Self {
            name: metainfo.info.name.clone(),
            info_hash: metainfo.info_hash,
            piece_length: metainfo.info.piece_length as usize,
            length: metainfo.info.length as usize,
            piece_hashes: metainfo.info.pieces.clone(),
        }
    }
}

/// Fans piece downloads out over peer workers and gathers the results.
pub struct TorrentClient {
    config: ClientConfig,
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        info!("Client initialized with peer_id: {}", hex::encode(config.peer_id));
        Self { config }
    }

    /// Download every piece, one worker per peer, and return the content.
    pub async fn download_file(&self, target: &DownloadTarget, peers: &[Peer]) -> Result<Vec<u8>> {
        info!("Starting download for {}", target.name);

        let layout = target.layout();
        let pieces = layout.descriptors(&target.piece_hashes);
        let mut output = vec![0u8; layout.total_length()];

        self.drive(target.info_hash, pieces, peers, |outcome| {
            let (begin, end) = layout.bounds(outcome.index as usize);
            output[begin..end].copy_from_slice(&outcome.data);
        })
        .await?;

        Ok(output)
    }

    /// Download the single piece `index` from the first peer only.
    pub async fn download_piece(
        &self,
        target: &DownloadTarget,
        index: usize,
        peers: &[Peer],
    ) -> Result<Vec<u8>> {
        let layout = target.layout();
        let hash = target.piece_hashes.get(index).ok_or(BittorrentError::InvalidPieceIndex {
            index,
            count: target.piece_hashes.len(),
        })?;
        let first = peers.first().ok_or(BittorrentError::NoPeers)?;

        info!("Starting download for {} piece #{}", target.name, index);

        let piece = PieceDescriptor {
            index: index as u32,
            hash: *hash,
            length: layout.piece_size(index),
        };

        let mut data = Vec::new();
        self.drive(target.info_hash, vec![piece], std::slice::from_ref(first), |outcome| {
            data = outcome.data;
        })
        .await?;

        info!("Downloaded piece #{}", index);
        Ok(data)
    }

    /// Seed the work queue with `pieces`, start a worker per peer, and feed
    /// each verified piece to `sink` exactly once.
    async fn drive<F>(
        &self,
        info_hash: [u8; 20],
        pieces: Vec<PieceDescriptor>,
        peers: &[Peer],
        mut sink: F,
    ) -> Result<()>
    where
        F: FnMut(PieceOutcome),
    {
        let total = pieces.len();
        if total == 0 {
            return Ok(());
        }
        if peers.is_empty() {
            return Err(BittorrentError::NoPeers);
        }

        let slots: HashMap<u32, usize> = pieces
            .iter()
            .enumerate()
            .map(|(slot, piece)| (piece.index, slot))
            .collect();

        // Capacity covers every piece, so seeding and requeueing never wait.
        let (work_tx, work_rx) = async_channel::bounded(total);
        for piece in pieces {
            if let Err(e) = work_tx.try_send(PieceWork::new(piece)) {
                warn!("Could not queue piece #{}: {}", piece.index, e);
            }
        }

        let (result_tx, mut result_rx) = mpsc::channel(peers.len());
        for peer in peers {
            let worker = Worker::new(*peer, info_hash, self.config.clone());
            tokio::spawn(worker.run(work_rx.clone(), result_tx.clone()));
        }
        // Only workers hold senders: the channel closes once they all exit.
        drop(result_tx);
        drop(work_rx);

        let mut seen = vec![false; total];
        let mut completed = 0;
        let mut abandoned = 0;

        let result = loop {
            if completed == total {
                break Ok(());
            }

            match result_rx.recv().await {
                Some(WorkerEvent::Completed(outcome)) => {
                    let Some(&slot) = slots.get(&outcome.index) else {
                        warn!("Ignoring unrequested piece #{}", outcome.index);
                        continue;
                    };
                    if seen[slot] {
                        warn!("Ignoring duplicate piece #{}", outcome.index);
                        continue;
                    }
                    seen[slot] = true;
                    completed += 1;

                    let index = outcome.index;
                    sink(outcome);

                    let percent = completed as f64 / total as f64 * 100.0;
                    info!("({:.2}%) Downloaded piece #{}", percent, index);
                }
                Some(WorkerEvent::Failed(job)) => match self.config.retry {
                    RetryPolicy::Abandon => {
                        abandoned += 1;
                        warn!("Piece #{} abandoned", job.piece.index);
                        if completed + abandoned == total {
                            break Err(BittorrentError::DownloadStalled { completed, total });
                        }
                    }
                    RetryPolicy::Requeue { max_attempts } => {
                        let attempts = job.attempt + 1;
                        if attempts >= max_attempts {
                            break Err(BittorrentError::PieceUnreachable {
                                index: job.piece.index,
                                attempts,
                            });
                        }
                        info!("Requeueing piece #{} (attempt {})", job.piece.index, attempts + 1);
                        let retry = PieceWork {
                            piece: job.piece,
                            attempt: attempts,
                        };
                        if let Err(e) = work_tx.try_send(retry) {
                            warn!("Could not requeue piece #{}: {}", job.piece.index, e);
                        }
                    }
                },
                None => break Err(BittorrentError::DownloadStalled { completed, total }),
            }
        };

        // Idle workers see the closed queue and exit; busy ones finish
        // their current attempt first.
        work_tx.close();
        result
    }
}
