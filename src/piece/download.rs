use super::{PieceDescriptor, BLOCK_SIZE};
use crate::error::{BittorrentError, Result};
use crate::peer::{PeerConnection, PeerMessage};
use sha1::{Digest, Sha1};
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Progress of one attempt at one piece. Owned by a single worker and
/// thrown away when the attempt ends, whatever the outcome.
#[derive(Debug)]
pub struct DownloadState {
    index: u32,
    buf: Vec<u8>,
    downloaded: usize,
    requested: usize,
    /// Requests sent but not yet answered
    backlog: usize,
}

impl DownloadState {
    pub fn new(piece: &PieceDescriptor) -> Self {
        Self {
            index: piece.index,
            buf: vec![0u8; piece.length],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    #[cfg(test)]
    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    #[cfg(test)]
    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.buf.len()
    }

    fn window_open(&self, max_in_flight: Option<NonZeroUsize>) -> bool {
        max_in_flight.map_or(true, |max| self.backlog < max.get())
    }

    /// Request blocks while unchoked and either read one message or stop
    /// once every byte has arrived.
    async fn run<S>(&mut self, conn: &mut PeerConnection<S>, max_in_flight: Option<NonZeroUsize>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let length = self.buf.len();

        while !self.is_complete() {
            if !conn.is_choked() {
                while self.requested < length && self.window_open(max_in_flight) {
                    let block = BLOCK_SIZE.min(length - self.requested);
                    conn.send_request(self.index, self.requested as u32, block as u32)
                        .await?;
                    self.requested += block;
                    self.backlog += 1;
                }
            }

            self.handle_message(conn.receive_message().await?)?;
        }

        Ok(())
    }

    /// Choke state lives on the connection; only blocks move progress.
    fn handle_message(&mut self, message: PeerMessage) -> Result<()> {
        if let PeerMessage::Piece { .. } = message {
            let copied = message.copy_block_into(self.index, &mut self.buf)?;
            self.downloaded += copied;
            self.backlog = self.backlog.saturating_sub(1);
            debug!(
                "Piece {}: {}/{} bytes",
                self.index,
                self.downloaded,
                self.buf.len()
            );
        }
        Ok(())
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}

/// Fetch every block of `piece` over `conn` within `deadline`.
///
/// With `max_in_flight` unset the whole piece is requested in one burst
/// as soon as the peer unchokes us. The result is unverified.
pub async fn download_piece<S>(
    conn: &mut PeerConnection<S>,
    piece: &PieceDescriptor,
    max_in_flight: Option<NonZeroUsize>,
    deadline: Duration,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = DownloadState::new(piece);

    timeout(deadline, state.run(conn, max_in_flight))
        .await
        .map_err(|_| BittorrentError::Timeout(deadline))??;

    Ok(state.into_buffer())
}

/// Check a downloaded piece against its expected SHA-1.
pub fn verify_piece(piece: &PieceDescriptor, data: &[u8]) -> Result<()> {
    let hash = Sha1::digest(data);
    if hash.as_slice() != piece.hash {
        warn!("Piece {} failed verification", piece.index);
        return Err(BittorrentError::IntegrityCheckFailed { index: piece.index });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Handshake;
    use bytes::Bytes;
    use tokio_test::io::{Builder, Mock};

    const INFO_HASH: [u8; 20] = [5u8; 20];
    const PEER_ID: [u8; 20] = [6u8; 20];

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn descriptor(index: u32, data: &[u8]) -> PieceDescriptor {
        PieceDescriptor {
            index,
            hash: Sha1::digest(data).into(),
            length: data.len(),
        }
    }

    fn request(index: u32, offset: usize, length: usize) -> Bytes {
        PeerMessage::Request {
            block: crate::peer::BlockInfo::new(index, offset as u32, length as u32),
        }
        .to_bytes()
    }

    fn block(index: u32, data: &[u8], offset: usize, length: usize) -> Bytes {
        PeerMessage::Piece {
            piece_index: index,
            offset: offset as u32,
            data: Bytes::copy_from_slice(&data[offset..offset + length]),
        }
        .to_bytes()
    }

    /// A mock stream that has already completed the handshake script.
    fn handshaken() -> Builder {
        let mut builder = Builder::new();
        builder
            .write(&Handshake::new(INFO_HASH, PEER_ID).to_bytes())
            .read(&Handshake::new(INFO_HASH, [9u8; 20]).to_bytes());
        builder
    }

    async fn connect(mock: Mock) -> PeerConnection<Mock> {
        PeerConnection::handshake(
            mock,
            "127.0.0.1:6881".parse().unwrap(),
            INFO_HASH,
            PEER_ID,
            Duration::from_secs(1),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_two_block_piece_in_one_burst() {
        let data = content(32768);
        let piece = descriptor(0, &data);

        let mock = handshaken()
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(0, 0, 16384))
            .write(&request(0, 16384, 16384))
            .read(&block(0, &data, 0, 16384))
            .read(&block(0, &data, 16384, 16384))
            .build();
        let mut conn = connect(mock).await;

        let buf = download_piece(&mut conn, &piece, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(buf.len(), 32768);
        verify_piece(&piece, &buf).unwrap();
    }

    #[tokio::test]
    async fn test_last_block_is_truncated() {
        let data = content(7232);
        let piece = descriptor(2, &data);

        let mock = handshaken()
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(2, 0, 7232))
            .read(&block(2, &data, 0, 7232))
            .build();
        let mut conn = connect(mock).await;

        let buf = download_piece(&mut conn, &piece, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(buf, data);
    }

    #[tokio::test]
    async fn test_blocks_may_arrive_out_of_order() {
        let data = content(40000);
        let piece = descriptor(1, &data);

        let mock = handshaken()
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(1, 0, 16384))
            .write(&request(1, 16384, 16384))
            .write(&request(1, 32768, 7232))
            .read(&block(1, &data, 32768, 7232))
            .read(&block(1, &data, 0, 16384))
            .read(&block(1, &data, 16384, 16384))
            .build();
        let mut conn = connect(mock).await;

        let buf = download_piece(&mut conn, &piece, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(buf, data);
    }

    /// Run one attempt against a peer that stops answering, returning the
    /// state it reached before the deadline.
    async fn run_until_stalled(mock: Mock, piece: &PieceDescriptor, max_in_flight: Option<NonZeroUsize>) -> DownloadState {
        let mut conn = connect(mock).await;
        let mut state = DownloadState::new(piece);
        let result = timeout(Duration::from_millis(100), state.run(&mut conn, max_in_flight)).await;
        assert!(result.is_err(), "attempt should still be waiting on the peer");
        state
    }

    #[tokio::test]
    async fn test_burst_requests_whole_piece() {
        let piece = descriptor(0, &content(40000));
        let mock = handshaken()
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(0, 0, 16384))
            .write(&request(0, 16384, 16384))
            .write(&request(0, 32768, 7232))
            .wait(Duration::from_secs(30))
            .build();

        let state = run_until_stalled(mock, &piece, None).await;
        assert_eq!(state.requested(), 40000);
        assert_eq!(state.downloaded(), 0);
    }

    #[tokio::test]
    async fn test_window_limits_outstanding_requests() {
        let piece = descriptor(0, &content(40000));
        let mock = handshaken()
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(0, 0, 16384))
            .write(&request(0, 16384, 16384))
            .wait(Duration::from_secs(30))
            .build();

        let state = run_until_stalled(mock, &piece, NonZeroUsize::new(2)).await;
        assert_eq!(state.requested(), 32768);
    }

    #[tokio::test]
    async fn test_window_refills_as_blocks_arrive() {
        let data = content(40000);
        let piece = descriptor(0, &data);

        let mock = handshaken()
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(0, 0, 16384))
            .read(&block(0, &data, 0, 16384))
            .write(&request(0, 16384, 16384))
            .read(&block(0, &data, 16384, 16384))
            .write(&request(0, 32768, 7232))
            .read(&block(0, &data, 32768, 7232))
            .build();
        let mut conn = connect(mock).await;

        let buf = download_piece(&mut conn, &piece, NonZeroUsize::new(1), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(buf, data);
    }

    #[tokio::test]
    async fn test_keep_alive_does_not_advance_progress() {
        let data = content(16384);
        let piece = descriptor(0, &data);

        let mock = handshaken()
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(0, 0, 16384))
            .read(&PeerMessage::KeepAlive.to_bytes())
            .read(&PeerMessage::Have { piece_index: 3 }.to_bytes())
            .read(&block(0, &data, 0, 16384))
            .build();
        let mut conn = connect(mock).await;

        let mut state = DownloadState::new(&piece);
        state.run(&mut conn, None).await.unwrap();
        assert_eq!(state.downloaded(), 16384);
        assert_eq!(state.into_buffer(), data);
    }

    #[test]
    fn test_keep_alive_leaves_state_untouched() {
        let piece = descriptor(0, &content(100));
        let mut state = DownloadState::new(&piece);

        state.handle_message(PeerMessage::KeepAlive).unwrap();
        assert_eq!(state.downloaded(), 0);
        assert!(!state.is_complete());
    }

    #[tokio::test]
    async fn test_no_requests_while_choked() {
        let piece = descriptor(0, &content(16384));
        let mock = handshaken()
            .read(&PeerMessage::Bitfield { bitfield: Bytes::from_static(&[0x80]) }.to_bytes())
            .read(&PeerMessage::KeepAlive.to_bytes())
            .wait(Duration::from_secs(30))
            .build();

        let state = run_until_stalled(mock, &piece, None).await;
        assert_eq!(state.requested(), 0);
        assert_eq!(state.downloaded(), 0);
    }

    #[tokio::test]
    async fn test_attempt_times_out_while_choked() {
        let piece = descriptor(0, &content(16384));
        let mock = handshaken().wait(Duration::from_secs(30)).build();
        let mut conn = connect(mock).await;

        let err = download_piece(&mut conn, &piece, None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BittorrentError::Timeout(_)));
        assert!(conn.is_choked());
    }

    #[tokio::test]
    async fn test_requests_resume_after_unchoke() {
        let data = content(16384);
        let piece = descriptor(0, &data);

        let mock = handshaken()
            .read(&PeerMessage::KeepAlive.to_bytes())
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(0, 0, 16384))
            .read(&block(0, &data, 0, 16384))
            .build();
        let mut conn = connect(mock).await;

        let buf = download_piece(&mut conn, &piece, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(buf, data);
    }

    #[tokio::test]
    async fn test_wrong_piece_index_fails_attempt() {
        let data = content(16384);
        let piece = descriptor(0, &data);

        let mock = handshaken()
            .read(&PeerMessage::Unchoke.to_bytes())
            .write(&request(0, 0, 16384))
            .read(&block(4, &data, 0, 16384))
            .build();
        let mut conn = connect(mock).await;

        let err = download_piece(&mut conn, &piece, None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BittorrentError::UnexpectedPieceIndex { expected: 0, actual: 4 }));
    }

    #[test]
    fn test_verify_rejects_corrupt_piece() {
        let data = content(1000);
        let piece = descriptor(3, &data);
        let mut corrupt = data.clone();
        corrupt[10] ^= 0xff;

        assert!(verify_piece(&piece, &data).is_ok());
        assert!(matches!(
            verify_piece(&piece, &corrupt),
            Err(BittorrentError::IntegrityCheckFailed { index: 3 })
        ));
    }
}
