use std::num::NonZeroUsize;
use std::time::Duration;

/// Identity announced to trackers and peers unless overridden.
pub const DEFAULT_PEER_ID: [u8; 20] = *b"-SG0001-k3v9q2x7m4wb";

pub const DEFAULT_LISTEN_PORT: u16 = 6881;

/// What a worker does with a piece it failed to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Drop the piece and stop the worker. A download whose pieces are
    /// all abandoned this way ends with `DownloadStalled`.
    Abandon,
    /// Put the piece back on the work queue for another worker. Once a
    /// piece has failed `max_attempts` times the whole download fails
    /// with `PieceUnreachable`.
    Requeue { max_attempts: u32 },
}

/// Settings shared by the tracker client and the download orchestrator.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub peer_id: [u8; 20],
    pub listen_port: u16,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Deadline for transferring one whole piece from a peer
    pub piece_timeout: Duration,
    pub tracker_timeout: Duration,
    /// Cap on outstanding block requests per peer; `None` requests the
    /// whole piece in one burst.
    pub max_in_flight: Option<NonZeroUsize>,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_id: DEFAULT_PEER_ID,
            listen_port: DEFAULT_LISTEN_PORT,
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            piece_timeout: Duration::from_secs(30),
            tracker_timeout: Duration::from_secs(10),
            max_in_flight: None,
            retry: RetryPolicy::Abandon,
        }
    }
}
