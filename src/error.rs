use thiserror::Error;

#[derive(Error, Debug)]
pub enum BittorrentError {
    #[error("Bencode parsing error: {0}")]
    BencodeError(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    TrackerError(String),

    #[error("Peer connection error: {0}")]
    PeerError(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Expected piece index {expected}, got {actual}")]
    UnexpectedPieceIndex { expected: u32, actual: u32 },

    #[error("Block at offset {offset} with {length} bytes exceeds piece buffer of {capacity} bytes")]
    BlockOutOfRange {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    #[error("Handshake protocol name length must not be zero")]
    EmptyProtocolName,

    #[error("Info hash mismatch: expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    InfoHashMismatch {
        expected: [u8; 20],
        actual: [u8; 20],
    },

    #[error("Piece {index} failed integrity check")]
    IntegrityCheckFailed { index: u32 },

    #[error("Piece {index} could not be downloaded after {attempts} attempts")]
    PieceUnreachable { index: u32, attempts: u32 },

    #[error("Download stalled: all peers exited with {completed}/{total} pieces done")]
    DownloadStalled { completed: usize, total: usize },

    #[error("Piece index {index} out of range (torrent has {count} pieces)")]
    InvalidPieceIndex { index: usize, count: usize },

    #[error("Tracker returned no peers")]
    NoPeers,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(String),
}

impl From<url::ParseError> for BittorrentError {
    fn from(err: url::ParseError) -> Self {
        BittorrentError::UrlParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BittorrentError>;
