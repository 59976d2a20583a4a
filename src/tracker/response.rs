use super::Peer;
use crate::bencode::BencodeValue;
use crate::error::{BittorrentError, Result};

/// Decoded announce response
#[derive(Debug, Clone)]
pub struct TrackerResponse {
    /// Seconds the tracker asks us to wait before re-announcing
    pub interval: u64,
    pub peers: Vec<Peer>,
}

impl TrackerResponse {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(BittorrentError::TrackerError(
                "Response must be a dict".to_string(),
            ));
        }

        if let Some(failure) = value.get("failure reason") {
            let reason = failure.as_str().unwrap_or("Unknown failure").to_string();
            return Err(BittorrentError::TrackerError(reason));
        }

        let interval = value
            .get("interval")
            .and_then(|v| v.as_integer())
            .and_then(|i| u64::try_from(i).ok())
            .unwrap_or(0);

        let peers = match value.get("peers") {
            Some(BencodeValue::String(compact)) => Peer::from_compact_list(compact)?,
            Some(_) => {
                return Err(BittorrentError::TrackerError(
                    "Expected compact 'peers' string".to_string(),
                ))
            }
            None => {
                return Err(BittorrentError::TrackerError(
                    "Missing 'peers' field".to_string(),
                ))
            }
        };

        Ok(TrackerResponse { interval, peers })
    }
}
