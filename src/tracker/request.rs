use crate::error::Result;
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use reqwest::Url;

/// Parameters of an HTTP announce
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Bytes still needed; nothing is on disk at startup so this is the full length
    pub left: u64,
}

impl TrackerRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
        }
    }

    /// Build the announce URL. The hash and id are raw bytes, so they are
    /// percent-encoded here rather than through `Url`'s string encoding.
    pub fn announce_url(&self, announce: &str) -> Result<Url> {
        let mut url = Url::parse(announce)?;

        let params = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            percent_encode(&self.info_hash, NON_ALPHANUMERIC),
            percent_encode(&self.peer_id, NON_ALPHANUMERIC),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        );

        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, params),
            _ => params,
        };
        url.set_query(Some(&query));

        Ok(url)
    }
}
