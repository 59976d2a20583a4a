mod client;
mod peer;
mod request;
mod response;

pub use client::TrackerClient;
pub use peer::Peer;
pub use request::TrackerRequest;
pub use response::TrackerResponse;

use crate::client::ClientConfig;
use crate::error::Result;
use crate::torrent::Metainfo;

/// Ask the torrent's tracker for peers, identifying as `config`.
pub async fn discover_peers(metainfo: &Metainfo, config: &ClientConfig) -> Result<Vec<Peer>> {
    let client = TrackerClient::new(config.tracker_timeout)?;
    let request = TrackerRequest::new(
        metainfo.info_hash,
        config.peer_id,
        config.listen_port,
        metainfo.info.length,
    );
    Ok(client.announce(&metainfo.announce, &request).await?.peers)
}
