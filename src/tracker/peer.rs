use crate::error::{BittorrentError, Result};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Bytes per entry in a compact peer list: 4 for IPv4, 2 for the port
pub const COMPACT_PEER_LEN: usize = 6;

/// A peer endpoint handed out by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: SocketAddr,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
        }
    }

    fn from_compact(entry: &[u8]) -> Self {
        let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
        let port = u16::from_be_bytes([entry[4], entry[5]]);
        Self::new(IpAddr::V4(ip), port)
    }

    /// Parse the compact encoding, rejecting a trailing partial entry.
    pub fn from_compact_list(data: &[u8]) -> Result<Vec<Self>> {
        if data.len() % COMPACT_PEER_LEN != 0 {
            return Err(BittorrentError::TrackerError(format!(
                "Compact peer list of {} bytes is not a multiple of {}",
                data.len(),
                COMPACT_PEER_LEN
            )));
        }

        Ok(data
            .chunks_exact(COMPACT_PEER_LEN)
            .map(Self::from_compact)
            .collect())
    }
}

impl From<SocketAddr> for Peer {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}
