use crate::bencode;
use crate::client::{ClientConfig, DownloadTarget, RetryPolicy, TorrentClient, DEFAULT_LISTEN_PORT};
use crate::error::{BittorrentError, Result};
use crate::peer::PeerConnection;
use crate::torrent::{load_torrent_file, Metainfo};
use crate::tracker::discover_peers;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

#[derive(Parser)]
#[command(name = "swarmget")]
#[command(about = "Download torrents from a peer swarm", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a bencoded value and print it as JSON
    Decode {
        value: String,
    },

    /// Show information about a torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// List the peers the tracker returns
    Peers {
        torrent: PathBuf,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Handshake with one peer and print its peer id
    Handshake {
        torrent: PathBuf,

        /// Peer address as ip:port
        peer: SocketAddr,
    },

    /// Download a single piece
    #[command(name = "download_piece")]
    DownloadPiece {
        /// Where to write the piece
        #[arg(short, long)]
        output: PathBuf,

        torrent: PathBuf,

        index: usize,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Download the whole file
    Download {
        /// Where to write the file
        #[arg(short, long)]
        output: PathBuf,

        torrent: PathBuf,

        #[command(flatten)]
        transfer: TransferArgs,
    },
}

#[derive(Args)]
struct TransferArgs {
    /// Port announced to the tracker
    #[arg(short, long, default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,

    /// Maximum outstanding block requests per peer, at least 1 (default: whole piece at once)
    #[arg(long)]
    window: Option<NonZeroUsize>,

    /// Retry failed pieces on other peers, giving up after this many attempts
    #[arg(long)]
    max_attempts: Option<u32>,
}

impl TransferArgs {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            listen_port: self.port,
            max_in_flight: self.window,
            retry: match self.max_attempts {
                Some(max_attempts) => RetryPolicy::Requeue { max_attempts },
                None => RetryPolicy::Abandon,
            },
            ..ClientConfig::default()
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Decode { value } => {
                let decoded = bencode::decode(value.as_bytes())?;
                let json = serde_json::to_string(&decoded)
                    .map_err(|e| BittorrentError::BencodeError(e.to_string()))?;
                println!("{}", json);
            }

            Commands::Info { torrent } => {
                let metainfo = load_torrent_file(torrent).await?;
                show_torrent_info(&metainfo);
            }

            Commands::Peers { torrent, transfer } => {
                let metainfo = load_torrent_file(torrent).await?;
                for peer in discover_peers(&metainfo, &transfer.config()).await? {
                    println!("{}", peer);
                }
            }

            Commands::Handshake { torrent, peer } => {
                let metainfo = load_torrent_file(torrent).await?;
                let conn = PeerConnection::connect(*peer, metainfo.info_hash, &ClientConfig::default()).await?;
                println!("Peer ID: {}", hex::encode(conn.remote_peer_id()));
            }

            Commands::DownloadPiece {
                output,
                torrent,
                index,
                transfer,
            } => {
                let config = transfer.config();
                let metainfo = load_torrent_file(torrent).await?;
                let peers = discover_peers(&metainfo, &config).await?;

                let client = TorrentClient::new(config);
                let data = client
                    .download_piece(&DownloadTarget::from(&metainfo), *index, &peers)
                    .await?;
                write_output(output, &data).await?;
            }

            Commands::Download {
                output,
                torrent,
                transfer,
            } => {
                let config = transfer.config();
                let metainfo = load_torrent_file(torrent).await?;
                let peers = discover_peers(&metainfo, &config).await?;

                let client = TorrentClient::new(config);
                let data = client
                    .download_file(&DownloadTarget::from(&metainfo), &peers)
                    .await?;
                write_output(output, &data).await?;
            }
        }

        Ok(())
    }
}

fn show_torrent_info(metainfo: &Metainfo) {
    println!("Tracker URL: {}", metainfo.announce);
    println!("Length: {}", metainfo.info.length);
    println!("Info Hash: {}", metainfo.info_hash_hex());
    println!("Piece Length: {}", metainfo.info.piece_length);
    println!("Piece Hashes:");
    for hash in &metainfo.info.pieces {
        println!("{}", hex::encode(hash));
    }

    if metainfo.info.files.len() > 1 {
        println!("Files:");
        for file in &metainfo.info.files {
            println!("  {} ({} bytes)", file.path.join("/"), file.length);
        }
    }
}

async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).await?;
    info!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_download_piece() {
        let cli = Cli::try_parse_from([
            "swarmget",
            "download_piece",
            "-o",
            "/tmp/piece-0",
            "sample.torrent",
            "0",
            "--window",
            "5",
        ])
        .unwrap();

        let Commands::DownloadPiece {
            output,
            index,
            transfer,
            ..
        } = cli.command
        else {
            panic!("wrong subcommand");
        };
        assert_eq!(output, PathBuf::from("/tmp/piece-0"));
        assert_eq!(index, 0);

        let config = transfer.config();
        assert_eq!(config.max_in_flight.map(NonZeroUsize::get), Some(5));
        assert_eq!(config.retry, RetryPolicy::Abandon);
        assert_eq!(config.listen_port, 6881);
    }

    #[test]
    fn test_max_attempts_enables_requeue() {
        let cli = Cli::try_parse_from([
            "swarmget",
            "download",
            "--output",
            "out.bin",
            "sample.torrent",
            "--max-attempts",
            "4",
            "--port",
            "7000",
        ])
        .unwrap();

        let Commands::Download { transfer, .. } = cli.command else {
            panic!("wrong subcommand");
        };
        let config = transfer.config();
        assert_eq!(config.retry, RetryPolicy::Requeue { max_attempts: 4 });
        assert_eq!(config.listen_port, 7000);
        assert_eq!(config.max_in_flight, None);
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let result = Cli::try_parse_from([
            "swarmget",
            "download",
            "-o",
            "out.bin",
            "sample.torrent",
            "--window",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_handshake_requires_socket_address() {
        assert!(Cli::try_parse_from(["swarmget", "handshake", "a.torrent", "not-an-addr"]).is_err());
        assert!(Cli::try_parse_from(["swarmget", "handshake", "a.torrent", "10.0.0.1:6881"]).is_ok());
    }
}
