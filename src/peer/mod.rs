mod connection;
mod handshake;
mod message;

pub use connection::PeerConnection;
pub use handshake::Handshake;
pub use message::{read_message, BlockInfo, PeerMessage};
