use crate::error::{BittorrentError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest frame body we accept; well above one block plus header, and
/// enough for the bitfield of any realistic torrent.
pub const MAX_FRAME_LEN: usize = 1 << 21;

/// Information about a block within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Zero-length frame. Carries nothing and must not advance any state.
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Bytes },
    Request { block: BlockInfo },
    Piece {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
    Cancel { block: BlockInfo },
    /// An identifier this client does not act on (e.g. DHT port)
    Unknown { id: u8, payload: Bytes },
}

impl PeerMessage {
    pub const CHOKE: u8 = 0;
    pub const UNCHOKE: u8 = 1;
    pub const INTERESTED: u8 = 2;
    pub const NOT_INTERESTED: u8 = 3;
    pub const HAVE: u8 = 4;
    pub const BITFIELD: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const PIECE: u8 = 7;
    pub const CANCEL: u8 = 8;

    /// Serialize as `<u32 length><id><payload>`
    pub fn to_bytes(&self) -> Bytes {
        let (id, payload) = match self {
            PeerMessage::KeepAlive => return Bytes::from_static(&[0, 0, 0, 0]),
            PeerMessage::Choke => (Self::CHOKE, Bytes::new()),
            PeerMessage::Unchoke => (Self::UNCHOKE, Bytes::new()),
            PeerMessage::Interested => (Self::INTERESTED, Bytes::new()),
            PeerMessage::NotInterested => (Self::NOT_INTERESTED, Bytes::new()),
            PeerMessage::Have { piece_index } => {
                (Self::HAVE, Bytes::copy_from_slice(&piece_index.to_be_bytes()))
            }
            PeerMessage::Bitfield { bitfield } => (Self::BITFIELD, bitfield.clone()),
            PeerMessage::Request { block } => (Self::REQUEST, block_payload(block)),
            PeerMessage::Cancel { block } => (Self::CANCEL, block_payload(block)),
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                let mut buf = BytesMut::with_capacity(8 + data.len());
                buf.put_u32(*piece_index);
                buf.put_u32(*offset);
                buf.put_slice(data);
                (Self::PIECE, buf.freeze())
            }
            PeerMessage::Unknown { id, payload } => (*id, payload.clone()),
        };
        encode_frame(id, &payload)
    }

    /// Parse a frame body (the bytes after the length prefix).
    pub fn decode(mut body: Bytes) -> Result<Self> {
        if body.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }

        let id = body.get_u8();

        let message = match id {
            Self::CHOKE => {
                expect_len(&body, 0, "choke")?;
                PeerMessage::Choke
            }
            Self::UNCHOKE => {
                expect_len(&body, 0, "unchoke")?;
                PeerMessage::Unchoke
            }
            Self::INTERESTED => {
                expect_len(&body, 0, "interested")?;
                PeerMessage::Interested
            }
            Self::NOT_INTERESTED => {
                expect_len(&body, 0, "not interested")?;
                PeerMessage::NotInterested
            }
            Self::HAVE => {
                expect_len(&body, 4, "have")?;
                PeerMessage::Have {
                    piece_index: body.get_u32(),
                }
            }
            Self::BITFIELD => PeerMessage::Bitfield { bitfield: body },
            Self::REQUEST => {
                expect_len(&body, 12, "request")?;
                PeerMessage::Request {
                    block: BlockInfo::new(body.get_u32(), body.get_u32(), body.get_u32()),
                }
            }
            Self::CANCEL => {
                expect_len(&body, 12, "cancel")?;
                PeerMessage::Cancel {
                    block: BlockInfo::new(body.get_u32(), body.get_u32(), body.get_u32()),
                }
            }
            Self::PIECE => {
                if body.len() < 8 {
                    return Err(BittorrentError::MalformedMessage(format!(
                        "piece payload of {} bytes is shorter than its header",
                        body.len()
                    )));
                }
                let piece_index = body.get_u32();
                let offset = body.get_u32();
                PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: body,
                }
            }
            id => PeerMessage::Unknown { id, payload: body },
        };

        Ok(message)
    }

    /// Copy the block carried by a `Piece` message into `buf`, the buffer
    /// of the piece currently being downloaded. Returns the number of
    /// bytes copied. `buf` is left untouched on error.
    pub fn copy_block_into(&self, expected_index: u32, buf: &mut [u8]) -> Result<usize> {
        let PeerMessage::Piece {
            piece_index,
            offset,
            data,
        } = self
        else {
            return Err(BittorrentError::MalformedMessage(format!(
                "expected a piece message, got {:?}",
                self
            )));
        };

        if *piece_index != expected_index {
            return Err(BittorrentError::UnexpectedPieceIndex {
                expected: expected_index,
                actual: *piece_index,
            });
        }

        let start = *offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end <= buf.len())
            .ok_or(BittorrentError::BlockOutOfRange {
                offset: start,
                length: data.len(),
                capacity: buf.len(),
            })?;

        buf[start..end].copy_from_slice(data);
        Ok(data.len())
    }
}

fn expect_len(body: &Bytes, len: usize, name: &str) -> Result<()> {
    if body.len() != len {
        return Err(BittorrentError::MalformedMessage(format!(
            "{} payload must be {} bytes, got {}",
            name,
            len,
            body.len()
        )));
    }
    Ok(())
}

fn block_payload(block: &BlockInfo) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u32(block.piece_index);
    buf.put_u32(block.offset);
    buf.put_u32(block.length);
    buf.freeze()
}

/// Frame `payload` under message identifier `id`.
pub fn encode_frame(id: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u32((1 + payload.len()) as u32);
    buf.put_u8(id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Read exactly one frame from `reader` and decode it.
///
/// A stream that ends cleanly on a frame boundary yields
/// `ConnectionClosed`; one that ends inside a frame is `MalformedMessage`.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<PeerMessage> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                BittorrentError::ConnectionClosed
            } else {
                BittorrentError::MalformedMessage(format!(
                    "length prefix truncated after {} bytes",
                    filled
                ))
            });
        }
        filled += n;
    }

    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_FRAME_LEN {
        return Err(BittorrentError::MalformedMessage(format!(
            "frame length {} exceeds limit of {}",
            length, MAX_FRAME_LEN
        )));
    }

    let mut body = BytesMut::zeroed(length);
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            BittorrentError::MalformedMessage(format!("frame truncated before {} bytes", length))
        } else {
            BittorrentError::IoError(e)
        }
    })?;

    PeerMessage::decode(body.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(bytes: &[u8]) -> Result<PeerMessage> {
        let mut reader = bytes;
        read_message(&mut reader).await
    }

    fn piece(piece_index: u32, offset: u32, data: &[u8]) -> PeerMessage {
        PeerMessage::Piece {
            piece_index,
            offset,
            data: Bytes::copy_from_slice(data),
        }
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let request = PeerMessage::Request {
            block: BlockInfo::new(3, 16384, 7232),
        };
        let bytes = request.to_bytes();
        assert_eq!(&bytes[..5], &[0, 0, 0, 13, PeerMessage::REQUEST]);
        assert_eq!(read_all(&bytes).await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_keep_alive_is_not_an_error() {
        assert_eq!(read_all(&[0, 0, 0, 0]).await.unwrap(), PeerMessage::KeepAlive);
    }

    #[tokio::test]
    async fn test_reads_exactly_one_frame() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&PeerMessage::Unchoke.to_bytes());
        stream.extend_from_slice(&PeerMessage::Have { piece_index: 9 }.to_bytes());

        let mut reader = &stream[..];
        assert_eq!(read_message(&mut reader).await.unwrap(), PeerMessage::Unchoke);
        assert_eq!(
            read_message(&mut reader).await.unwrap(),
            PeerMessage::Have { piece_index: 9 }
        );
        assert!(matches!(
            read_message(&mut reader).await,
            Err(BittorrentError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_truncated_frames_are_malformed() {
        assert!(matches!(
            read_all(&[0, 0]).await,
            Err(BittorrentError::MalformedMessage(_))
        ));
        assert!(matches!(
            read_all(&[0, 0, 0, 13, PeerMessage::REQUEST, 0, 0]).await,
            Err(BittorrentError::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_inconsistent_length_is_malformed() {
        // request id with a 4-byte payload
        let frame = encode_frame(PeerMessage::REQUEST, &[0, 0, 0, 1]);
        assert!(matches!(
            read_all(&frame).await,
            Err(BittorrentError::MalformedMessage(_))
        ));
        assert!(matches!(
            read_all(&[0xff, 0xff, 0xff, 0xff]).await,
            Err(BittorrentError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_unknown_id_is_preserved() {
        let frame = encode_frame(20, b"ext");
        let decoded = PeerMessage::decode(frame.slice(4..)).unwrap();
        assert_eq!(
            decoded,
            PeerMessage::Unknown {
                id: 20,
                payload: Bytes::from_static(b"ext")
            }
        );
    }

    #[test]
    fn test_copy_block_into() {
        let mut buf = vec![0u8; 8];
        let copied = piece(1, 2, b"abcd").copy_block_into(1, &mut buf).unwrap();
        assert_eq!(copied, 4);
        assert_eq!(&buf, b"\0\0abcd\0\0");
    }

    #[test]
    fn test_copy_block_wrong_index_leaves_buffer() {
        let mut buf = vec![7u8; 8];
        let err = piece(2, 0, b"abcd").copy_block_into(1, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            BittorrentError::UnexpectedPieceIndex {
                expected: 1,
                actual: 2
            }
        ));
        assert_eq!(buf, vec![7u8; 8]);
    }

    #[test]
    fn test_copy_block_out_of_range_leaves_buffer() {
        let mut buf = vec![7u8; 8];
        let err = piece(1, 6, b"abcd").copy_block_into(1, &mut buf).unwrap_err();
        assert!(matches!(err, BittorrentError::BlockOutOfRange { offset: 6, .. }));
        assert_eq!(buf, vec![7u8; 8]);

        let err = piece(1, u32::MAX, b"a").copy_block_into(1, &mut buf).unwrap_err();
        assert!(matches!(err, BittorrentError::BlockOutOfRange { .. }));
    }
}
