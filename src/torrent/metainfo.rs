use crate::bencode::{decode_prefix, BencodeValue};
use crate::error::{BittorrentError, Result};
use sha1::{Digest, Sha1};

/// A file entry; single-file torrents have exactly one.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: Vec<String>,
    pub length: u64,
}

/// The `info` dictionary of a torrent.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    pub name: String,
    pub piece_length: u64,
    /// SHA-1 digest of every piece, in piece order
    pub pieces: Vec<[u8; 20]>,
    pub files: Vec<FileInfo>,
    /// Total content length across all files
    pub length: u64,
}

fn missing(field: &str) -> BittorrentError {
    BittorrentError::InvalidTorrent(format!("Missing or invalid '{}' field", field))
}

fn non_negative(value: &BencodeValue, field: &str) -> Result<u64> {
    value
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| missing(field))
}

impl TorrentInfo {
    fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("name"))?
            .to_string();

        let piece_length = value
            .get("piece length")
            .ok_or_else(|| missing("piece length"))
            .and_then(|v| non_negative(v, "piece length"))?;
        if piece_length == 0 {
            return Err(BittorrentError::InvalidTorrent(
                "Piece length must be positive".to_string(),
            ));
        }

        let raw_pieces = value
            .get("pieces")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| missing("pieces"))?;
        if raw_pieces.len() % 20 != 0 {
            return Err(BittorrentError::InvalidTorrent(
                "Pieces length must be multiple of 20".to_string(),
            ));
        }
        let pieces = raw_pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect::<Vec<_>>();

        let files = match (value.get("length"), value.get("files")) {
            (Some(length), _) => vec![FileInfo {
                path: vec![name.clone()],
                length: non_negative(length, "length")?,
            }],
            (None, Some(BencodeValue::List(entries))) => entries
                .iter()
                .map(|entry| {
                    let length = entry
                        .get("length")
                        .ok_or_else(|| missing("files.length"))
                        .and_then(|v| non_negative(v, "files.length"))?;
                    let path = entry
                        .get("path")
                        .and_then(|v| v.as_list())
                        .ok_or_else(|| missing("files.path"))?
                        .iter()
                        .map(|part| {
                            part.as_str()
                                .map(String::from)
                                .ok_or_else(|| missing("files.path"))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Ok(FileInfo { path, length })
                })
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(missing("length")),
        };
        let length = files.iter().map(|f| f.length).sum::<u64>();

        let expected = length.div_ceil(piece_length);
        if expected != pieces.len() as u64 {
            return Err(BittorrentError::InvalidTorrent(format!(
                "{} bytes at piece length {} need {} hashes, found {}",
                length,
                piece_length,
                expected,
                pieces.len()
            )));
        }

        Ok(TorrentInfo {
            name,
            piece_length,
            pieces,
            files,
            length,
        })
    }
}

/// Parsed contents of a .torrent file.
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: String,
    pub info: TorrentInfo,
    /// SHA-1 of the raw bencoded info dictionary
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (value, _) = decode_prefix(data)?;

        let announce = value
            .get("announce")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("announce"))?
            .to_string();

        let info_value = value.get("info").ok_or_else(|| missing("info"))?;
        let info = TorrentInfo::from_bencode(info_value)?;

        // Hash the bytes as they appear in the file, not a re-encoding.
        let raw_info = raw_dict_entry(data, b"info")?;
        let info_hash: [u8; 20] = Sha1::digest(raw_info).into();

        Ok(Metainfo {
            announce,
            info,
            info_hash,
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}

/// Locate the raw encoded bytes of `key`'s value in a top-level dictionary.
fn raw_dict_entry<'a>(data: &'a [u8], key: &[u8]) -> Result<&'a [u8]> {
    if data.first() != Some(&b'd') {
        return Err(BittorrentError::InvalidTorrent(
            "Torrent must be a dict".to_string(),
        ));
    }

    let mut pos = 1;
    while pos < data.len() && data[pos] != b'e' {
        let (entry_key, key_len) = decode_prefix(&data[pos..])?;
        pos += key_len;
        let (_, value_len) = decode_prefix(&data[pos..])?;
        if entry_key.as_bytes() == Some(key) {
            return Ok(&data[pos..pos + value_len]);
        }
        pos += value_len;
    }

    Err(missing(&String::from_utf8_lossy(key)))
}
