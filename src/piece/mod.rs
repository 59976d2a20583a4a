mod download;

pub use download::{download_piece, verify_piece, DownloadState};

/// Largest block we request (16 KiB)
pub const BLOCK_SIZE: usize = 16 * 1024;

/// One piece of the content: what to fetch and what it must hash to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceDescriptor {
    pub index: u32,
    pub hash: [u8; 20],
    pub length: usize,
}

/// A piece that passed verification, ready to be placed in the output.
#[derive(Debug)]
pub struct PieceOutcome {
    pub index: u32,
    pub data: Vec<u8>,
}

/// How the content splits into fixed-size pieces, the last possibly shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    piece_length: usize,
    total_length: usize,
}

impl PieceLayout {
    pub fn new(piece_length: usize, total_length: usize) -> Self {
        assert!(piece_length > 0, "piece length must be positive");
        Self {
            piece_length,
            total_length,
        }
    }

    pub fn total_length(&self) -> usize {
        self.total_length
    }

    pub fn num_pieces(&self) -> usize {
        self.total_length.div_ceil(self.piece_length)
    }

    /// Byte range `[begin, end)` of piece `index` within the content
    pub fn bounds(&self, index: usize) -> (usize, usize) {
        let begin = index * self.piece_length;
        let end = (begin + self.piece_length).min(self.total_length);
        (begin, end)
    }

    pub fn piece_size(&self, index: usize) -> usize {
        let (begin, end) = self.bounds(index);
        end - begin
    }

    /// Pair every piece hash with its index and length.
    pub fn descriptors(&self, hashes: &[[u8; 20]]) -> Vec<PieceDescriptor> {
        hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| PieceDescriptor {
                index: index as u32,
                hash: *hash,
                length: self.piece_size(index),
            })
            .collect()
    }
}
