use std::collections::BTreeSet;
use bytes::Bytes;
use crate::{bitfield, Bitfield};

// Contains general information on file storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreInfo {

    // Length of the file in bytes.
    pub file_len: u64,

    // Length of pieces in bytes.
    pub piece_len: usize,

    // Length of the last piece, will be <= piece_len.
    pub last_piece_len: usize,

    // Number of pieces in the file.
    pub num_pieces: usize,

}

impl StoreInfo {

    pub fn new(file_len: u64, piece_len: usize) -> Self {
        debug_assert!(file_len > 0 && piece_len > 0, "empty file or piece");
        let num_pieces = ((file_len + piece_len as u64 - 1) / piece_len as u64) as usize;
        let last_piece_len = (file_len - piece_len as u64 * (num_pieces as u64 - 1)) as usize;
        Self {
            file_len,
            piece_len,
            last_piece_len,
            num_pieces,
        }
    }

    // Returns length of piece given its index.
    pub fn piece_length(&self, idx: usize) -> usize {
        if idx + 1 == self.num_pieces {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    pub fn piece_byte_offset(&self, idx: usize) -> u64 {
        idx as u64 * self.piece_len as u64
    }

    // Largest length prefix a well-behaved peer can send: a full piece or bitfield.
    pub fn max_frame_len(&self) -> usize {
        self.piece_len.max(bitfield::wire_len(self.num_pieces)) + 5
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {

    #[error("piece {idx} has {actual} bytes, expected {expected}")]
    PieceSizeMismatch { idx: usize, expected: usize, actual: usize },

    #[error("piece index {0} out of range")]
    InvalidIndex(usize),

}

// Outcome of applying a received piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    New,
    Duplicate,
}

// Pieces held locally. Bit `i` is set iff `pieces[i]` holds validated data.
#[derive(Debug)]
pub struct PieceStore {
    info: StoreInfo,
    bitfield: Bitfield,
    pieces: Vec<Option<Bytes>>,
}

impl PieceStore {

    pub fn new(info: StoreInfo) -> Self {
        Self {
            info,
            bitfield: Bitfield::repeat(false, info.num_pieces),
            pieces: vec![None; info.num_pieces],
        }
    }

    // Store holding the whole file.
    pub fn full(info: StoreInfo, data: Bytes) -> Result<Self, StoreError> {
        let mut store = Self::new(info);
        for idx in 0..info.num_pieces {
            let start = info.piece_byte_offset(idx) as usize;
            let end = (start + info.piece_length(idx)).min(data.len());
            store.apply(idx, data.slice(start.min(end)..end))?;
        }
        Ok(store)
    }

    pub fn has(&self, idx: usize) -> bool {
        self.bitfield.get(idx).map_or(false, |bit| *bit)
    }

    pub fn missing(&self) -> BTreeSet<usize> {
        self.bitfield.iter_zeros().collect()
    }

    // Never replaces content already held.
    pub fn apply(&mut self, idx: usize, data: Bytes) -> Result<Applied, StoreError> {
        if idx >= self.info.num_pieces {
            return Err(StoreError::InvalidIndex(idx));
        }
        let expected = self.info.piece_length(idx);
        if data.len() != expected {
            return Err(StoreError::PieceSizeMismatch { idx, expected, actual: data.len() });
        }
        if self.bitfield[idx] {
            return Ok(Applied::Duplicate);
        }
        self.pieces[idx] = Some(data);
        self.bitfield.set(idx, true);
        Ok(Applied::New)
    }

    pub fn piece(&self, idx: usize) -> Option<Bytes> {
        self.pieces.get(idx)?.clone()
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn num_have(&self) -> usize {
        self.bitfield.count_ones()
    }

    pub fn is_complete(&self) -> bool {
        self.bitfield.all()
    }

}
