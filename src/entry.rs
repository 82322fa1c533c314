//! Opaque log entries and their bundle (on-disk) representation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::hash::{self, NodeHash};
use crate::layout::ENTRY_BUNDLE_WIDTH;

/// A client-submitted, opaque byte payload. Entries are immutable once
/// admitted; they are never referred to except by the index the sequencer
/// assigns them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    data: Bytes,
}

impl Entry {
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn leaf_hash(&self) -> NodeHash {
        hash::leaf_hash(&self.data)
    }

    /// Serializes the entry into its bundle representation: an unsigned
    /// LEB128 length prefix followed by the raw payload. `index` is accepted
    /// for interface parity with adapters that need to log or audit which
    /// leaf an encoding corresponds to; the wire encoding itself does not
    /// depend on it.
    #[must_use]
    pub fn marshal_bundle_data(&self, _index: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 5);
        write_uvarint(&mut buf, self.data.len() as u64);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// An ordered group of up to `ENTRY_BUNDLE_WIDTH` contiguous entries, as
/// written to and read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryBundle {
    pub tile_index: u64,
    pub entries: Vec<Entry>,
    /// Raw concatenated wire bytes; kept alongside `entries` so a partially
    /// written bundle can be extended by simple byte-append.
    data: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BundleError {
    #[error("bundle would exceed {ENTRY_BUNDLE_WIDTH} entries")]
    TooWide,
    #[error("malformed bundle bytes: {0}")]
    Malformed(&'static str),
}

impl EntryBundle {
    #[must_use]
    pub fn empty(tile_index: u64) -> Self {
        Self {
            tile_index,
            entries: Vec::new(),
            data: Bytes::new(),
        }
    }

    /// Number of entries currently in the bundle (1..=256 once non-empty).
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.entries.len() as u64 == ENTRY_BUNDLE_WIDTH
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Appends entries, base leaf index being `tile_index * ENTRY_BUNDLE_WIDTH
    /// + size()`. Fails if the bundle would grow past `ENTRY_BUNDLE_WIDTH`.
    pub fn append(&mut self, entries: &[Entry]) -> Result<(), BundleError> {
        if self.entries.len() + entries.len() > ENTRY_BUNDLE_WIDTH as usize {
            return Err(BundleError::TooWide);
        }
        let mut buf = BytesMut::from(&self.data[..]);
        let base_index = self.tile_index * ENTRY_BUNDLE_WIDTH + self.entries.len() as u64;
        for (i, e) in entries.iter().enumerate() {
            buf.extend_from_slice(&e.marshal_bundle_data(base_index + i as u64));
        }
        self.data = buf.freeze();
        self.entries.extend_from_slice(entries);
        Ok(())
    }

    /// Parses a full bundle byte string back into entries (used by storage
    /// adapters and the antispam follower's `BundleHasher`).
    pub fn parse(tile_index: u64, bytes: Bytes) -> Result<Self, BundleError> {
        let mut entries = Vec::new();
        let mut cursor = bytes.clone();
        while cursor.has_remaining() {
            let len = read_uvarint(&mut cursor)
                .ok_or(BundleError::Malformed("truncated length prefix"))?;
            let len = len as usize;
            if cursor.remaining() < len {
                return Err(BundleError::Malformed("truncated entry payload"));
            }
            let payload = cursor.copy_to_bytes(len);
            entries.push(Entry::new(payload));
        }
        if entries.len() as u64 > ENTRY_BUNDLE_WIDTH {
            return Err(BundleError::TooWide);
        }
        Ok(Self {
            tile_index,
            entries,
            data: bytes,
        })
    }

    /// Leaf hashes of every entry in the bundle, in order — the
    /// `BundleHasher` contract the antispam follower depends on.
    #[must_use]
    pub fn leaf_hashes(&self) -> Vec<NodeHash> {
        self.entries.iter().map(Entry::leaf_hash).collect()
    }
}

fn write_uvarint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_uvarint(buf: &mut Bytes) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        if !buf.has_remaining() || shift >= 64 {
            return None;
        }
        let byte = buf.get_u8();
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
    }
}
