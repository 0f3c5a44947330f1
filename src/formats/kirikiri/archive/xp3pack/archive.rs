use crate::formats::kirikiri::archive::crypt::{CryptRef, no_crypt};
use crate::types::EntryInfo;

/// Represents a single data segment for a file.
/// A file can be split into multiple segments, which can be compressed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub is_compressed: bool,
    /// The offset of the segment's data within the archive file.
    pub offset: u64,
    /// The size of the segment after decompression.
    pub size: u32,
    /// The size of the segment in the archive (potentially compressed).
    pub packed_size: u32,
}

/// Represents a single file entry within the XP3 archive.
#[derive(Debug, Clone)]
pub struct ArchiveItem {
    pub name: String,
    pub is_packed: bool,
    pub is_encrypted: bool,
    pub unpacked_size: u32,
    pub packed_size: u32,
    /// Adler-32 of the stored content. Several ciphers use it as key material.
    pub hash: u32,
    pub segments: Vec<Segment>,
    pub crypt: CryptRef,
}

impl ArchiveItem {
    /// Create an empty, unencrypted item.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_packed: false,
            is_encrypted: false,
            unpacked_size: 0,
            packed_size: 0,
            hash: 0,
            segments: Vec::new(),
            crypt: no_crypt(),
        }
    }

    /// Offset of the first segment.
    pub fn offset(&self) -> u64 {
        self.segments.first().map(|s| s.offset).unwrap_or(0)
    }

    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            name: self.name.clone(),
            size: self.unpacked_size as u64,
            packed_size: self.packed_size as u64,
            encrypted: self.is_encrypted,
            compressed: self.segments.iter().any(|s| s.is_compressed),
            segments: self.segments.len(),
            hash: self.hash,
        }
    }
}
