/// XP3 file header signature: `XP3\r\n \n\x1a\x8b\x67\x01`
pub const XP3_MAGIC: &[u8; 11] = b"XP3\r\n \n\x1a\x8b\x67\x01";

/// Position of the directory offset in a version 1 header.
pub const XP3_INDEX_OFFSET_POS: u64 = 0x0B;
/// Directory offset value announcing the extended (version 2) header.
pub const XP3_V2_SENTINEL: u64 = 0x17;
pub const XP3_V2_VERSION_POS: u64 = 0x13;
pub const XP3_V2_VERSION: u32 = 1;
pub const XP3_V2_MARKER_POS: u64 = 0x17;
/// Position of the real directory offset in a version 2 header.
pub const XP3_V2_INDEX_OFFSET_POS: u64 = 0x20;
/// Smallest directory offset that does not point into the header.
pub const XP3_MIN_INDEX_OFFSET: u64 = 0x13;

// Chunk names
pub const CHUNK_FILE: &[u8; 4] = b"File";
pub const CHUNK_INFO: &[u8; 4] = b"info";
pub const CHUNK_SEGM: &[u8; 4] = b"segm";
pub const CHUNK_ADLR: &[u8; 4] = b"adlr";

/// Size of a chunk header: tag (u32) + length (u64).
pub const CHUNK_HEADER_SIZE: u64 = 12;
/// Size of one `segm` record.
pub const SEGMENT_RECORD_SIZE: u64 = 28;
/// Longest member name, in UTF-16 code units.
pub const MAX_NAME_LENGTH: usize = 0x100;

// Index entry flags
pub const TVP_XP3_INDEX_ENCODE_RAW: u8 = 0;
pub const TVP_XP3_INDEX_ENCODE_ZLIB: u8 = 1;
pub const TVP_XP3_INDEX_CONTINUE: u8 = 0x80;

// File entry flags
pub const TVP_XP3_FILE_PROTECTED: u32 = 1 << 31;

// Segment entry flags
pub const TVP_XP3_SEGM_ENCODE_METHOD_MASK: u32 = 0x07;
pub const TVP_XP3_SEGM_ENCODE_RAW: u32 = 0;
pub const TVP_XP3_SEGM_ENCODE_ZLIB: u32 = 1;

/// Tag of a chunk as read from the directory.
pub const fn chunk_tag(name: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*name)
}

pub const TAG_FILE: u32 = chunk_tag(CHUNK_FILE);
pub const TAG_INFO: u32 = chunk_tag(CHUNK_INFO);
pub const TAG_SEGM: u32 = chunk_tag(CHUNK_SEGM);
pub const TAG_ADLR: u32 = chunk_tag(CHUNK_ADLR);

/// Name fragment of the decoy entries protection tools add to archives.
pub const PROTECTION_MARKER: &str = "$$$ This is a protected archive. $$$";
