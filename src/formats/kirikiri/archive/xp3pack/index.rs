//! Locating, loading and decoding the XP3 directory.
use super::archive::*;
use super::consts::*;
use crate::ext::io::*;
use crate::formats::kirikiri::archive::crypt::{CryptRef, no_crypt};
use crate::utils::encoding::decode_utf16le;
use anyhow::Result;
use flate2::read::ZlibDecoder;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, warn};

/// Outcome of decoding one `File` record.
#[derive(Debug)]
enum ParsedRecord {
    Entry(ArchiveItem),
    /// Malformed record.
    Skipped(&'static str),
    /// Well-formed record that lacks a name or segment list.
    Incomplete(&'static str),
}

/// `info` section contents.
struct FileInfo {
    flags: u32,
    unpacked_size: u32,
    packed_size: u32,
    name: String,
}

fn truncated(_: std::io::Error) -> &'static str {
    "section is truncated"
}

/// A size field that has to fit in 32 bits.
fn checked_size(value: i64) -> Option<u64> {
    if (0..=u32::MAX as i64).contains(&value) {
        Some(value as u64)
    } else {
        None
    }
}

/// Deflate cannot expand input by more than this factor.
const MAX_DEFLATE_RATIO: u64 = 1032;

/// Bytes to reserve for an inflated directory. The declared size is not
/// trusted beyond what `packed` bytes of deflate can produce.
fn index_capacity(packed: u64, unpacked: u64) -> usize {
    unpacked.min(packed.saturating_mul(MAX_DEFLATE_RATIO)) as usize
}

/// Resolve the directory offset from the header, following the version 2
/// indirection when present.
fn locate_index<R: Read + Seek>(reader: &mut R, extent: u64) -> Result<Option<u64>> {
    let mut offset = reader.peek_i64_at(XP3_INDEX_OFFSET_POS)?;
    if offset == XP3_V2_SENTINEL as i64 {
        if extent < XP3_V2_INDEX_OFFSET_POS + 8 {
            return Ok(None);
        }
        if reader.peek_u32_at(XP3_V2_VERSION_POS)? != XP3_V2_VERSION
            || reader.peek_u32_at(XP3_V2_MARKER_POS)? != TVP_XP3_INDEX_CONTINUE as u32
        {
            debug!("XP3 version 2 header markers do not match");
            return Ok(None);
        }
        offset = reader.peek_i64_at(XP3_V2_INDEX_OFFSET_POS)?;
    }
    if offset < XP3_MIN_INDEX_OFFSET as i64 || offset as u64 >= extent {
        debug!("XP3 directory offset {:#x} is outside of the archive", offset);
        return Ok(None);
    }
    Ok(Some(offset as u64))
}

/// Check the signature and load the raw directory bytes.
///
/// Returns `Ok(None)` when `reader` does not hold an XP3 archive. `extent`
/// is the total size of the storage.
pub fn read_index<R: Read + Seek>(reader: &mut R, extent: u64) -> Result<Option<Vec<u8>>> {
    if extent < XP3_MIN_INDEX_OFFSET {
        return Ok(None);
    }
    let mut magic = [0u8; 11];
    reader.peek_extract_at(0, &mut magic)?;
    if &magic != XP3_MAGIC {
        return Ok(None);
    }
    let index_offset = match locate_index(reader, extent)? {
        Some(offset) => offset,
        None => return Ok(None),
    };
    reader.seek(SeekFrom::Start(index_offset))?;
    let header_type = reader.read_u8()?;
    let available = extent - index_offset - 1;
    debug!(
        "XP3 directory at {:#x}, header type {}",
        index_offset, header_type
    );
    match header_type {
        TVP_XP3_INDEX_ENCODE_RAW => {
            if available < 8 {
                return Ok(None);
            }
            let size = match checked_size(reader.read_i64()?) {
                Some(size) if size <= available - 8 => size,
                _ => return Ok(None),
            };
            Ok(Some(reader.read_exact_vec(size as usize)?))
        }
        TVP_XP3_INDEX_ENCODE_ZLIB => {
            if available < 16 {
                return Ok(None);
            }
            let packed = checked_size(reader.read_i64()?);
            let unpacked = checked_size(reader.read_i64()?);
            let (packed, unpacked) = match (packed, unpacked) {
                (Some(packed), Some(unpacked)) if packed <= available - 16 => (packed, unpacked),
                _ => return Ok(None),
            };
            let mut index = Vec::with_capacity(index_capacity(packed, unpacked));
            ZlibDecoder::new(reader.by_ref().take(packed))
                .take(unpacked)
                .read_to_end(&mut index)
                .map_err(|e| anyhow::anyhow!("Failed to decompress XP3 directory: {}", e))?;
            if index.len() as u64 != unpacked {
                anyhow::bail!(
                    "XP3 directory is truncated: expected {} bytes, got {}",
                    unpacked,
                    index.len()
                );
            }
            Ok(Some(index))
        }
        _ => {
            debug!("Unknown XP3 directory header type {:#x}", header_type);
            Ok(None)
        }
    }
}

fn parse_info(body: &[u8], extent: u64) -> std::result::Result<FileInfo, &'static str> {
    let mut reader = MemReaderRef::new(body);
    let flags = reader.read_u32().map_err(truncated)?;
    let unpacked_size = checked_size(reader.read_i64().map_err(truncated)?)
        .ok_or("unpacked size does not fit in 32 bits")?;
    let packed_size = checked_size(reader.read_i64().map_err(truncated)?)
        .ok_or("packed size does not fit in 32 bits")?;
    if packed_size > extent {
        return Err("packed size exceeds the archive");
    }
    let name_len = reader.read_i16().map_err(truncated)?;
    if name_len <= 0 || name_len as usize > MAX_NAME_LENGTH {
        return Err("invalid name length");
    }
    let name = reader
        .read_exact_vec(name_len as usize * 2)
        .map_err(truncated)?;
    Ok(FileInfo {
        flags,
        unpacked_size: unpacked_size as u32,
        packed_size: packed_size as u32,
        name: decode_utf16le(&name),
    })
}

fn parse_segments(body: &[u8], extent: u64) -> std::result::Result<Vec<Segment>, &'static str> {
    if body.len() as u64 % SEGMENT_RECORD_SIZE != 0 {
        return Err("segment list has a partial record");
    }
    let mut reader = MemReaderRef::new(body);
    let mut segments = Vec::with_capacity(body.len() / SEGMENT_RECORD_SIZE as usize);
    while reader.remaining() > 0 {
        let flag = reader.read_i32().map_err(truncated)? as u32;
        let offset = reader.read_i64().map_err(truncated)?;
        let size = checked_size(reader.read_i64().map_err(truncated)?)
            .ok_or("segment size does not fit in 32 bits")?;
        let packed_size = checked_size(reader.read_i64().map_err(truncated)?)
            .ok_or("segment packed size does not fit in 32 bits")?;
        if offset < 0 || (offset as u64).saturating_add(packed_size) > extent {
            return Err("segment lies outside of the archive");
        }
        let is_compressed = match flag & TVP_XP3_SEGM_ENCODE_METHOD_MASK {
            TVP_XP3_SEGM_ENCODE_RAW => false,
            TVP_XP3_SEGM_ENCODE_ZLIB => true,
            _ => return Err("unknown segment encoding"),
        };
        if !is_compressed && size != packed_size {
            return Err("stored segment sizes differ");
        }
        segments.push(Segment {
            is_compressed,
            offset: offset as u64,
            size: size as u32,
            packed_size: packed_size as u32,
        });
    }
    Ok(segments)
}

fn parse_record(
    record: &[u8],
    extent: u64,
    crypt: &mut Option<CryptRef>,
    resolve_crypt: &mut dyn FnMut() -> Result<CryptRef>,
) -> Result<ParsedRecord> {
    let mut reader = MemReaderRef::new(record);
    let mut info: Option<FileInfo> = None;
    let mut segments: Option<Vec<Segment>> = None;
    let mut hash = 0;
    while reader.remaining() as u64 >= CHUNK_HEADER_SIZE {
        let tag = reader.read_u32()?;
        let len = reader.read_i64()?;
        if len < 0 || len as u64 > reader.remaining() as u64 {
            return Ok(ParsedRecord::Skipped("section overruns its record"));
        }
        let start = reader.pos();
        let body = &record[start..start + len as usize];
        match tag {
            TAG_INFO => {
                if info.is_some() {
                    return Ok(ParsedRecord::Skipped("duplicate info section"));
                }
                match parse_info(body, extent) {
                    Ok(i) => info = Some(i),
                    Err(reason) => return Ok(ParsedRecord::Skipped(reason)),
                }
            }
            TAG_SEGM => {
                if segments.is_some() {
                    return Ok(ParsedRecord::Skipped("duplicate segm section"));
                }
                match parse_segments(body, extent) {
                    Ok(s) => segments = Some(s),
                    Err(reason) => return Ok(ParsedRecord::Skipped(reason)),
                }
            }
            TAG_ADLR => {
                if body.len() == 4 {
                    hash = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                }
            }
            _ => {}
        }
        reader.seek(SeekFrom::Start((start + len as usize) as u64))?;
    }
    let info = match info {
        Some(info) => info,
        None => return Ok(ParsedRecord::Incomplete("record has no name")),
    };
    let segments = match segments {
        Some(segments) if !segments.is_empty() => segments,
        _ => return Ok(ParsedRecord::Incomplete("record has no segments")),
    };
    let total: u64 = segments.iter().map(|s| s.size as u64).sum();
    if total != info.unpacked_size as u64 {
        return Ok(ParsedRecord::Skipped("segment sizes do not add up"));
    }
    let is_encrypted = info.flags != 0;
    let item_crypt = if is_encrypted {
        match crypt {
            Some(c) => c.clone(),
            None => {
                let c = resolve_crypt()?;
                debug!("Using cipher {} for encrypted entries", c.name());
                *crypt = Some(c.clone());
                c
            }
        }
    } else {
        no_crypt()
    };
    Ok(ParsedRecord::Entry(ArchiveItem {
        name: info.name,
        is_packed: info.unpacked_size != info.packed_size,
        is_encrypted,
        unpacked_size: info.unpacked_size,
        packed_size: info.packed_size,
        hash,
        segments,
        crypt: item_crypt,
    }))
}

fn is_decoy(item: &ArchiveItem) -> bool {
    item.name.contains(PROTECTION_MARKER)
        || (item.unpacked_size == 0 && item.name.to_lowercase().ends_with(".nene"))
}

/// Decode a directory into archive items, in directory order.
///
/// Malformed `File` records are skipped. `resolve_crypt` is called at most
/// once, when the first encrypted entry is met.
pub fn parse_index(
    index: &[u8],
    extent: u64,
    resolve_crypt: &mut dyn FnMut() -> Result<CryptRef>,
) -> Result<Vec<ArchiveItem>> {
    let mut reader = MemReaderRef::new(index);
    let mut entries = Vec::new();
    let mut crypt = None;
    while reader.remaining() as u64 >= CHUNK_HEADER_SIZE {
        let record_pos = reader.pos();
        let tag = reader.read_u32()?;
        let len = reader.read_i64()?;
        if len < 0 || len as u64 > reader.remaining() as u64 {
            warn!(
                "Directory record at {:#x} has an invalid length {}, ignoring the rest",
                record_pos, len
            );
            crate::COUNTER.inc_warning();
            break;
        }
        let start = reader.pos();
        let end = start + len as usize;
        if tag == TAG_FILE {
            match parse_record(&index[start..end], extent, &mut crypt, resolve_crypt)? {
                ParsedRecord::Entry(item) => entries.push(item),
                ParsedRecord::Skipped(reason) => {
                    warn!("Skipping directory record at {:#x}: {}", record_pos, reason);
                    crate::COUNTER.inc_warning();
                }
                ParsedRecord::Incomplete(reason) => {
                    debug!("Skipping directory record at {:#x}: {}", record_pos, reason);
                }
            }
        }
        reader.seek(SeekFrom::Start(end as u64))?;
    }
    entries.retain(|item| !is_decoy(item));
    debug!("XP3 directory holds {} entries", entries.len());
    Ok(entries)
}
