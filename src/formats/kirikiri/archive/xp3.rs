use super::crypt::{CryptRef, no_crypt};
use super::xp3pack::*;
use crate::ext::io::*;
use crate::formats::base::*;
use crate::types::*;
use anyhow::Result;
use flate2::read::ZlibDecoder;
use std::io::{Read, Seek, SeekFrom, Take};
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

#[derive(Debug)]
/// Builder for Kirikiri XP3 Archive
pub struct Xp3ArchiveBuilder {}

impl Xp3ArchiveBuilder {
    /// Create a new Kirikiri XP3 Archive Builder
    pub fn new() -> Self {
        Self {}
    }
}

impl ArchiveBuilder for Xp3ArchiveBuilder {
    fn extensions(&self) -> &'static [&'static str] {
        &["xp3"]
    }

    fn archive_type(&self) -> &'static ArchiveType {
        &ArchiveType::KirikiriXp3
    }

    fn is_this_format(&self, _filename: &str, buf: &[u8], buf_len: usize) -> Option<u8> {
        if buf_len >= XP3_MAGIC.len() && buf.starts_with(XP3_MAGIC) {
            return Some(20);
        }
        None
    }

    fn open_archive(
        &self,
        reader: Box<dyn ReadSeek>,
        config: &ExtraConfig,
    ) -> Result<Option<Box<dyn Archive>>> {
        Ok(Xp3Archive::open(reader, config)?.map(|a| Box::new(a) as Box<dyn Archive>))
    }

    fn can_create_archive(&self) -> bool {
        true
    }

    fn create_archive(
        &self,
        filename: &str,
        files: &[PackFile],
        config: &ExtraConfig,
        progress: &mut dyn FnMut(PackProgress),
    ) -> Result<()> {
        pack_files(filename, files, config, progress)
    }
}

/// Pick the cipher for encrypted entries from the configured scheme name.
fn resolve_crypt(config: &ExtraConfig) -> Result<CryptRef> {
    match &config.xp3_crypt {
        Some(name) => config.crypt_registry.get(name),
        None => {
            warn!("Archive has encrypted entries but no scheme was selected, reading them as is");
            crate::COUNTER.inc_warning();
            Ok(no_crypt())
        }
    }
}

#[derive(Debug)]
/// Kirikiri XP3 Archive
pub struct Xp3Archive<T: Read + Seek + std::fmt::Debug> {
    reader: Arc<Mutex<T>>,
    entries: Vec<ArchiveItem>,
}

impl<T: Read + Seek + std::fmt::Debug> Xp3Archive<T> {
    /// Parse the archive held by `reader`.
    ///
    /// Returns `Ok(None)` when `reader` does not hold an XP3 archive.
    pub fn open(mut reader: T, config: &ExtraConfig) -> Result<Option<Self>> {
        let extent = reader.seek(SeekFrom::End(0))?;
        let index = match read_index(&mut reader, extent)? {
            Some(index) => index,
            None => return Ok(None),
        };
        let entries = parse_index(&index, extent, &mut || resolve_crypt(config))?;
        Ok(Some(Self {
            reader: Arc::new(Mutex::new(reader)),
            entries,
        }))
    }

    pub fn entries(&self) -> &[ArchiveItem] {
        &self.entries
    }

    /// Open the content stream of one entry.
    pub fn open_entry(&self, index: usize) -> Result<Box<dyn ArchiveContent + '_>> {
        let item = self
            .entries
            .get(index)
            .ok_or(anyhow::anyhow!("Index out of bounds: {}", index))?;
        if item.segments.len() == 1 && !item.is_encrypted {
            return Ok(Box::new(DirectEntry {
                name: item.name.clone(),
                size: item.unpacked_size as u64,
                inner: SegmentReader::open(self.reader.clone(), &item.segments[0]),
            }));
        }
        Ok(Box::new(Xp3Stream::new(self.reader.clone(), item.clone())))
    }
}

impl<T: Read + Seek + std::fmt::Debug + 'static> Archive for Xp3Archive<T> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn iter_archive_filename<'a>(
        &'a self,
    ) -> Result<Box<dyn Iterator<Item = Result<String>> + 'a>> {
        Ok(Box::new(self.entries.iter().map(|e| Ok(e.name.clone()))))
    }

    fn open_file<'a>(&'a self, index: usize) -> Result<Box<dyn ArchiveContent + 'a>> {
        self.open_entry(index)
    }

    fn entry_info(&self, index: usize) -> Result<EntryInfo> {
        self.entries
            .get(index)
            .map(|e| e.info())
            .ok_or(anyhow::anyhow!("Index out of bounds: {}", index))
    }
}

/// Reader over the stored bytes of one segment, inflated when compressed.
#[derive(Debug)]
enum SegmentReader<T: Read + Seek> {
    Raw(Take<MutexWrapper<T>>),
    Zlib(Take<ZlibDecoder<Take<MutexWrapper<T>>>>),
}

impl<T: Read + Seek> SegmentReader<T> {
    fn open(storage: Arc<Mutex<T>>, segment: &Segment) -> Self {
        let raw = MutexWrapper::new(storage, segment.offset).take(segment.packed_size as u64);
        if segment.is_compressed {
            Self::Zlib(ZlibDecoder::new(raw).take(segment.size as u64))
        } else {
            Self::Raw(raw)
        }
    }
}

impl<T: Read + Seek> Read for SegmentReader<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Raw(r) => r.read(buf),
            Self::Zlib(r) => r.read(buf),
        }
    }
}

/// Single unencrypted segment, read without the segment bookkeeping.
#[derive(Debug)]
struct DirectEntry<T: Read + Seek> {
    name: String,
    size: u64,
    inner: SegmentReader<T>,
}

impl<T: Read + Seek> Read for DirectEntry<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<T: Read + Seek> ArchiveContent for DirectEntry<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Forward-only stream over the logical content of an entry.
///
/// Segments are opened one after another and every byte is decrypted with
/// its offset from the start of the entry.
#[derive(Debug)]
pub struct Xp3Stream<T: Read + Seek> {
    storage: Arc<Mutex<T>>,
    item: ArchiveItem,
    next_segment: usize,
    current: Option<SegmentReader<T>>,
    offset: u64,
}

impl<T: Read + Seek> Xp3Stream<T> {
    pub fn new(storage: Arc<Mutex<T>>, item: ArchiveItem) -> Self {
        Self {
            storage,
            item,
            next_segment: 0,
            current: None,
            offset: 0,
        }
    }
}

impl<T: Read + Seek> Read for Xp3Stream<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.current.is_none() {
                let segment = match self.item.segments.get(self.next_segment) {
                    Some(segment) => segment,
                    None => break,
                };
                trace!(
                    "{}: opening segment {} at {:#x}",
                    self.item.name, self.next_segment, segment.offset
                );
                self.current = Some(SegmentReader::open(self.storage.clone(), segment));
                self.next_segment += 1;
            }
            let n = match self.current.as_mut() {
                Some(current) => match current.read(&mut buf[filled..]) {
                    Ok(n) => n,
                    // Hand out what was read; the error repeats on the next call.
                    Err(_) if filled > 0 => break,
                    Err(e) => return Err(e),
                },
                None => break,
            };
            if n == 0 {
                self.current = None;
                continue;
            }
            filled += n;
        }
        self.item
            .crypt
            .decrypt(&self.item, self.offset, &mut buf[..filled]);
        self.offset += filled as u64;
        Ok(filled)
    }
}

impl<T: Read + Seek> Seek for Xp3Stream<T> {
    /// Only reports the current position; any other request fails.
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.offset),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                Xp3Error::UnsupportedOperation("seek"),
            )),
        }
    }

    fn stream_position(&mut self) -> std::io::Result<u64> {
        Ok(self.offset)
    }
}

impl<T: Read + Seek> ArchiveContent for Xp3Stream<T> {
    fn name(&self) -> &str {
        &self.item.name
    }

    fn size(&self) -> u64 {
        self.item.unpacked_size as u64
    }
}
