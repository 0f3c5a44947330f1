use crate::ext::io::MemReader;
use crate::types::*;
use anyhow::Result;
use std::io::{Read, Seek};

pub trait ReadSeek: Read + Seek + std::fmt::Debug {}

impl<T: Read + Seek + std::fmt::Debug> ReadSeek for T {}

/// A handler for one archive format.
pub trait ArchiveBuilder: std::fmt::Debug {
    fn extensions(&self) -> &'static [&'static str];

    fn archive_type(&self) -> &'static ArchiveType;

    /// Score how likely `buf` (the first `buf_len` bytes of `filename`) is
    /// this format.
    fn is_this_format(&self, _filename: &str, _buf: &[u8], _buf_len: usize) -> Option<u8> {
        None
    }

    /// Open an archive. `Ok(None)` means the data is not in this format.
    fn open_archive(
        &self,
        reader: Box<dyn ReadSeek>,
        config: &ExtraConfig,
    ) -> Result<Option<Box<dyn Archive>>>;

    fn open_archive_from_file(
        &self,
        filename: &str,
        config: &ExtraConfig,
    ) -> Result<Option<Box<dyn Archive>>> {
        let f = std::fs::File::open(filename)?;
        self.open_archive(Box::new(std::io::BufReader::new(f)), config)
    }

    fn open_archive_from_buffer(
        &self,
        data: Vec<u8>,
        config: &ExtraConfig,
    ) -> Result<Option<Box<dyn Archive>>> {
        self.open_archive(Box::new(MemReader::new(data)), config)
    }

    fn can_create_archive(&self) -> bool {
        false
    }

    fn create_archive(
        &self,
        _filename: &str,
        _files: &[PackFile],
        _config: &ExtraConfig,
        _progress: &mut dyn FnMut(PackProgress),
    ) -> Result<()> {
        Err(anyhow::anyhow!(
            "This archive type does not support creating an archive."
        ))
    }
}

/// Content of one archive member.
pub trait ArchiveContent: Read {
    fn name(&self) -> &str;
    /// Logical size in bytes.
    fn size(&self) -> u64;
}

pub trait Archive: std::fmt::Debug {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter_archive_filename<'a>(
        &'a self,
    ) -> Result<Box<dyn Iterator<Item = Result<String>> + 'a>>;

    fn open_file<'a>(&'a self, index: usize) -> Result<Box<dyn ArchiveContent + 'a>>;

    fn entry_info(&self, index: usize) -> Result<EntryInfo>;
}
