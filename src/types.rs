use crate::formats::kirikiri::archive::crypt::CryptRegistry;
use clap::ValueEnum;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
/// Archive type
pub enum ArchiveType {
    #[value(alias("xp3"))]
    /// Kirikiri XP3 archive
    KirikiriXp3,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
/// XP3 header layout
pub enum Xp3Version {
    #[default]
    #[value(name = "1")]
    /// Directory offset stored directly after the magic
    V1,
    #[value(name = "2")]
    /// Extended header with the directory offset at 0x20
    V2,
}

#[derive(Debug, Clone)]
pub struct ExtraConfig {
    /// Name of the cipher scheme for encrypted entries.
    pub xp3_crypt: Option<String>,
    /// Compress file contents when packing.
    pub xp3_compress_files: bool,
    /// Compress the directory when packing.
    pub xp3_compress_index: bool,
    /// Keep relative directory paths in member names when packing.
    pub xp3_keep_dirs: bool,
    pub xp3_version: Xp3Version,
    pub zlib_compression_level: u32,
    pub crypt_registry: Arc<CryptRegistry>,
}

impl Default for ExtraConfig {
    fn default() -> Self {
        Self {
            xp3_crypt: None,
            xp3_compress_files: false,
            xp3_compress_index: true,
            xp3_keep_dirs: false,
            xp3_version: Xp3Version::V1,
            zlib_compression_level: 9,
            crypt_registry: Arc::new(CryptRegistry::new()),
        }
    }
}

/// A file on disk to be stored in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackFile {
    pub path: PathBuf,
    /// Member name, relative to the packing root.
    pub name: String,
}

/// Milestones reported while an archive is being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackProgress {
    AddingFile { index: usize, name: String },
    WritingIndex,
    CompressingIndex,
}

/// Summary of one archive member, as printed by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
    pub packed_size: u64,
    pub encrypted: bool,
    pub compressed: bool,
    pub segments: usize,
    pub hash: u32,
}

/// Outcome of handling one archive member.
pub enum FileResult {
    Ok,
    Ignored,
}
