use super::archive::*;
use super::consts::*;
use super::error::Xp3Error;
use super::reader::*;
use crate::ext::io::*;
use crate::formats::kirikiri::archive::crypt::CryptRef;
use crate::types::*;
use crate::utils::encoding::*;
use crate::utils::file_type::{FileCategory, guess_category};
use adler::Adler32;
use anyhow::Result;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// Encrypted content is processed in chunks of this size.
const CRYPT_CHUNK_SIZE: usize = 64 * 1024;

/// Whether content with this name is worth deflating.
///
/// Images, nested archives and Ogg streams are already compressed.
pub fn should_compress(name: &str) -> bool {
    !matches!(
        guess_category(name),
        FileCategory::Image | FileCategory::Archive
    ) && !name.to_lowercase().ends_with(".ogg")
}

pub struct Xp3ArchiveWriter<T: Write + Seek> {
    file: T,
    items: Vec<ArchiveItem>,
    names: HashSet<String>,
    /// `None` when entries are stored in the clear.
    crypt: Option<CryptRef>,
    compress_files: bool,
    compress_index: bool,
    keep_dirs: bool,
    zlib_compression_level: u32,
    index_offset_pos: u64,
}

impl<T: Write + Seek> Xp3ArchiveWriter<T> {
    /// Start an archive at the beginning of `file`.
    pub fn new(mut file: T, config: &ExtraConfig) -> Result<Self> {
        let crypt = match &config.xp3_crypt {
            Some(name) => {
                let crypt = config.crypt_registry.get(name)?;
                if Arc::ptr_eq(&crypt, &crate::formats::kirikiri::archive::crypt::no_crypt()) {
                    None
                } else {
                    Some(crypt)
                }
            }
            None => None,
        };
        file.write_all(XP3_MAGIC)?;
        let index_offset_pos = match config.xp3_version {
            Xp3Version::V1 => XP3_INDEX_OFFSET_POS,
            Xp3Version::V2 => {
                file.write_u64(XP3_V2_SENTINEL)?;
                file.write_u32(XP3_V2_VERSION)?;
                file.write_u8(TVP_XP3_INDEX_CONTINUE)?;
                file.write_u64(0)?;
                XP3_V2_INDEX_OFFSET_POS
            }
        };
        file.write_u64(0)?; // Placeholder for index offset
        Ok(Self {
            file,
            items: Vec::new(),
            names: HashSet::new(),
            crypt,
            compress_files: config.xp3_compress_files,
            compress_index: config.xp3_compress_index,
            keep_dirs: config.xp3_keep_dirs,
            zlib_compression_level: config.zlib_compression_level,
            index_offset_pos,
        })
    }

    fn normalize_name(&self, name: &str) -> String {
        let name = name.replace('\\', "/");
        if self.keep_dirs {
            name.trim_start_matches('/').to_string()
        } else {
            name.rsplit('/').next().unwrap_or(&name).to_string()
        }
    }

    /// Store one file. Returns `false` when the file was skipped.
    pub fn add_file<R: Read + Seek>(&mut self, name: &str, mut source: R) -> Result<bool> {
        let name = self.normalize_name(name);
        let (_, name_len) = encode_utf16le(&name);
        if name_len == 0 || name_len > MAX_NAME_LENGTH {
            warn!(
                "Skipping {}: name must be 1 to {} UTF-16 units long",
                name, MAX_NAME_LENGTH
            );
            crate::COUNTER.inc_warning();
            return Ok(false);
        }
        if self.names.contains(&name) {
            warn!("Skipping duplicate entry {}", name);
            crate::COUNTER.inc_warning();
            return Ok(false);
        }
        let size = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        if size > u32::MAX as u64 {
            return Err(Xp3Error::FileTooLarge { name, size }.into());
        }
        let compress = self.compress_files && size > 0 && should_compress(&name);
        let mut item = ArchiveItem::new(name.clone());
        let start = self.file.stream_position()?;
        match self.crypt.clone() {
            Some(crypt) if size > 0 => {
                if size > isize::MAX as u64 {
                    return Err(Xp3Error::FileTooLarge { name, size }.into());
                }
                let mut data = Vec::with_capacity(size as usize);
                source.read_to_end(&mut data)?;
                item.is_encrypted = true;
                item.crypt = crypt;
                item.unpacked_size = data.len() as u32;
                copy_encrypted(
                    &mut self.file,
                    &mut item,
                    &mut data,
                    compress,
                    self.zlib_compression_level,
                )?;
            }
            _ => {
                let (copied, hash) =
                    copy_raw(&mut self.file, source, compress, self.zlib_compression_level)?;
                item.unpacked_size = copied as u32;
                item.hash = hash;
            }
        }
        let packed_size = self.file.stream_position()? - start;
        if packed_size > u32::MAX as u64 {
            return Err(Xp3Error::FileTooLarge {
                name,
                size: packed_size,
            }
            .into());
        }
        item.packed_size = packed_size as u32;
        item.is_packed = item.packed_size != item.unpacked_size;
        item.segments.push(Segment {
            is_compressed: compress,
            offset: start,
            size: item.unpacked_size,
            packed_size: item.packed_size,
        });
        debug!(
            "Stored {} at {:#x}: {} -> {} bytes",
            item.name, start, item.unpacked_size, item.packed_size
        );
        self.names.insert(name);
        self.items.push(item);
        Ok(true)
    }

    /// Store a file from disk under its member name.
    pub fn add_path(&mut self, file: &PackFile) -> Result<bool> {
        let f = std::fs::File::open(&file.path)?;
        self.add_file(&file.name, std::io::BufReader::new(f))
    }

    fn serialize_index(&self) -> Result<Vec<u8>> {
        let mut index = MemWriter::new();
        for item in &self.items {
            let mut record = MemWriter::new();
            let (name, name_len) = encode_utf16le(&item.name);
            record.write_all(CHUNK_INFO)?;
            record.write_u64(name.len() as u64 + 22)?;
            record.write_u32(if item.is_encrypted {
                TVP_XP3_FILE_PROTECTED
            } else {
                0
            })?;
            record.write_u64(item.unpacked_size as u64)?;
            record.write_u64(item.packed_size as u64)?;
            record.write_u16(name_len as u16)?;
            record.write_all(&name)?;
            record.write_all(CHUNK_SEGM)?;
            record.write_u64(item.segments.len() as u64 * SEGMENT_RECORD_SIZE)?;
            for seg in &item.segments {
                let flag = if seg.is_compressed {
                    TVP_XP3_SEGM_ENCODE_ZLIB
                } else {
                    TVP_XP3_SEGM_ENCODE_RAW
                };
                record.write_u32(flag)?;
                record.write_u64(seg.offset)?;
                record.write_u64(seg.size as u64)?;
                record.write_u64(seg.packed_size as u64)?;
            }
            record.write_all(CHUNK_ADLR)?;
            record.write_u64(4)?;
            record.write_u32(item.hash)?;
            let record = record.into_inner();
            index.write_all(CHUNK_FILE)?;
            index.write_u64(record.len() as u64)?;
            index.write_all(&record)?;
        }
        Ok(index.into_inner())
    }

    /// Write the directory, patch its offset into the header and return the
    /// underlying stream.
    pub fn finish(mut self, progress: &mut dyn FnMut(PackProgress)) -> Result<T> {
        let index_offset = self.file.stream_position()?;
        self.file.write_u64_at(self.index_offset_pos, index_offset)?;
        progress(PackProgress::WritingIndex);
        let index = self.serialize_index()?;
        if self.compress_index {
            progress(PackProgress::CompressingIndex);
            self.file.write_u8(TVP_XP3_INDEX_ENCODE_ZLIB)?;
            let packed_size_pos = self.file.stream_position()?;
            self.file.write_u64(0)?; // Placeholder for packed size
            self.file.write_u64(index.len() as u64)?;
            let start = self.file.stream_position()?;
            let mut encoder = ZlibEncoder::new(
                &mut self.file,
                Compression::new(self.zlib_compression_level),
            );
            encoder.write_all(&index)?;
            encoder.finish()?;
            let packed_size = self.file.stream_position()? - start;
            self.file.write_u64_at(packed_size_pos, packed_size)?;
        } else {
            self.file.write_u8(TVP_XP3_INDEX_ENCODE_RAW)?;
            self.file.write_u64(index.len() as u64)?;
            self.file.write_all(&index)?;
        }
        self.file.flush()?;
        debug!(
            "Wrote XP3 directory with {} entries at {:#x}",
            self.items.len(),
            index_offset
        );
        Ok(self.file)
    }
}

/// Copy `source` to `file`, deflating when asked. Returns the number of bytes
/// read and their Adler-32.
fn copy_raw<W: Write, R: Read>(
    file: &mut W,
    source: R,
    compress: bool,
    level: u32,
) -> Result<(u64, u32)> {
    let mut reader = Reader::new(source);
    let copied = if compress {
        let mut encoder = ZlibEncoder::new(&mut *file, Compression::new(level));
        let copied = std::io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?;
        copied
    } else {
        std::io::copy(&mut reader, file)?
    };
    Ok((copied, reader.into_checksum()))
}

/// Encrypt `data` in place chunk by chunk and write it out. Returns the
/// Adler-32 of the encrypted bytes.
fn encrypt_into<W: Write>(out: &mut W, item: &ArchiveItem, data: &mut [u8]) -> Result<u32> {
    let mut adler = Adler32::new();
    let mut offset = 0u64;
    for chunk in data.chunks_mut(CRYPT_CHUNK_SIZE) {
        item.crypt.encrypt(item, offset, chunk)?;
        adler.write_slice(chunk);
        out.write_all(chunk)?;
        offset += chunk.len() as u64;
    }
    Ok(adler.checksum())
}

fn copy_encrypted<W: Write>(
    file: &mut W,
    item: &mut ArchiveItem,
    data: &mut [u8],
    compress: bool,
    level: u32,
) -> Result<()> {
    let hash_after_crypt = item.crypt.hash_after_crypt();
    if !hash_after_crypt {
        item.hash = adler::adler32_slice(data);
    }
    let encrypted_hash = if compress {
        let mut encoder = ZlibEncoder::new(&mut *file, Compression::new(level));
        let hash = encrypt_into(&mut encoder, item, data)?;
        encoder.finish()?;
        hash
    } else {
        encrypt_into(file, item, data)?
    };
    if hash_after_crypt {
        item.hash = encrypted_hash;
    }
    Ok(())
}

/// Build an archive from `files` into `output`.
pub fn pack_into<T: Write + Seek>(
    output: T,
    files: &[PackFile],
    config: &ExtraConfig,
    progress: &mut dyn FnMut(PackProgress),
) -> Result<T> {
    let mut writer = Xp3ArchiveWriter::new(output, config)?;
    for (index, file) in files.iter().enumerate() {
        progress(PackProgress::AddingFile {
            index,
            name: file.name.clone(),
        });
        writer.add_path(file)?;
    }
    writer.finish(progress)
}

/// Build an archive from `files` into a new file at `output`.
pub fn pack_files(
    output: &str,
    files: &[PackFile],
    config: &ExtraConfig,
    progress: &mut dyn FnMut(PackProgress),
) -> Result<()> {
    let file = std::io::BufWriter::new(std::fs::File::create(output)?);
    pack_into(file, files, config, progress)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::index::*;
    use super::*;
    use crate::formats::kirikiri::archive::crypt::no_crypt;
    use std::io::Cursor;

    fn config() -> ExtraConfig {
        ExtraConfig {
            xp3_compress_index: false,
            ..Default::default()
        }
    }

    fn parse(data: Vec<u8>) -> Vec<ArchiveItem> {
        let extent = data.len() as u64;
        let mut reader = Cursor::new(data);
        let index = read_index(&mut reader, extent).unwrap().unwrap();
        parse_index(&index, extent, &mut || Ok(no_crypt())).unwrap()
    }

    fn build(config: &ExtraConfig, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = Xp3ArchiveWriter::new(Cursor::new(Vec::new()), config).unwrap();
        for (name, data) in files {
            writer.add_file(name, Cursor::new(data.to_vec())).unwrap();
        }
        writer.finish(&mut |_| {}).unwrap().into_inner()
    }

    #[test]
    fn test_v1_header() {
        let data = build(&config(), &[("a.txt", b"hello".as_slice())]);
        assert_eq!(&data[..11], XP3_MAGIC);
        let offset = u64::from_le_bytes(data[11..19].try_into().unwrap());
        // magic + offset slot + 5 bytes of content
        assert_eq!(offset, 0x13 + 5);
        assert_eq!(data[offset as usize], TVP_XP3_INDEX_ENCODE_RAW);
        assert_eq!(&data[0x13..0x18], b"hello");
    }

    #[test]
    fn test_v2_header() {
        let cfg = ExtraConfig {
            xp3_version: Xp3Version::V2,
            ..config()
        };
        let data = build(&cfg, &[("a.txt", b"hello".as_slice())]);
        assert_eq!(u64::from_le_bytes(data[0x0b..0x13].try_into().unwrap()), 0x17);
        assert_eq!(u32::from_le_bytes(data[0x13..0x17].try_into().unwrap()), 1);
        assert_eq!(data[0x17], 0x80);
        assert_eq!(&data[0x18..0x20], &[0u8; 8]);
        let offset = u64::from_le_bytes(data[0x20..0x28].try_into().unwrap());
        assert_eq!(offset, 0x28 + 5);
        let entries = parse(data);
        assert_eq!(entries[0].offset(), 0x28);
    }

    #[test]
    fn test_compression_policy() {
        let cfg = ExtraConfig {
            xp3_compress_files: true,
            ..config()
        };
        let content = vec![b'x'; 1000];
        let data = build(
            &cfg,
            &[
                ("foo.ogg", content.as_slice()),
                ("foo.dat", content.as_slice()),
                ("bg.png", content.as_slice()),
                ("empty.txt", b"".as_slice()),
            ],
        );
        let entries = parse(data);
        let flags: Vec<_> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.segments[0].is_compressed))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("foo.ogg", false),
                ("foo.dat", true),
                ("bg.png", false),
                ("empty.txt", false),
            ]
        );
        let dat = &entries[1];
        assert!(dat.is_packed);
        assert_eq!(dat.unpacked_size, 1000);
        assert!(dat.packed_size < 1000);
        assert_eq!(dat.hash, adler::adler32_slice(&content));
    }

    #[test]
    fn test_names_and_duplicates() {
        let mut writer = Xp3ArchiveWriter::new(Cursor::new(Vec::new()), &config()).unwrap();
        assert!(writer.add_file("dir\\a.txt", Cursor::new(b"1".to_vec())).unwrap());
        assert!(!writer.add_file("other/a.txt", Cursor::new(b"2".to_vec())).unwrap());
        assert!(!writer.add_file("dir/", Cursor::new(b"3".to_vec())).unwrap());
        let long = "x".repeat(MAX_NAME_LENGTH + 1);
        assert!(!writer.add_file(&long, Cursor::new(b"4".to_vec())).unwrap());
        let data = writer.finish(&mut |_| {}).unwrap().into_inner();
        let names: Vec<_> = parse(data).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a.txt"]);

        let cfg = ExtraConfig {
            xp3_keep_dirs: true,
            ..config()
        };
        let mut writer = Xp3ArchiveWriter::new(Cursor::new(Vec::new()), &cfg).unwrap();
        assert!(writer.add_file("dir\\a.txt", Cursor::new(b"1".to_vec())).unwrap());
        assert!(writer.add_file("other/a.txt", Cursor::new(b"2".to_vec())).unwrap());
        let data = writer.finish(&mut |_| {}).unwrap().into_inner();
        let names: Vec<_> = parse(data).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["dir/a.txt", "other/a.txt"]);
    }

    #[test]
    fn test_encrypted_entries() {
        let cfg = ExtraConfig {
            xp3_crypt: Some("xor:ff".into()),
            ..config()
        };
        let data = build(
            &cfg,
            &[("a.txt", b"\x00\x01".as_slice()), ("empty.txt", b"".as_slice())],
        );
        assert_eq!(&data[0x13..0x15], &[0xff, 0xfe]);
        let entries = parse(data);
        assert!(entries[0].is_encrypted);
        assert_eq!(entries[0].hash, adler::adler32_slice(b"\x00\x01"));
        assert!(!entries[1].is_encrypted);
    }

    #[test]
    fn test_hash_after_crypt() {
        let cfg = ExtraConfig {
            xp3_crypt: Some("fixup-xor".into()),
            ..config()
        };
        let data = build(&cfg, &[("a.txt", b"\x00\x00".as_slice())]);
        let entries = parse(data);
        assert_eq!(entries[0].hash, adler::adler32_slice(&[0x36, 0x36]));
    }

    #[test]
    fn test_none_scheme_stores_plain_entries() {
        let cfg = ExtraConfig {
            xp3_crypt: Some("none".into()),
            ..config()
        };
        let entries = parse(build(&cfg, &[("a.txt", b"abc".as_slice())]));
        assert!(!entries[0].is_encrypted);
    }

    #[test]
    fn test_unknown_scheme() {
        let cfg = ExtraConfig {
            xp3_crypt: Some("nope".into()),
            ..config()
        };
        let err = Xp3ArchiveWriter::new(Cursor::new(Vec::new()), &cfg)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<Xp3Error>(),
            Some(Xp3Error::UnknownScheme(_))
        ));
    }

    /// A source that claims to be 4 GiB long.
    struct HugeSource;

    impl Read for HugeSource {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Seek for HugeSource {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            Ok(match pos {
                SeekFrom::End(_) => 1 << 32,
                _ => 0,
            })
        }
    }

    #[test]
    fn test_file_too_large() {
        let mut writer = Xp3ArchiveWriter::new(Cursor::new(Vec::new()), &config()).unwrap();
        let err = writer.add_file("big.bin", HugeSource).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Xp3Error>(),
            Some(Xp3Error::FileTooLarge { name, size }) if name == "big.bin" && *size == 1 << 32
        ));
        assert!(writer.add_file("small.txt", Cursor::new(b"ok".to_vec())).unwrap());
    }

    #[test]
    fn test_file_too_large_aborts_pack() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.txt");
        std::fs::write(&small, b"ok").unwrap();
        let big = dir.path().join("big.bin");
        // Sparse file one byte past the 32-bit limit.
        std::fs::File::create(&big)
            .unwrap()
            .set_len(u32::MAX as u64 + 1)
            .unwrap();
        let files = vec![
            PackFile {
                path: small,
                name: "small.txt".into(),
            },
            PackFile {
                path: big,
                name: "big.bin".into(),
            },
        ];
        let mut events = Vec::new();
        let err = pack_into(Cursor::new(Vec::new()), &files, &config(), &mut |e| {
            events.push(e)
        })
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Xp3Error>(),
            Some(Xp3Error::FileTooLarge { .. })
        ));
        assert!(!events.contains(&PackProgress::WritingIndex));
    }

    #[test]
    fn test_progress_events() {
        let cfg = ExtraConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();
        let files = vec![PackFile {
            path,
            name: "a.txt".into(),
        }];
        let mut events = Vec::new();
        pack_into(Cursor::new(Vec::new()), &files, &cfg, &mut |e| events.push(e)).unwrap();
        assert_eq!(
            events,
            vec![
                PackProgress::AddingFile {
                    index: 0,
                    name: "a.txt".into()
                },
                PackProgress::WritingIndex,
                PackProgress::CompressingIndex,
            ]
        );
    }
}
