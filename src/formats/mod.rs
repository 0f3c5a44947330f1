pub mod base;
pub mod kirikiri;

pub use base::{Archive, ArchiveBuilder};

use crate::types::*;
use anyhow::Result;
use std::io::Read;

lazy_static::lazy_static! {
    pub static ref BUILDER: Vec<Box<dyn ArchiveBuilder + Sync + Send>> = vec![
        Box::new(kirikiri::archive::xp3::Xp3ArchiveBuilder::new()),
    ];
}

/// Handlers to try for `filename`, best guess first.
fn candidates(
    filename: &str,
    header: &[u8],
    typ: Option<&ArchiveType>,
) -> Vec<&'static Box<dyn ArchiveBuilder + Sync + Send>> {
    if let Some(typ) = typ {
        return BUILDER.iter().filter(|b| b.archive_type() == typ).collect();
    }
    let lower = filename.to_lowercase();
    let mut scored: Vec<_> = BUILDER
        .iter()
        .map(|b| {
            let ext_match = b
                .extensions()
                .iter()
                .any(|ext| lower.ends_with(&format!(".{}", ext)));
            let score = b.is_this_format(filename, header, header.len()).unwrap_or(0) as u16
                + if ext_match { 10 } else { 0 };
            (score, b)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, b)| b).collect()
}

fn read_header(filename: &str) -> Result<Vec<u8>> {
    let mut header = Vec::with_capacity(64);
    std::fs::File::open(filename)?
        .take(64)
        .read_to_end(&mut header)?;
    Ok(header)
}

/// Open an archive file with the first handler that recognizes it.
///
/// `-` reads the archive from stdin.
pub fn open_archive(
    filename: &str,
    typ: Option<&ArchiveType>,
    config: &ExtraConfig,
) -> Result<Box<dyn Archive>> {
    if filename == "-" {
        let data = crate::utils::files::read_file(filename)?;
        for builder in candidates(filename, &data, typ) {
            if let Some(archive) = builder.open_archive_from_buffer(data.clone(), config)? {
                return Ok(archive);
            }
        }
    } else {
        let header = read_header(filename)?;
        for builder in candidates(filename, &header, typ) {
            if let Some(archive) = builder.open_archive_from_file(filename, config)? {
                return Ok(archive);
            }
        }
    }
    Err(anyhow::anyhow!("Unsupported archive type: {}", filename))
}

/// The handler used to create archives of type `typ`, or for `filename`'s
/// extension when no type is given.
pub fn archive_creator(
    filename: &str,
    typ: Option<&ArchiveType>,
) -> Result<&'static Box<dyn ArchiveBuilder + Sync + Send>> {
    candidates(filename, &[], typ)
        .into_iter()
        .find(|b| b.can_create_archive())
        .ok_or(anyhow::anyhow!("No archive type can create {}", filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::kirikiri::archive::crypt::{Crypt, CryptRegistry};
    use crate::formats::kirikiri::archive::xp3pack::{ArchiveItem, Xp3Error};
    use std::path::Path;
    use std::sync::Arc;

    fn write_tree(root: &Path) {
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("data.dat"), b"hello hello hello hello".repeat(300)).unwrap();
        std::fs::write(root.join("bgm.ogg"), b"OggS not really an ogg stream").unwrap();
        std::fs::write(root.join("empty.txt"), b"").unwrap();
        std::fs::write(
            root.join("sub").join("first.ks"),
            (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>(),
        )
        .unwrap();
    }

    fn pack(
        src: &Path,
        out: &Path,
        config: &ExtraConfig,
        recursive: bool,
    ) -> Result<Vec<PackProgress>> {
        let files = crate::utils::files::collect_pack_files(src.to_str().unwrap(), recursive)?;
        let out = out.to_str().unwrap();
        let mut events = Vec::new();
        archive_creator(out, None)?.create_archive(out, &files, config, &mut |p| events.push(p))?;
        Ok(events)
    }

    fn read_all(archive: &dyn Archive) -> Vec<(String, Vec<u8>)> {
        let names: Vec<String> = archive
            .iter_archive_filename()
            .unwrap()
            .map(|n| n.unwrap())
            .collect();
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let mut content = archive.open_file(i).unwrap();
                let mut data = Vec::new();
                content.read_to_end(&mut data).unwrap();
                assert_eq!(data.len() as u64, content.size());
                (name, data)
            })
            .collect()
    }

    #[test]
    fn test_pack_then_unpack_every_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        write_tree(&src);
        let expected = |name: &str| std::fs::read(src.join(name)).unwrap();
        let schemes = [
            None,
            Some("none"),
            Some("xor:5a"),
            Some("fixup-xor"),
            Some("rotate-xor"),
            Some("hash-offset"),
            Some("zoned-xor"),
        ];
        for scheme in schemes {
            for compress_files in [false, true] {
                let config = ExtraConfig {
                    xp3_crypt: scheme.map(|s| s.to_string()),
                    xp3_compress_files: compress_files,
                    xp3_keep_dirs: true,
                    ..Default::default()
                };
                let out = dir.path().join("out.xp3");
                pack(&src, &out, &config, true).unwrap();
                let archive = open_archive(out.to_str().unwrap(), None, &config).unwrap();
                let entries = read_all(archive.as_ref());
                let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["bgm.ogg", "data.dat", "empty.txt", "sub/first.ks"]);
                for (name, data) in entries.iter() {
                    assert_eq!(*data, expected(name), "{:?} {}", scheme, name);
                }
                let infos: Vec<_> = (0..archive.len())
                    .map(|i| archive.entry_info(i).unwrap())
                    .collect();
                assert!(!infos[0].compressed);
                assert_eq!(infos[1].compressed, compress_files);
                assert!(!infos[2].compressed);
                assert!(!infos[2].encrypted);
                let encrypted = !matches!(scheme, None | Some("none"));
                assert_eq!(infos[1].encrypted, encrypted);
            }
        }
    }

    #[test]
    fn test_pack_flattens_names_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        write_tree(&src);
        let config = ExtraConfig::default();
        let out = dir.path().join("flat.xp3");
        pack(&src, &out, &config, true).unwrap();
        let archive = open_archive(out.to_str().unwrap(), None, &config).unwrap();
        let names: Vec<_> = archive
            .iter_archive_filename()
            .unwrap()
            .map(|n| n.unwrap())
            .collect();
        assert_eq!(names, vec!["bgm.ogg", "data.dat", "empty.txt", "first.ks"]);
    }

    #[test]
    fn test_pack_v2_header() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        write_tree(&src);
        let config = ExtraConfig {
            xp3_version: Xp3Version::V2,
            xp3_compress_files: true,
            xp3_crypt: Some("hash-offset".into()),
            ..Default::default()
        };
        let out = dir.path().join("v2.xp3");
        pack(&src, &out, &config, false).unwrap();
        let raw = std::fs::read(&out).unwrap();
        assert_eq!(&raw[11..19], &[0x17, 0, 0, 0, 0, 0, 0, 0]);
        let archive = open_archive(out.to_str().unwrap(), None, &config).unwrap();
        let entries = read_all(archive.as_ref());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].1, std::fs::read(src.join("data.dat")).unwrap());
    }

    #[test]
    fn test_pack_progress() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        write_tree(&src);
        let out = dir.path().join("progress.xp3");
        let events = pack(&src, &out, &ExtraConfig::default(), false).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            PackProgress::AddingFile {
                index: 0,
                name: "bgm.ogg".into()
            }
        );
        assert_eq!(events[3], PackProgress::WritingIndex);
        assert_eq!(events[4], PackProgress::CompressingIndex);
    }

    #[derive(Debug)]
    struct DecryptOnly;

    impl Crypt for DecryptOnly {
        fn name(&self) -> &str {
            "decrypt-only"
        }

        fn decrypt_byte(&self, _entry: &ArchiveItem, _offset: u64, value: u8) -> u8 {
            !value
        }
    }

    #[test]
    fn test_pack_with_decrypt_only_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        write_tree(&src);
        let mut registry = CryptRegistry::new();
        registry.register(Arc::new(DecryptOnly));
        let config = ExtraConfig {
            xp3_crypt: Some("decrypt-only".into()),
            crypt_registry: Arc::new(registry),
            ..Default::default()
        };
        let err = pack(&src, &dir.path().join("bad.xp3"), &config, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Xp3Error>(),
            Some(Xp3Error::EncryptionNotSupported(name)) if name == "decrypt-only"
        ));
    }

    #[test]
    fn test_open_unrecognized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.xp3");
        std::fs::write(&path, b"definitely not an archive").unwrap();
        assert!(open_archive(path.to_str().unwrap(), None, &ExtraConfig::default()).is_err());
    }

    #[test]
    fn test_archive_creator() {
        assert!(archive_creator("out.xp3", None).is_ok());
        assert!(archive_creator("out.bin", Some(&ArchiveType::KirikiriXp3)).is_ok());
        assert_eq!(
            archive_creator("out.bin", None).unwrap().archive_type(),
            &ArchiveType::KirikiriXp3
        );
    }
}
