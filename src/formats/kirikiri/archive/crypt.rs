//! Byte transforms applied to encrypted XP3 entries.
//!
//! Every transform is keyed by the absolute position of a byte inside the
//! entry, and some of them by the entry's stored Adler-32 as well.
use super::xp3pack::{ArchiveItem, Xp3Error};
use anyhow::Result;
use overf::wrapping;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type CryptRef = Arc<dyn Crypt + Send + Sync>;

/// A cipher scheme applied per entry.
pub trait Crypt: std::fmt::Debug {
    /// Name the scheme is registered under.
    fn name(&self) -> &str;

    /// Whether the stored checksum is computed over the encrypted bytes.
    fn hash_after_crypt(&self) -> bool {
        false
    }

    fn decrypt_byte(&self, entry: &ArchiveItem, offset: u64, value: u8) -> u8;

    /// Decrypt `buf` in place. `offset` is the position of `buf[0]` within the entry.
    fn decrypt(&self, entry: &ArchiveItem, offset: u64, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.decrypt_byte(entry, offset + i as u64, *b);
        }
    }

    /// Encrypt `buf` in place. Schemes without an inverse keep this default.
    fn encrypt(&self, _entry: &ArchiveItem, _offset: u64, _buf: &mut [u8]) -> Result<()> {
        Err(Xp3Error::EncryptionNotSupported(self.name().to_string()).into())
    }
}

lazy_static::lazy_static! {
    static ref NO_CRYPT: CryptRef = Arc::new(NoCrypt);
}

/// The shared identity cipher bound to unencrypted entries.
pub fn no_crypt() -> CryptRef {
    NO_CRYPT.clone()
}

#[derive(Debug, Default)]
pub struct NoCrypt;

impl Crypt for NoCrypt {
    fn name(&self) -> &str {
        "none"
    }

    fn decrypt_byte(&self, _entry: &ArchiveItem, _offset: u64, value: u8) -> u8 {
        value
    }

    fn decrypt(&self, _entry: &ArchiveItem, _offset: u64, _buf: &mut [u8]) {}

    fn encrypt(&self, _entry: &ArchiveItem, _offset: u64, _buf: &mut [u8]) -> Result<()> {
        Ok(())
    }
}

/// XOR with a single fixed byte.
#[derive(Debug)]
pub struct XorCrypt {
    key: u8,
    name: String,
}

impl XorCrypt {
    pub fn new(key: u8) -> Self {
        Self {
            key,
            name: format!("xor:{:02x}", key),
        }
    }
}

impl Crypt for XorCrypt {
    fn name(&self) -> &str {
        &self.name
    }

    fn decrypt_byte(&self, _entry: &ArchiveItem, _offset: u64, value: u8) -> u8 {
        value ^ self.key
    }

    fn decrypt(&self, _entry: &ArchiveItem, _offset: u64, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b ^= self.key;
        }
    }

    fn encrypt(&self, entry: &ArchiveItem, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.decrypt(entry, offset, buf);
        Ok(())
    }
}

const FIXUP_XOR_KEY: u8 = 0x36;
const FIXUPS: [(u64, u8); 2] = [(0x13, 0x01), (0x2ea29, 0x03)];

/// XOR with 0x36 plus two extra bit flips at fixed positions.
///
/// The key does not depend on the content, so the checksum is taken over the
/// encrypted bytes.
#[derive(Debug, Default)]
pub struct FixupXorCrypt;

impl Crypt for FixupXorCrypt {
    fn name(&self) -> &str {
        "fixup-xor"
    }

    fn hash_after_crypt(&self) -> bool {
        true
    }

    fn decrypt_byte(&self, _entry: &ArchiveItem, offset: u64, value: u8) -> u8 {
        let value = match FIXUPS.iter().find(|(pos, _)| *pos == offset) {
            Some((_, mask)) => value ^ mask,
            None => value,
        };
        value ^ FIXUP_XOR_KEY
    }

    fn decrypt(&self, _entry: &ArchiveItem, offset: u64, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b ^= FIXUP_XOR_KEY;
        }
        let end = offset + buf.len() as u64;
        for (pos, mask) in FIXUPS {
            if pos >= offset && pos < end {
                buf[(pos - offset) as usize] ^= mask;
            }
        }
    }

    fn encrypt(&self, entry: &ArchiveItem, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.decrypt(entry, offset, buf);
        Ok(())
    }
}

/// XOR followed by a bit rotation, both derived from the entry checksum.
#[derive(Debug, Default)]
pub struct RotateXorCrypt;

impl RotateXorCrypt {
    /// Returns `(xor mask, rotate amount)`.
    fn keys(hash: u32) -> (u8, u32) {
        let mut shift = hash & 0xff;
        if shift == 0 {
            shift = 0x0f;
        }
        let mut xor = (hash >> 8) as u8;
        if xor == 0 {
            xor = 0xf0;
        }
        (xor, shift)
    }
}

impl Crypt for RotateXorCrypt {
    fn name(&self) -> &str {
        "rotate-xor"
    }

    fn decrypt_byte(&self, entry: &ArchiveItem, _offset: u64, value: u8) -> u8 {
        let (xor, shift) = Self::keys(entry.hash);
        (value ^ xor).rotate_right(shift)
    }

    fn decrypt(&self, entry: &ArchiveItem, _offset: u64, buf: &mut [u8]) {
        let (xor, shift) = Self::keys(entry.hash);
        for b in buf.iter_mut() {
            *b = (*b ^ xor).rotate_right(shift);
        }
    }

    fn encrypt(&self, entry: &ArchiveItem, _offset: u64, buf: &mut [u8]) -> Result<()> {
        let (xor, shift) = Self::keys(entry.hash);
        for b in buf.iter_mut() {
            *b = b.rotate_left(shift) ^ xor;
        }
        Ok(())
    }
}

/// Per-byte key `hash ^ offset`; bits 1, 2 and 3 of the key enable an XOR,
/// an addition and a subtraction.
#[derive(Debug, Default)]
pub struct HashOffsetCrypt;

impl HashOffsetCrypt {
    fn key(entry: &ArchiveItem, offset: u64) -> u32 {
        entry.hash ^ offset as u32
    }

    fn xor_mask(key: u32) -> u8 {
        (key >> (key & 0x18)) as u8
    }
}

impl Crypt for HashOffsetCrypt {
    fn name(&self) -> &str {
        "hash-offset"
    }

    fn decrypt_byte(&self, entry: &ArchiveItem, offset: u64, value: u8) -> u8 {
        let key = Self::key(entry, offset);
        let mut value = value;
        if key & 2 != 0 {
            value ^= Self::xor_mask(key);
        }
        if key & 4 != 0 {
            let add = (key >> 8) as u8;
            value = wrapping! { value + add };
        }
        if key & 8 != 0 {
            let sub = (key >> 16) as u8;
            value = wrapping! { value - sub };
        }
        value
    }

    fn encrypt(&self, entry: &ArchiveItem, offset: u64, buf: &mut [u8]) -> Result<()> {
        for (i, b) in buf.iter_mut().enumerate() {
            let key = Self::key(entry, offset + i as u64);
            let mut value = *b;
            if key & 8 != 0 {
                let sub = (key >> 16) as u8;
                value = wrapping! { value + sub };
            }
            if key & 4 != 0 {
                let add = (key >> 8) as u8;
                value = wrapping! { value - add };
            }
            if key & 2 != 0 {
                value ^= Self::xor_mask(key);
            }
            *b = value;
        }
        Ok(())
    }
}

const ZONE_BOUNDARY: u64 = 0x65;

/// Two XOR zones: the head uses `hash >> 4`, the rest cycles through the
/// bytes of the checksum with each byte pair swapped.
#[derive(Debug, Default)]
pub struct ZonedXorCrypt;

impl ZonedXorCrypt {
    fn swap_byte_pairs(hash: u32) -> u32 {
        ((hash & 0xff00ff00) >> 8) | ((hash & 0x00ff00ff) << 8)
    }

    fn mask(hash: u32, swapped: u32, offset: u64) -> u8 {
        if offset < ZONE_BOUNDARY {
            (hash >> 4) as u8
        } else {
            let shift = ((offset - ZONE_BOUNDARY) & 3) * 8;
            (swapped >> shift) as u8
        }
    }
}

impl Crypt for ZonedXorCrypt {
    fn name(&self) -> &str {
        "zoned-xor"
    }

    fn decrypt_byte(&self, entry: &ArchiveItem, offset: u64, value: u8) -> u8 {
        let swapped = Self::swap_byte_pairs(entry.hash);
        value ^ Self::mask(entry.hash, swapped, offset)
    }

    fn decrypt(&self, entry: &ArchiveItem, offset: u64, buf: &mut [u8]) {
        let swapped = Self::swap_byte_pairs(entry.hash);
        for (i, b) in buf.iter_mut().enumerate() {
            *b ^= Self::mask(entry.hash, swapped, offset + i as u64);
        }
    }

    fn encrypt(&self, entry: &ArchiveItem, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.decrypt(entry, offset, buf);
        Ok(())
    }
}

/// Named cipher schemes.
///
/// Built once, then handed to the reader and writer through
/// [crate::types::ExtraConfig].
#[derive(Debug)]
pub struct CryptRegistry {
    schemes: BTreeMap<String, CryptRef>,
}

impl CryptRegistry {
    /// A registry holding the built-in schemes.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(no_crypt());
        registry.register(Arc::new(FixupXorCrypt));
        registry.register(Arc::new(RotateXorCrypt));
        registry.register(Arc::new(HashOffsetCrypt));
        registry.register(Arc::new(ZonedXorCrypt));
        registry
    }

    pub fn empty() -> Self {
        Self {
            schemes: BTreeMap::new(),
        }
    }

    /// Add a scheme, replacing any scheme with the same name.
    pub fn register(&mut self, crypt: CryptRef) {
        self.schemes.insert(crypt.name().to_string(), crypt);
    }

    /// Look up a scheme by name. `xor:<hex byte>` builds a fixed XOR scheme.
    pub fn get(&self, name: &str) -> Result<CryptRef> {
        if let Some(crypt) = self.schemes.get(name) {
            return Ok(crypt.clone());
        }
        if let Some(key) = name.strip_prefix("xor:") {
            let key = key.trim_start_matches("0x");
            return match u8::from_str_radix(key, 16) {
                Ok(key) => Ok(Arc::new(XorCrypt::new(key))),
                Err(_) => Err(Xp3Error::UnknownScheme(name.to_string()).into()),
            };
        }
        Err(Xp3Error::UnknownScheme(name.to_string()).into())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemes.keys().map(|s| s.as_str())
    }
}

impl Default for CryptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(hash: u32, crypt: CryptRef) -> ArchiveItem {
        let mut item = ArchiveItem::new("test.bin");
        item.hash = hash;
        item.is_encrypted = true;
        item.crypt = crypt;
        item
    }

    fn sample(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect()
    }

    fn all_schemes() -> Vec<CryptRef> {
        vec![
            no_crypt(),
            Arc::new(XorCrypt::new(0x5a)),
            Arc::new(FixupXorCrypt),
            Arc::new(RotateXorCrypt),
            Arc::new(HashOffsetCrypt),
            Arc::new(ZonedXorCrypt),
        ]
    }

    const HASHES: [u32; 5] = [0, 0x11223344, 0xdeadbeef, 0x000000ff, 0xffff0000];
    const OFFSETS: [u64; 6] = [0, 0x10, 0x60, 0x64, 0x2ea20, 0x1_0000_0003];

    #[test]
    fn test_encrypt_then_decrypt_restores_input() {
        for crypt in all_schemes() {
            for hash in HASHES {
                let entry = item(hash, crypt.clone());
                for offset in OFFSETS {
                    let plain = sample(0x40, hash ^ offset as u32);
                    let mut data = plain.clone();
                    crypt.encrypt(&entry, offset, &mut data).unwrap();
                    crypt.decrypt(&entry, offset, &mut data);
                    assert_eq!(
                        data,
                        plain,
                        "{} hash={:08x} offset={:x}",
                        crypt.name(),
                        hash,
                        offset
                    );
                }
            }
        }
    }

    #[test]
    fn test_single_byte_and_bulk_decrypt_agree() {
        for crypt in all_schemes() {
            for hash in HASHES {
                let entry = item(hash, crypt.clone());
                for offset in OFFSETS {
                    let data = sample(0x30, hash.rotate_left(3) ^ offset as u32);
                    let mut bulk = data.clone();
                    crypt.decrypt(&entry, offset, &mut bulk);
                    let single: Vec<u8> = data
                        .iter()
                        .enumerate()
                        .map(|(i, &b)| crypt.decrypt_byte(&entry, offset + i as u64, b))
                        .collect();
                    assert_eq!(
                        bulk,
                        single,
                        "{} hash={:08x} offset={:x}",
                        crypt.name(),
                        hash,
                        offset
                    );
                }
            }
        }
    }

    #[test]
    fn test_encrypt_is_chunk_independent() {
        for crypt in all_schemes() {
            let entry = item(0xcafebabe, crypt.clone());
            let plain = sample(0x100, 7);
            let mut whole = plain.clone();
            crypt.encrypt(&entry, 0x50, &mut whole).unwrap();
            let mut pieces = plain.clone();
            let (head, tail) = pieces.split_at_mut(0x1b);
            crypt.encrypt(&entry, 0x50, head).unwrap();
            crypt.encrypt(&entry, 0x50 + 0x1b, tail).unwrap();
            assert_eq!(whole, pieces, "{}", crypt.name());
        }
    }

    #[test]
    fn test_fixup_xor_positions() {
        let crypt = FixupXorCrypt;
        let entry = item(0, Arc::new(FixupXorCrypt));
        let mut data = vec![0u8; 0x2ea2a];
        crypt.decrypt(&entry, 0, &mut data);
        assert_eq!(data[0x13], 0x36 ^ 1);
        assert_eq!(data[0x2ea29], 0x36 ^ 3);
        for (i, b) in data.iter().enumerate() {
            if i != 0x13 && i != 0x2ea29 {
                assert_eq!(*b, 0x36, "offset {:x}", i);
            }
        }
        assert_eq!(crypt.decrypt_byte(&entry, 0x13, 0), 0x36 ^ 1);
        assert_eq!(crypt.decrypt_byte(&entry, 0x2ea29, 0), 0x36 ^ 3);
        assert!(crypt.hash_after_crypt());
    }

    #[test]
    fn test_fixup_xor_bulk_with_offset_window() {
        let crypt = FixupXorCrypt;
        let entry = item(0, Arc::new(FixupXorCrypt));
        let mut data = vec![0u8; 8];
        crypt.decrypt(&entry, 0x2ea25, &mut data);
        assert_eq!(data, vec![0x36, 0x36, 0x36, 0x36, 0x35, 0x36, 0x36, 0x36]);
    }

    #[test]
    fn test_zoned_xor_masks() {
        let crypt = ZonedXorCrypt;
        let entry = item(0x11223344, Arc::new(ZonedXorCrypt));
        assert_eq!(ZonedXorCrypt::swap_byte_pairs(0x11223344), 0x22114433);
        assert_eq!(crypt.decrypt_byte(&entry, 0, 0), (0x11223344u32 >> 4) as u8);
        assert_eq!(crypt.decrypt_byte(&entry, 0x64, 0), 0x34);
        assert_eq!(crypt.decrypt_byte(&entry, 0x65, 0), 0x33);
        assert_eq!(crypt.decrypt_byte(&entry, 0x66, 0), 0x44);
        assert_eq!(crypt.decrypt_byte(&entry, 0x67, 0), 0x11);
        assert_eq!(crypt.decrypt_byte(&entry, 0x68, 0), 0x22);
        assert_eq!(crypt.decrypt_byte(&entry, 0x69, 0), 0x33);
    }

    #[test]
    fn test_rotate_xor_key_clamping() {
        assert_eq!(RotateXorCrypt::keys(0), (0xf0, 0x0f));
        assert_eq!(RotateXorCrypt::keys(0x0000_1203), (0x12, 0x03));
        let crypt = RotateXorCrypt;
        let entry = item(0x0000_1203, Arc::new(RotateXorCrypt));
        // (0x81 ^ 0x12) = 0x93, rotated right by 3 = 0x72
        assert_eq!(crypt.decrypt_byte(&entry, 0, 0x81), 0x72);
    }

    #[test]
    fn test_hash_offset_conditional_steps() {
        let crypt = HashOffsetCrypt;
        // key = 0x00030200: no condition bit set
        let entry = item(0x0003_0200, Arc::new(HashOffsetCrypt));
        assert_eq!(crypt.decrypt_byte(&entry, 0, 0x40), 0x40);
        // key = 0x00030204: addition of 0x02
        assert_eq!(crypt.decrypt_byte(&entry, 4, 0x40), 0x42);
        // key = 0x00030208: subtraction of 0x03
        assert_eq!(crypt.decrypt_byte(&entry, 8, 0x40), 0x3d);
        // key = 0x00030202: xor with low byte of the unshifted key
        assert_eq!(crypt.decrypt_byte(&entry, 2, 0x40), 0x40 ^ 0x02);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CryptRegistry::new();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            vec!["fixup-xor", "hash-offset", "none", "rotate-xor", "zoned-xor"]
        );
        assert_eq!(registry.get("zoned-xor").unwrap().name(), "zoned-xor");
        assert_eq!(registry.get("xor:5a").unwrap().name(), "xor:5a");
        assert_eq!(registry.get("xor:0x5A").unwrap().name(), "xor:5a");
        let err = registry.get("missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Xp3Error>(),
            Some(Xp3Error::UnknownScheme(_))
        ));
        assert!(registry.get("xor:zz").is_err());
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
    fn test_scheme_without_inverse_refuses_encryption() {
        let crypt = DecryptOnly;
        let entry = item(0, Arc::new(DecryptOnly));
        let mut data = vec![1u8, 2, 3];
        let err = crypt.encrypt(&entry, 0, &mut data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Xp3Error>(),
            Some(Xp3Error::EncryptionNotSupported(name)) if name == "decrypt-only"
        ));
        crypt.decrypt(&entry, 0, &mut data);
        assert_eq!(data, vec![0xfe, 0xfd, 0xfc]);
    }
}
