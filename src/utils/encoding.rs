//! Conversions for the UTF-16LE names stored in archive directories.
/// Decode UTF-16LE bytes. Unpaired surrogates are replaced with U+FFFD.
pub fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    match String::from_utf16(&units) {
        Ok(s) => s,
        Err(_) => {
            tracing::warn!("Name contains invalid UTF-16, replacing bad code units");
            crate::COUNTER.inc_warning();
            String::from_utf16_lossy(&units)
        }
    }
}

/// Encode a string as UTF-16LE. Returns the bytes and the number of code units.
pub fn encode_utf16le(data: &str) -> (Vec<u8>, usize) {
    let units: Vec<u16> = data.encode_utf16().collect();
    let mut buf = Vec::with_capacity(units.len() * 2);
    for unit in &units {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
    (buf, units.len())
}

#[test]
fn test_decode_utf16le() {
    assert_eq!(decode_utf16le(&[0x61, 0, 0x62, 0]), "ab");
    assert_eq!(
        decode_utf16le(&[0x2d, 0x4e, 0x87, 0x65]),
        "\u{4e2d}\u{6587}"
    );
    // lone high surrogate
    assert_eq!(decode_utf16le(&[0x00, 0xd8, 0x61, 0x00]), "\u{fffd}a");
}

#[test]
fn test_encode_utf16le() {
    let (buf, units) = encode_utf16le("a\u{1f600}");
    assert_eq!(units, 3);
    assert_eq!(buf, vec![0x61, 0x00, 0x3d, 0xd8, 0x00, 0xde]);
    assert_eq!(decode_utf16le(&buf), "a\u{1f600}");
}
