use adler::Adler32;
use std::io::Read;

/// Computes the Adler-32 of everything read through it.
pub struct Reader<R: Read> {
    inner: R,
    adler: Adler32,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            adler: Adler32::new(),
        }
    }

    pub fn into_checksum(self) -> u32 {
        self.adler.checksum()
    }
}

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.adler.write_slice(&buf[..n]);
        Ok(n)
    }
}

#[test]
fn test_reader_checksum() {
    let data = b"Wikipedia";
    let mut reader = Reader::new(&data[..]);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
    assert_eq!(reader.into_checksum(), 0x11E60398);
}
