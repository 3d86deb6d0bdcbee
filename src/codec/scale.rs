//! Minimal SCALE writer: little-endian fixed-width ints, compact lengths,
//! one-byte enum tags.

#[derive(Debug, Default)]
pub struct ScaleWriter {
    buf: Vec<u8>,
}

impl ScaleWriter {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(192) }
    }

    pub fn variant(&mut self, index: u8) -> &mut Self {
        self.buf.push(index);
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn compact(&mut self, n: u64) -> &mut Self {
        match n {
            0..=0x3f => self.buf.push((n as u8) << 2),
            0x40..=0x3fff => self.buf.extend_from_slice(&(((n as u16) << 2) | 0b01).to_le_bytes()),
            0x4000..=0x3fff_ffff => {
                self.buf.extend_from_slice(&(((n as u32) << 2) | 0b10).to_le_bytes())
            }
            _ => {
                let bytes = n.to_le_bytes();
                let len = 8 - (n.leading_zeros() / 8) as usize;
                self.buf.push((((len - 4) as u8) << 2) | 0b11);
                self.buf.extend_from_slice(&bytes[..len]);
            }
        }
        self
    }

    /// Compact length prefix followed by the UTF-8 bytes.
    pub fn str(&mut self, s: &str) -> &mut Self {
        self.compact(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact(n: u64) -> Vec<u8> {
        ScaleWriter::new().compact(n).finish()
    }

    #[test]
    fn test_compact_modes() {
        assert_eq!(compact(0), vec![0x00]);
        assert_eq!(compact(1), vec![0x04]);
        assert_eq!(compact(63), vec![0xfc]);
        assert_eq!(compact(64), vec![0x01, 0x01]);
        assert_eq!(compact(16383), vec![0xfd, 0xff]);
        assert_eq!(compact(16384), vec![0x02, 0x00, 0x01, 0x00]);
        assert_eq!(compact(1 << 30), vec![0x03, 0x00, 0x00, 0x00, 0x40]);
    }

    #[test]
    fn test_string_and_ints() {
        let bytes = ScaleWriter::new().str("abc").i64(-1).variant(1).finish();
        assert_eq!(&bytes[..4], &[0x0c, b'a', b'b', b'c']);
        assert_eq!(&bytes[4..12], &[0xff; 8]);
        assert_eq!(bytes[12], 1);
    }
}
