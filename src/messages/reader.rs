use crate::{Error, Result};

/// A bounds-checked cursor over the payload of a single frame.
///
/// Every read narrows the remaining slice. Reads never go past the end of
/// the payload the reader was created with, so a malformed message can
/// never consume bytes belonging to the next frame.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes exactly `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_array::<1>().map(|[b]| b)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_array().map(i16::from_be_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_array().map(i32::from_be_bytes)
    }

    /// Consumes exactly `n` bytes without copying them.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::TruncatedBuffer {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a string prefixed by its i32 byte length.
    pub fn read_length_prefixed_string(&mut self) -> Result<&'a str> {
        let len = self.read_i32()?;
        let len = usize::try_from(len).map_err(|_| Error::Framing("negative string length"))?;
        let bytes = self.read_bytes(len)?;
        Ok(std::str::from_utf8(bytes)?)
    }

    /// Reads a string up to the next null byte and consumes the terminator.
    pub fn read_cstring(&mut self) -> Result<&'a str> {
        let Some(end) = self.buf.iter().position(|&b| b == 0) else {
            return Err(Error::Framing("null terminator missing"));
        };
        let bytes = &self.buf[..end];
        self.buf = &self.buf[end + 1..];
        Ok(std::str::from_utf8(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::Reader;
    use crate::Error;

    #[test]
    fn test_read_integers_big_endian() {
        let buf = [0x7f, 0x01, 0x02, 0xff, 0xff, 0xff, 0xfe];
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_u8().unwrap(), 0x7f);
        assert_eq!(reader.read_i16().unwrap(), 0x0102);
        assert_eq!(
            reader.read_i32().unwrap_err().to_string(),
            "truncated buffer: needed 4 bytes but only 3 remain"
        );
    }

    #[test]
    fn test_read_i32_negative() {
        let buf = (-1i32).to_be_bytes();
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_i32().unwrap(), -1);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_bytes_is_exact() {
        let mut reader = Reader::new(b"abcdef");
        assert_eq!(reader.read_bytes(4).unwrap(), b"abcd");
        assert_eq!(reader.remaining(), b"ef");
        assert!(matches!(
            reader.read_bytes(3),
            Err(Error::TruncatedBuffer {
                needed: 3,
                remaining: 2
            })
        ));
        // a failed read leaves the cursor untouched
        assert_eq!(reader.remaining(), b"ef");
    }

    #[test]
    fn test_read_cstring() {
        let mut reader = Reader::new(b"client_encoding\0UTF8\0");
        assert_eq!(reader.read_cstring().unwrap(), "client_encoding");
        assert_eq!(reader.read_cstring().unwrap(), "UTF8");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_cstring_missing_terminator() {
        let mut reader = Reader::new(b"no terminator");
        assert!(matches!(reader.read_cstring(), Err(Error::Framing(_))));
    }

    #[test]
    fn test_read_cstring_invalid_utf8() {
        let mut reader = Reader::new(&[0xc3, 0x28, 0x00]);
        assert!(matches!(reader.read_cstring(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_read_length_prefixed_string() {
        let mut buf = 5i32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"helloworld");
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_length_prefixed_string().unwrap(), "hello");
        assert_eq!(reader.remaining(), b"world");
    }

    #[test]
    fn test_read_length_prefixed_string_invalid_utf8() {
        let mut buf = 2i32.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0xff, 0xfe]);
        let mut reader = Reader::new(&buf);
        assert!(matches!(
            reader.read_length_prefixed_string(),
            Err(Error::Decode(_))
        ));
    }
}
