use thiserror::Error;

use super::Serializer;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Not enough bytes to read {} bytes, {} remaining", needed, remaining)]
    UnexpectedEnd {
        needed: usize,
        remaining: usize
    },
    #[error("{} trailing bytes after value", _0)]
    TrailingBytes(usize),
    #[error("Invalid value")]
    InvalidValue,
    #[error("Invalid UTF-8 string")]
    InvalidString
}

// Cursor over a byte slice, every read is bounds checked
pub struct Reader<'a> {
    bytes: &'a [u8],
    position: usize
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader {
            bytes,
            position: 0
        }
    }

    pub fn read<T: Serializer>(&mut self) -> Result<T, ReaderError> {
        T::read(self)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReaderError> {
        let remaining = self.size();
        if n > remaining {
            return Err(ReaderError::UnexpectedEnd {
                needed: n,
                remaining
            })
        }

        let bytes = &self.bytes[self.position..self.position + n];
        self.position += n;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ReaderError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue)
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ReaderError> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    // Strings are prefixed by their length in bytes
    pub fn read_string(&mut self) -> Result<String, ReaderError> {
        let size = self.read_u32()? as usize;
        let bytes = self.take(size)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ReaderError::InvalidString)
    }

    pub fn read_optional_string(&mut self) -> Result<Option<String>, ReaderError> {
        self.read()
    }

    pub fn read_optional_u64(&mut self) -> Result<Option<u64>, ReaderError> {
        self.read()
    }

    // Bytes not read yet
    pub fn size(&self) -> usize {
        self.bytes.len() - self.position
    }
}
