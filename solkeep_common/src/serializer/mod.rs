mod defaults;
mod reader;
mod writer;

pub use reader::{Reader, ReaderError};
pub use writer::Writer;

// Binary encoding used by every record persisted on disk
pub trait Serializer {
    fn write(&self, writer: &mut Writer);

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.bytes()
    }

    fn size(&self) -> usize {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.total_write()
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError>
    where Self: Sized;

    // Decode a full value, trailing bytes are rejected
    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError>
    where Self: Sized {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        if reader.size() != 0 {
            return Err(ReaderError::TrailingBytes(reader.size()))
        }
        Ok(value)
    }
}
