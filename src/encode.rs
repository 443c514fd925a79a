use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

use super::errors::{BTCP2PError, Result};

pub trait Encodable {
    fn to_bytes(&self) -> Result<Vec<u8>>;
}

pub trait Decodable {
    fn from_bytes(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

pub fn encode<T: Encodable>(object: &T) -> Result<Vec<u8>> {
    object.to_bytes()
}

pub fn decode<T: Decodable>(bytes: &[u8]) -> Result<T> {
    T::from_bytes(bytes)
}

/// PayloadReader walks a payload front to back, checking every boundary
/// against the real buffer length before it slices.
///
/// A read that runs past the end fails with `PayloadTooShort` and leaves the
/// position where it was.
pub(crate) struct PayloadReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn too_short(&self, len: usize) -> BTCP2PError {
        BTCP2PError::PayloadTooShort {
            needed: self.position().saturating_add(len),
            available: self.cursor.get_ref().len(),
        }
    }

    fn read<T, F>(&mut self, width: usize, read: F) -> Result<T>
    where
        F: FnOnce(&mut Cursor<&'a [u8]>) -> io::Result<T>,
    {
        let start = self.cursor.position();

        read(&mut self.cursor).map_err(|err| {
            self.cursor.set_position(start);
            match err.kind() {
                io::ErrorKind::UnexpectedEof => self.too_short(width),
                _ => BTCP2PError::from(err),
            }
        })
    }

    /// Takes the next `len` bytes or fails with `PayloadTooShort`.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes: &'a [u8] = *self.cursor.get_ref();
        let start = self.position();
        let end = start
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| self.too_short(len))?;

        self.cursor.set_position(end as u64);
        Ok(&bytes[start..end])
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        self.read(N, |cursor| cursor.read_exact(&mut array))?;
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read(1, |cursor| cursor.read_u8())
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        self.read(2, |cursor| cursor.read_u16::<BigEndian>())
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        self.read(4, |cursor| cursor.read_i32::<LittleEndian>())
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.read(4, |cursor| cursor.read_u32::<LittleEndian>())
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.read(8, |cursor| cursor.read_u64::<LittleEndian>())
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        self.read(8, |cursor| cursor.read_i64::<LittleEndian>())
    }
}
