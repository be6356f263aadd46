//! Little-endian byte codec helpers for the persisted snapshot formats
//!
//! The native structs embedded in serialized navigation data are written
//! field by field so the wire format stays stable across platforms.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use glam::Vec3;

use crate::{Error, Result};

/// Growable little-endian writer over an owned buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian reader over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.cursor.position() >= self.cursor.get_ref().len() as u64
    }

    pub fn remaining(&self) -> usize {
        (self.cursor.get_ref().len() as u64).saturating_sub(self.cursor.position()) as usize
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.cursor.read_i32::<LittleEndian>()?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(self.cursor.read_f32::<LittleEndian>()?)
    }

    pub fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len > self.remaining() {
            return Err(Error::InvalidParam(format!(
                "truncated data: need {} bytes, have {}",
                len,
                self.remaining()
            )));
        }
        let mut out = vec![0u8; len];
        self.cursor.read_exact(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut w = ByteWriter::new();
        w.write_u32(0xDEADBEEF);
        w.write_i32(-42);
        w.write_f32(1.5);
        w.write_vec3(Vec3::new(1.0, 2.0, 3.0));
        w.write_u16(7);
        w.write_u8(9);
        w.write_bytes(b"abc");

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.read_i32().unwrap(), -42);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_vec3().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(r.read_u16().unwrap(), 7);
        assert_eq!(r.read_u8().unwrap(), 9);
        assert_eq!(r.read_bytes(3).unwrap(), b"abc");
        assert!(r.is_eof());
    }

    #[test]
    fn test_truncated_read() {
        let mut r = ByteReader::new(&[1, 2]);
        assert!(r.read_u32().is_err());
    }
}
