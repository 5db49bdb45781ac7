//! LEB128 unsigned varint encoding for operation IDs and terminal refs.

use crate::error::{Error, ErrorKind};
use std::io::{self, Read, Write};

pub fn write_u64(w: &mut impl Write, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            w.write_all(&[byte])?;
            return Ok(());
        }
        w.write_all(&[byte | 0x80])?;
    }
}

pub fn read_u64(r: &mut impl Read) -> Result<u64, Error> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if shift >= 64 {
            return Err(Error::new(ErrorKind::DeserializeMsg).with_context("varint too long"));
        }
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)
            .map_err(|e| Error::new(ErrorKind::DeserializeMsg).with_context(e.to_string()))?;
        result |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}
