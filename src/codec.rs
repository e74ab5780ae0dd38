//! Wire-level primitives shared by the transaction and script codecs.
//!
//! Everything here operates on plain byte slices with an explicit cursor.
//! Integers are little-endian; variable-length integers use the standard
//! 0xFD/0xFE/0xFF prefix classes. Reads past the end of the buffer are hard
//! errors, never truncated values.

use std::fmt;

/// Failure to interpret a byte buffer. Parse errors abort the enclosing
/// operation; they are never folded into a verification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer ended before a field was complete.
    UnexpectedEnd { needed: usize, have: usize },
    /// Bytes remained after the outermost structure was fully decoded.
    TrailingData { remaining: usize },
    /// A push opcode declared more payload than the script contains.
    TruncatedPush { declared: usize, have: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedEnd { needed, have } => {
                write!(f, "unexpected end of data: needed {needed} bytes, have {have}")
            }
            ParseError::TrailingData { remaining } => {
                write!(f, "{remaining} trailing bytes after transaction")
            }
            ParseError::TruncatedPush { declared, have } => {
                write!(f, "push declares {declared} bytes but only {have} remain")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Cursor over an immutable byte slice.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Consumes exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::UnexpectedEnd {
                needed: n,
                have: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, ParseError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, ParseError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i64(&mut self) -> Result<i64, ParseError> {
        Ok(self.read_u64()? as i64)
    }

    /// Variable-length integer: a single byte below 0xFD, otherwise a
    /// 0xFD/0xFE/0xFF prefix followed by a 2/4/8-byte little-endian value.
    pub fn read_varint(&mut self) -> Result<u64, ParseError> {
        match self.read_u8()? {
            0xfd => Ok(self.read_u16()? as u64),
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            n => Ok(n as u64),
        }
    }

    /// Varint byte count followed by that many raw bytes.
    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8], ParseError> {
        let len = self.read_varint()? as usize;
        self.take(len)
    }

    /// Fails unless the cursor consumed the whole buffer.
    pub fn expect_end(&self) -> Result<(), ParseError> {
        if self.remaining() != 0 {
            return Err(ParseError::TrailingData {
                remaining: self.remaining(),
            });
        }
        Ok(())
    }
}

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Minimal varint encoding: the smallest prefix class that fits the value.
pub fn put_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            put_u16(out, value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            put_u32(out, value as u32);
        }
        _ => {
            out.push(0xff);
            put_u64(out, value);
        }
    }
}

pub fn put_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    put_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}
