use crate::error::{AduParseError, InternalError};
use std::ops::Range;

/// read-only cursor over a PDU body
pub(crate) struct ReadCursor<'a> {
    src: &'a [u8],
}

impl<'a> ReadCursor<'a> {
    pub(crate) fn new(src: &'a [u8]) -> ReadCursor<'a> {
        ReadCursor { src }
    }

    pub(crate) fn len(&self) -> usize {
        self.src.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub(crate) fn expect_empty(&self) -> Result<(), AduParseError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AduParseError::TrailingBytes(self.len()))
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, AduParseError> {
        match self.src.split_first() {
            Some((first, rest)) => {
                self.src = rest;
                Ok(*first)
            }
            None => Err(AduParseError::InsufficientBytes),
        }
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, AduParseError> {
        let high = self.read_u8()?;
        let low = self.read_u8()?;
        Ok(((high as u16) << 8) | (low as u16))
    }

    pub(crate) fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], AduParseError> {
        match (self.src.get(0..count), self.src.get(count..)) {
            (Some(first), Some(rest)) => {
                self.src = rest;
                Ok(first)
            }
            _ => Err(AduParseError::InsufficientBytes),
        }
    }
}

/// write cursor over a fixed-size frame buffer
pub(crate) struct WriteCursor<'a> {
    dest: &'a mut [u8],
    pos: usize,
}

impl<'a> WriteCursor<'a> {
    pub(crate) fn new(dest: &'a mut [u8]) -> WriteCursor<'a> {
        WriteCursor { dest, pos: 0 }
    }

    pub(crate) fn get(&self, range: Range<usize>) -> Option<&[u8]> {
        self.dest.get(range)
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.dest.len() - self.pos
    }

    pub(crate) fn seek_from_current(&mut self, count: usize) -> Result<(), InternalError> {
        if self.remaining() < count {
            return Err(InternalError::BadSeekOperation);
        }
        self.pos += count;
        Ok(())
    }

    pub(crate) fn seek_from_start(&mut self, count: usize) -> Result<(), InternalError> {
        if self.dest.len() < count {
            return Err(InternalError::BadSeekOperation);
        }
        self.pos = count;
        Ok(())
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> Result<(), InternalError> {
        match self.dest.get_mut(self.pos) {
            Some(x) => {
                *x = value;
                self.pos += 1;
                Ok(())
            }
            None => Err(InternalError::InsufficientWriteSpace(1, 0)),
        }
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), InternalError> {
        if self.remaining() < bytes.len() {
            return Err(InternalError::InsufficientWriteSpace(
                bytes.len(),
                self.remaining(),
            ));
        }
        self.dest[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    pub(crate) fn write_u16_be(&mut self, value: u16) -> Result<(), InternalError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub(crate) fn write_u16_le(&mut self, value: u16) -> Result<(), InternalError> {
        self.write_bytes(&value.to_le_bytes())
    }
}
