use crate::common::phys::PhysLayer;
use crate::decode::PhysDecodeLevel;
use crate::error::InternalError;

/// Receive buffer that accumulates bytes from a stream until a full frame is available
pub(crate) struct ReadBuffer {
    buffer: Vec<u8>,
    begin: usize,
    end: usize,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        ReadBuffer {
            buffer: vec![0; capacity],
            begin: 0,
            end: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.begin
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// discard any buffered bytes
    pub(crate) fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }

    pub(crate) fn read(&mut self, count: usize) -> Result<&[u8], InternalError> {
        if self.len() < count {
            return Err(InternalError::InsufficientBytesForRead(count, self.len()));
        }

        match self.buffer.get(self.begin..(self.begin + count)) {
            Some(ret) => {
                self.begin += count;
                Ok(ret)
            }
            None => Err(InternalError::InsufficientBytesForRead(count, self.len())),
        }
    }

    pub(crate) fn peek_at(&self, idx: usize) -> Result<u8, InternalError> {
        if self.len() <= idx {
            return Err(InternalError::InsufficientBytesForRead(idx + 1, self.len()));
        }
        self.buffer
            .get(self.begin + idx)
            .copied()
            .ok_or(InternalError::InsufficientBytesForRead(idx + 1, self.len()))
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, InternalError> {
        let value = self.peek_at(0)?;
        self.begin += 1;
        Ok(value)
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, InternalError> {
        let high = self.read_u8()?;
        let low = self.read_u8()?;
        Ok(u16::from_be_bytes([high, low]))
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16, InternalError> {
        let low = self.read_u8()?;
        let high = self.read_u8()?;
        Ok(u16::from_le_bytes([low, high]))
    }

    pub(crate) async fn read_some(
        &mut self,
        io: &mut PhysLayer,
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        // reset the indices when empty so that we can make the biggest read possible
        if self.is_empty() {
            self.begin = 0;
            self.end = 0;
        }

        // shift the unread bytes to the front if the tail is full
        if self.end == self.buffer.len() {
            let length = self.len();
            self.buffer.copy_within(self.begin..self.end, 0);
            self.begin = 0;
            self.end = length;
        }

        let count = io.read(&mut self.buffer[self.end..], decode_level).await?;

        if count == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        self.end += count;
        Ok(count)
    }
}
