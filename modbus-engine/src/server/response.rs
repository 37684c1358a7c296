use crate::common::cursor::WriteCursor;
use crate::common::traits::{Loggable, Serialize};
use crate::decode::PduDecodeLevel;
use crate::error::RequestError;
use crate::types::{AddressRange, BitVector, Indexed};

/// Body of a read coils or read discrete inputs reply
pub(crate) struct BitsReply {
    range: AddressRange,
    bits: BitVector,
}

impl BitsReply {
    pub(crate) fn new(range: AddressRange, bits: BitVector) -> Self {
        Self { range, bits }
    }
}

impl Serialize for BitsReply {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.bits.serialize(cursor)
    }
}

impl Loggable for BitsReply {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if level.data_headers() {
            write!(f, "{}", self.range)?;
        }
        if level.data_values() {
            for (index, value) in self.range.iter().zip(self.bits.iter()) {
                write!(f, "\n{}", Indexed::new(index, value))?;
            }
        }
        Ok(())
    }
}

/// Body of a read holding or read input registers reply
pub(crate) struct RegistersReply {
    range: AddressRange,
    values: Vec<u16>,
}

impl RegistersReply {
    pub(crate) fn new(range: AddressRange, values: Vec<u16>) -> Self {
        Self { range, values }
    }
}

impl Serialize for RegistersReply {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.values.as_slice().serialize(cursor)
    }
}

impl Loggable for RegistersReply {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if level.data_headers() {
            write!(f, "{}", self.range)?;
        }
        if level.data_values() {
            for (index, value) in self.range.iter().zip(self.values.iter()) {
                write!(f, "\n{}", Indexed::new(index, *value))?;
            }
        }
        Ok(())
    }
}
