use crate::common::cursor::WriteCursor;
use crate::common::traits::{Loggable, Serialize};
use crate::decode::PduDecodeLevel;
use crate::error::{InternalError, RequestError};
use crate::exception::ExceptionCode;
use crate::types::{coil_to_u16, AddressRange, BitVector, Indexed, MaskWrite, WriteMultiple};

pub(crate) fn calc_bytes_for_bits(num_bits: usize) -> Result<u8, InternalError> {
    let count = num_bits.div_ceil(8);
    u8::try_from(count).map_err(|_| InternalError::BadByteCount(count))
}

pub(crate) fn calc_bytes_for_registers(num_registers: usize) -> Result<u8, InternalError> {
    let count = 2 * num_registers;
    u8::try_from(count).map_err(|_| InternalError::BadByteCount(count))
}

fn write_packed_bits<'a>(
    cursor: &mut WriteCursor,
    bits: impl Iterator<Item = &'a bool>,
) -> Result<(), RequestError> {
    let mut acc: u8 = 0;
    let mut num_bits = 0;
    for bit in bits {
        if *bit {
            acc |= 1 << num_bits;
        }
        num_bits += 1;
        if num_bits == 8 {
            cursor.write_u8(acc)?;
            acc = 0;
            num_bits = 0;
        }
    }
    if num_bits > 0 {
        cursor.write_u8(acc)?;
    }
    Ok(())
}

impl Serialize for AddressRange {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.start)?;
        cursor.write_u16_be(self.count)?;
        Ok(())
    }
}

impl Loggable for AddressRange {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if level.data_headers() {
            write!(f, "{self}")?;
        }
        Ok(())
    }
}

impl Serialize for ExceptionCode {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8((*self).into())?;
        Ok(())
    }
}

impl Serialize for Indexed<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(coil_to_u16(self.value))?;
        Ok(())
    }
}

impl Serialize for Indexed<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(self.value)?;
        Ok(())
    }
}

impl Loggable for Indexed<bool> {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if level.data_headers() {
            write!(f, "{self}")?;
        }
        Ok(())
    }
}

impl Loggable for Indexed<u16> {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if level.data_headers() {
            write!(f, "{self}")?;
        }
        Ok(())
    }
}

impl Serialize for MaskWrite {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.address)?;
        cursor.write_u16_be(self.and_mask)?;
        cursor.write_u16_be(self.or_mask)?;
        Ok(())
    }
}

impl Loggable for MaskWrite {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if level.data_headers() {
            write!(f, "{self}")?;
        }
        Ok(())
    }
}

impl Serialize for WriteMultiple<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.range.serialize(cursor)?;
        cursor.write_u8(calc_bytes_for_bits(self.values.len())?)?;
        write_packed_bits(cursor, self.values.iter())
    }
}

impl Serialize for WriteMultiple<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        self.range.serialize(cursor)?;
        cursor.write_u8(calc_bytes_for_registers(self.values.len())?)?;
        for value in &self.values {
            cursor.write_u16_be(*value)?;
        }
        Ok(())
    }
}

impl Loggable for WriteMultiple<bool> {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if level.data_headers() {
            write!(f, "{}", self.range)?;
        }
        if level.data_values() {
            for x in self.indexed() {
                write!(f, "\n{x}")?;
            }
        }
        Ok(())
    }
}

impl Loggable for WriteMultiple<u16> {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if level.data_headers() {
            write!(f, "{}", self.range)?;
        }
        if level.data_values() {
            for x in self.indexed() {
                write!(f, "\n{x}")?;
            }
        }
        Ok(())
    }
}

/// the byte count and packed bits of a read coils/discrete inputs reply
impl Serialize for BitVector {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        let num_bytes = calc_bytes_for_bits(self.len())?;
        cursor.write_u8(num_bytes)?;
        cursor.write_bytes(self.as_bytes())?;
        Ok(())
    }
}

/// the byte count and values of a read registers reply
impl Serialize for [u16] {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(calc_bytes_for_registers(self.len())?)?;
        for value in self {
            cursor.write_u16_be(*value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize<T: Serialize + ?Sized>(msg: &T) -> Vec<u8> {
        let mut buffer = [0u8; 64];
        let mut cursor = WriteCursor::new(&mut buffer);
        msg.serialize(&mut cursor).unwrap();
        let len = cursor.position();
        buffer[..len].to_vec()
    }

    #[test]
    fn serializes_address_range() {
        let range = AddressRange::try_from(3, 512).unwrap();
        assert_eq!(serialize(&range), [0x00, 0x03, 0x02, 0x00]);
    }

    #[test]
    fn serializes_coil_states() {
        assert_eq!(
            serialize(&Indexed::new(0x0102, true)),
            [0x01, 0x02, 0xFF, 0x00]
        );
        assert_eq!(
            serialize(&Indexed::new(0x0102, false)),
            [0x01, 0x02, 0x00, 0x00]
        );
    }

    #[test]
    fn serializes_mask_write() {
        assert_eq!(
            serialize(&MaskWrite::new(0x0004, 0x00F2, 0x0025)),
            [0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]
        );
    }

    #[test]
    fn serializes_write_multiple_coils_with_zeroed_padding() {
        let request =
            WriteMultiple::from_coils(0x13, vec![true, false, true, true, false, false, true, true, true, false])
                .unwrap();
        assert_eq!(
            serialize(&request),
            [0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
    }

    #[test]
    fn serializes_write_multiple_registers() {
        let request = WriteMultiple::from_registers(0x01, vec![0x000A, 0x0102]).unwrap();
        assert_eq!(
            serialize(&request),
            [0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn serializes_read_replies() {
        let bits = BitVector::from_packed_with_len(&[0xFF, 0xFF], 10).unwrap();
        assert_eq!(serialize(&bits), [0x02, 0xFF, 0x03]);
        let registers: &[u16] = &[0xCAFE, 0x0001];
        assert_eq!(serialize(registers), [0x04, 0xCA, 0xFE, 0x00, 0x01]);
    }

    #[test]
    fn byte_count_must_fit_in_u8() {
        assert_eq!(calc_bytes_for_registers(128), Err(InternalError::BadByteCount(256)));
        assert_eq!(calc_bytes_for_bits(2040), Ok(255));
        assert_eq!(calc_bytes_for_bits(2041), Err(InternalError::BadByteCount(256)));
    }
}
