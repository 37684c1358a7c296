use crate::exception::ExceptionCode;
use crate::types::{AddressRange, BitVector, MaskWrite};

/// In-memory model of a device's addressable data
///
/// Every accessor covers a whole range and either applies completely or fails with
/// [`ExceptionCode::IllegalDataAddress`] without touching anything. Holding and input
/// register reads are served from the same register bank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessImage {
    coils: BitVector,
    discrete_inputs: BitVector,
    registers: Vec<u16>,
}

impl ProcessImage {
    /// Create an image with every coil and input off and every register zero
    pub fn new(num_coils: usize, num_discrete_inputs: usize, num_registers: usize) -> Self {
        Self {
            coils: BitVector::new(num_coils),
            discrete_inputs: BitVector::new(num_discrete_inputs),
            registers: vec![0; num_registers],
        }
    }

    /// Read a range of coils
    pub fn read_coils(&self, range: AddressRange) -> Result<BitVector, ExceptionCode> {
        read_bits(&self.coils, range)
    }

    /// Overwrite consecutive coils starting at `start`
    pub fn write_coils(&mut self, start: u16, values: &BitVector) -> Result<(), ExceptionCode> {
        let range = checked_range(start, values.len(), self.coils.len())?;
        for (index, value) in range.zip(values.iter()) {
            self.coils.set(index, value);
        }
        Ok(())
    }

    /// Read a range of discrete inputs
    pub fn read_discrete_inputs(&self, range: AddressRange) -> Result<BitVector, ExceptionCode> {
        read_bits(&self.discrete_inputs, range)
    }

    /// Set the value of a discrete input as seen by masters
    pub fn set_discrete_input(&mut self, index: u16, value: bool) -> Result<(), ExceptionCode> {
        if self.discrete_inputs.set(index as usize, value) {
            Ok(())
        } else {
            Err(ExceptionCode::IllegalDataAddress)
        }
    }

    /// Read a range of registers
    pub fn read_registers(&self, range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        self.registers
            .get(range.to_std_range())
            .map(|x| x.to_vec())
            .ok_or(ExceptionCode::IllegalDataAddress)
    }

    /// Overwrite consecutive registers starting at `start`
    pub fn write_registers(&mut self, start: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let range = checked_range(start, values.len(), self.registers.len())?;
        self.registers[range].copy_from_slice(values);
        Ok(())
    }

    /// Apply an AND/OR mask to a register and return its new value
    pub fn mask_write_register(
        &mut self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<u16, ExceptionCode> {
        let register = self
            .registers
            .get_mut(address as usize)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        *register = MaskWrite::new(address, and_mask, or_mask).apply(*register);
        Ok(*register)
    }
}

fn read_bits(bits: &BitVector, range: AddressRange) -> Result<BitVector, ExceptionCode> {
    let range = range.to_std_range();
    if range.end > bits.len() {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(range.filter_map(|index| bits.get(index)).collect())
}

fn checked_range(
    start: u16,
    count: usize,
    len: usize,
) -> Result<std::ops::Range<usize>, ExceptionCode> {
    let start = start as usize;
    let end = start + count;
    if count == 0 || end > len {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coils_round_trip_through_bit_vector() {
        let mut image = ProcessImage::new(24, 0, 0);
        let pattern = BitVector::from_packed(&[0x00, 0xFF, 0x55]);
        image.write_coils(0, &pattern).unwrap();
        assert_eq!(
            image.read_coils(AddressRange::try_from(0, 24).unwrap()),
            Ok(pattern)
        );
        assert_eq!(
            image.read_coils(AddressRange::try_from(8, 2).unwrap()),
            Ok(BitVector::from_packed_with_len(&[0x03], 2).unwrap())
        );
    }

    #[test]
    fn registers_round_trip() {
        let mut image = ProcessImage::new(0, 0, 10_010);
        image.write_registers(9999, &[1, 2, 3]).unwrap();
        assert_eq!(
            image.read_registers(AddressRange::try_from(9999, 3).unwrap()),
            Ok(vec![1, 2, 3])
        );
    }

    #[test]
    fn out_of_range_accesses_fail_without_side_effects() {
        let mut image = ProcessImage::new(8, 8, 4);
        assert_eq!(
            image.read_coils(AddressRange::try_from(7, 2).unwrap()),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            image.read_discrete_inputs(AddressRange::try_from(8, 1).unwrap()),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            image.write_registers(3, &[0xFFFF, 0xFFFF]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            image.write_coils(7, &BitVector::from_packed(&[0xFF])),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            image.mask_write_register(4, 0, 0),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(image, ProcessImage::new(8, 8, 4));
    }

    #[test]
    fn mask_write_is_idempotent() {
        let mut image = ProcessImage::new(0, 0, 1);
        assert_eq!(image.mask_write_register(0, 0xABCD, 0xBCDA), Ok(0x1412));
        assert_eq!(image.mask_write_register(0, 0xABCD, 0xBCDA), Ok(0x1412));
    }

    #[test]
    fn discrete_inputs_are_set_locally() {
        let mut image = ProcessImage::new(0, 4, 0);
        image.set_discrete_input(2, true).unwrap();
        assert_eq!(
            image.read_discrete_inputs(AddressRange::try_from(0, 4).unwrap()),
            Ok(BitVector::from_packed_with_len(&[0x04], 4).unwrap())
        );
        assert_eq!(
            image.set_discrete_input(4, true),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }
}
