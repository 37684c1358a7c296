use crate::common::bits::num_bytes_for_bits;
use crate::common::cursor::ReadCursor;
use crate::constants::limits;
use crate::decode::PduDecodeLevel;
use crate::error::{AduParseError, InvalidRange, InvalidRequest, RequestError};

/// Modbus unit identifier, just a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

/// Start and count tuple used when making various requests
/// Cannot be constructed with invalid start/count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

/// Specialized wrapper around an address
/// range only valid for ReadCoils / ReadDiscreteInputs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ReadBitsRange {
    pub(crate) inner: AddressRange,
}

impl ReadBitsRange {
    pub(crate) fn get(self) -> AddressRange {
        self.inner
    }
}

/// Specialized wrapper around an `AddressRange`
/// only valid for ReadHoldingRegisters / ReadInputRegisters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ReadRegistersRange {
    pub(crate) inner: AddressRange,
}

impl ReadRegistersRange {
    pub(crate) fn get(self) -> AddressRange {
        self.inner
    }
}

/// Value and its address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Indexed<T> {
    /// Address of the value
    pub index: u16,
    /// Associated value
    pub value: T,
}

/// Ordered, fixed-length sequence of bits packed 8 per byte, least significant bit first
///
/// This is the wire representation of coils and discrete inputs. Bits beyond `len` in the
/// final byte are always zero.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BitVector {
    bytes: Vec<u8>,
    len: usize,
}

/// Collection of values written to a contiguous range of coils or registers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteMultiple<T> {
    pub(crate) range: AddressRange,
    pub(crate) values: Vec<T>,
}

/// Arguments of a mask write register operation
///
/// The slave computes `(current & and_mask) | (or_mask & !and_mask)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskWrite {
    /// Address of the register
    pub address: u16,
    /// Bits of the current value to keep
    pub and_mask: u16,
    /// Bits to set where the and mask is clear
    pub or_mask: u16,
}

/// Zero-copy type used to iterate over a collection of bits
#[derive(Debug, Copy, Clone)]
pub struct BitIterator<'a> {
    bytes: &'a [u8],
    range: AddressRange,
    pos: u16,
}

pub(crate) struct BitIteratorDisplay<'a> {
    iterator: BitIterator<'a>,
    level: PduDecodeLevel,
}

/// Zero-copy type used to iterate over a collection of registers
#[derive(Debug, Copy, Clone)]
pub struct RegisterIterator<'a> {
    bytes: &'a [u8],
    range: AddressRange,
    pos: u16,
}

pub(crate) struct RegisterIteratorDisplay<'a> {
    iterator: RegisterIterator<'a>,
    level: PduDecodeLevel,
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

impl<'a> BitIterator<'a> {
    pub(crate) fn parse_all(
        range: AddressRange,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<Self, RequestError> {
        let bytes = cursor.read_bytes(num_bytes_for_bits(range.count))?;
        cursor.expect_empty()?;
        Ok(Self {
            bytes,
            range,
            pos: 0,
        })
    }

    /// Collect the remaining bits into a [`BitVector`]
    pub fn to_bit_vector(self) -> BitVector {
        self.map(|x| x.value).collect()
    }
}

impl<'a> BitIteratorDisplay<'a> {
    pub(crate) fn new(level: PduDecodeLevel, iterator: BitIterator<'a>) -> Self {
        Self { iterator, level }
    }
}

impl std::fmt::Display for BitIteratorDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.iterator.range)?;

        if self.level.data_values() {
            for x in self.iterator {
                write!(f, "\n{x}")?;
            }
        }

        Ok(())
    }
}

impl<'a> RegisterIterator<'a> {
    pub(crate) fn parse_all(
        range: AddressRange,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<Self, RequestError> {
        let bytes = cursor.read_bytes(2 * (range.count as usize))?;
        cursor.expect_empty()?;
        Ok(Self {
            bytes,
            range,
            pos: 0,
        })
    }
}

impl<'a> RegisterIteratorDisplay<'a> {
    pub(crate) fn new(level: PduDecodeLevel, iterator: RegisterIterator<'a>) -> Self {
        Self { iterator, level }
    }
}

impl std::fmt::Display for RegisterIteratorDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.iterator.range)?;

        if self.level.data_values() {
            for x in self.iterator {
                write!(f, "\n{x}")?;
            }
        }

        Ok(())
    }
}

impl Iterator for BitIterator<'_> {
    type Item = Indexed<bool>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.range.count {
            return None;
        }
        let byte = self.pos / 8;
        let bit = (self.pos % 8) as u8;

        match self.bytes.get(byte as usize) {
            Some(value) => {
                let bit = (*value & (1 << bit)) != 0;
                let address = self.range.start + self.pos;
                self.pos += 1;
                Some(Indexed::new(address, bit))
            }
            None => None,
        }
    }

    // implementing this allows collect to optimize the vector capacity
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.range.count - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

impl Iterator for RegisterIterator<'_> {
    type Item = Indexed<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.range.count {
            return None;
        }

        let pos = 2 * (self.pos as usize);
        match self.bytes.get(pos..pos + 2) {
            Some([high, low]) => {
                let value = u16::from_be_bytes([*high, *low]);
                let index = self.pos + self.range.start;
                self.pos += 1;
                Some(Indexed::new(index, value))
            }
            _ => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.range.count - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

impl<T> From<(u16, T)> for Indexed<T>
where
    T: Copy,
{
    fn from(tuple: (u16, T)) -> Self {
        let (index, value) = tuple;
        Self::new(index, value)
    }
}

pub(crate) fn coil_from_u16(value: u16) -> Result<bool, AduParseError> {
    match value {
        crate::constants::coil::ON => Ok(true),
        crate::constants::coil::OFF => Ok(false),
        _ => Err(AduParseError::UnknownCoilState(value)),
    }
}

pub(crate) fn coil_to_u16(value: bool) -> u16 {
    if value {
        crate::constants::coil::ON
    } else {
        crate::constants::coil::OFF
    }
}

impl AddressRange {
    /// Create a new address range
    pub fn try_from(start: u16, count: u16) -> Result<Self, InvalidRange> {
        if count == 0 {
            return Err(InvalidRange::CountOfZero);
        }

        let max_start = u16::MAX - (count - 1);

        if start > max_start {
            return Err(InvalidRange::AddressOverflow(start, count));
        }

        Ok(Self { start, count })
    }

    /// Converts to std::ops::Range
    pub fn to_std_range(self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        let end = start + (self.count as usize);
        start..end
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = u16> {
        AddressIterator::new(self.start, self.count)
    }

    pub(crate) fn of_read_bits(self) -> Result<ReadBitsRange, InvalidRange> {
        Ok(ReadBitsRange {
            inner: self.limited_count(limits::MAX_READ_COILS_COUNT)?,
        })
    }

    pub(crate) fn of_read_registers(self) -> Result<ReadRegistersRange, InvalidRange> {
        Ok(ReadRegistersRange {
            inner: self.limited_count(limits::MAX_READ_REGISTERS_COUNT)?,
        })
    }

    fn limited_count(self, limit: u16) -> Result<Self, InvalidRange> {
        if self.count > limit {
            return Err(InvalidRange::CountTooLargeForType(self.count, limit));
        }
        Ok(self)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "start: {:#06X} qty: {}", self.start, self.count)
    }
}

pub(crate) struct AddressIterator {
    current: u16,
    remain: u16,
}

impl AddressIterator {
    pub(crate) fn new(current: u16, remain: u16) -> Self {
        Self { current, remain }
    }
}

impl Iterator for AddressIterator {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        let remain = self.remain.checked_sub(1)?;
        let ret = self.current;
        // the last address of a valid range may be u16::MAX
        self.current = self.current.wrapping_add(1);
        self.remain = remain;
        Some(ret)
    }
}

impl<T> Indexed<T> {
    /// Create a new indexed value
    pub fn new(index: u16, value: T) -> Self {
        Indexed { index, value }
    }
}

impl std::fmt::Display for Indexed<bool> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {}", self.index, self.value as i32)
    }
}

impl std::fmt::Display for Indexed<u16> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {:#06X}", self.index, self.value)
    }
}

impl UnitId {
    /// Create a new UnitId
    pub fn new(value: u8) -> Self {
        Self { value }
    }

    /// Broadcast address (only in RTU)
    pub fn broadcast() -> Self {
        Self { value: 0x00 }
    }

    /// Returns true if the address is reserved in RTU mode
    ///
    /// Users should *not* use reserved addresses in RTU mode.
    pub fn is_rtu_reserved(&self) -> bool {
        self.value >= 248
    }
}

/// Create the default UnitId of `0xFF`
impl Default for UnitId {
    fn default() -> Self {
        Self { value: 0xFF }
    }
}

impl BitVector {
    /// Create a vector of `len` bits, all cleared
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Create a vector from packed bytes, every bit of every byte is used
    pub fn from_packed(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            len: bytes.len() * 8,
        }
    }

    /// Create a vector of `len` bits from packed bytes
    ///
    /// Returns `None` if `bytes` holds fewer than `len` bits. Excess bytes are dropped and
    /// unused high bits of the final byte are cleared.
    pub fn from_packed_with_len(bytes: &[u8], len: usize) -> Option<Self> {
        let num_bytes = len.div_ceil(8);
        let mut bytes = bytes.get(0..num_bytes)?.to_vec();
        let used = len % 8;
        if used != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= (1u8 << used) - 1;
            }
        }
        Some(Self { bytes, len })
    }

    /// Number of bits in the vector
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the vector contains no bits
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Retrieve the bit at `index`
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        let byte = self.bytes.get(index / 8)?;
        Some(byte & (1 << (index % 8)) != 0)
    }

    /// Assign the bit at `index`, returning false if it is out of range
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        if index >= self.len {
            return false;
        }
        match self.bytes.get_mut(index / 8) {
            Some(byte) => {
                let mask = 1 << (index % 8);
                if value {
                    *byte |= mask;
                } else {
                    *byte &= !mask;
                }
                true
            }
            None => false,
        }
    }

    /// Packed wire representation
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Iterate over the bits in order
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bytes[i / 8] & (1 << (i % 8)) != 0)
    }
}

impl FromIterator<bool> for BitVector {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bytes = Vec::new();
        let mut len = 0;
        for bit in iter {
            if len % 8 == 0 {
                bytes.push(0);
            }
            if bit {
                if let Some(last) = bytes.last_mut() {
                    *last |= 1 << (len % 8);
                }
            }
            len += 1;
        }
        Self { bytes, len }
    }
}

impl<T> WriteMultiple<T> {
    fn create(start: u16, values: Vec<T>, limit: u16) -> Result<Self, InvalidRequest> {
        let count = match u16::try_from(values.len()) {
            Ok(x) => x,
            Err(_) => return Err(InvalidRequest::CountTooBigForU16(values.len())),
        };
        let range = AddressRange::try_from(start, count).map_err(InvalidRequest::BadRange)?;
        if count > limit {
            return Err(InvalidRequest::CountTooBigForType(count, limit));
        }
        Ok(Self { range, values })
    }

    /// Address range covered by the values
    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// Values to be written, in address order
    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub(crate) fn indexed(&self) -> impl Iterator<Item = Indexed<T>> + '_
    where
        T: Copy,
    {
        self.range
            .iter()
            .zip(self.values.iter())
            .map(|(index, value)| Indexed::new(index, *value))
    }
}

impl WriteMultiple<bool> {
    /// Create a request to write `values` to consecutive coils beginning at `start`
    pub fn from_coils(start: u16, values: Vec<bool>) -> Result<Self, InvalidRequest> {
        Self::create(start, values, limits::MAX_WRITE_COILS_COUNT)
    }

    /// Create a request to write every bit of `bits` to consecutive coils beginning at `start`
    pub fn from_bits(start: u16, bits: &BitVector) -> Result<Self, InvalidRequest> {
        Self::from_coils(start, bits.iter().collect())
    }
}

impl WriteMultiple<u16> {
    /// Create a request to write `values` to consecutive holding registers beginning at `start`
    pub fn from_registers(start: u16, values: Vec<u16>) -> Result<Self, InvalidRequest> {
        Self::create(start, values, limits::MAX_WRITE_REGISTERS_COUNT)
    }
}

impl MaskWrite {
    /// Create a new mask write request
    pub fn new(address: u16, and_mask: u16, or_mask: u16) -> Self {
        Self {
            address,
            and_mask,
            or_mask,
        }
    }

    /// Compute the value the register holds after the masks are applied to `current`
    pub fn apply(&self, current: u16) -> u16 {
        (current & self.and_mask) | (self.or_mask & !self.and_mask)
    }
}

impl std::fmt::Display for MaskWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "idx: {:#06X} and: {:#06X} or: {:#06X}",
            self.address, self.and_mask, self.or_mask
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_start_max_count_of_one_is_allowed() {
        AddressRange::try_from(u16::MAX, 1).unwrap();
    }

    #[test]
    fn address_maximum_range_is_ok() {
        AddressRange::try_from(0, 0xFFFF).unwrap();
    }

    #[test]
    fn address_count_zero_fails_validation() {
        assert_eq!(AddressRange::try_from(0, 0), Err(InvalidRange::CountOfZero));
    }

    #[test]
    fn start_max_count_of_two_overflows() {
        assert_eq!(
            AddressRange::try_from(u16::MAX, 2),
            Err(InvalidRange::AddressOverflow(u16::MAX, 2))
        );
    }

    #[test]
    fn iterates_up_to_the_last_address() {
        let range = AddressRange::try_from(u16::MAX - 1, 2).unwrap();
        let addresses: Vec<u16> = range.iter().collect();
        assert_eq!(addresses, vec![u16::MAX - 1, u16::MAX]);
    }

    #[test]
    fn read_limits_are_enforced() {
        let bits = AddressRange::try_from(0, 2001).unwrap();
        assert_eq!(
            bits.of_read_bits(),
            Err(InvalidRange::CountTooLargeForType(2001, 2000))
        );
        let registers = AddressRange::try_from(0, 126).unwrap();
        assert_eq!(
            registers.of_read_registers(),
            Err(InvalidRange::CountTooLargeForType(126, 125))
        );
        assert!(AddressRange::try_from(0, 125)
            .unwrap()
            .of_read_registers()
            .is_ok());
    }

    #[test]
    fn correctly_iterates_over_low_order_bits() {
        let mut cursor = ReadCursor::new(&[0x03]);
        let iterator =
            BitIterator::parse_all(AddressRange::try_from(1, 3).unwrap(), &mut cursor).unwrap();
        assert_eq!(iterator.size_hint(), (3, Some(3)));
        let values: Vec<Indexed<bool>> = iterator.collect();
        assert_eq!(
            values,
            vec![
                Indexed::new(1, true),
                Indexed::new(2, true),
                Indexed::new(3, false)
            ]
        );
    }

    #[test]
    fn correctly_iterates_over_registers() {
        let mut cursor = ReadCursor::new(&[0xFF, 0xFF, 0x01, 0xCC]);
        let iterator =
            RegisterIterator::parse_all(AddressRange::try_from(1, 2).unwrap(), &mut cursor)
                .unwrap();

        assert_eq!(iterator.size_hint(), (2, Some(2)));
        let values: Vec<Indexed<u16>> = iterator.collect();
        assert_eq!(
            values,
            vec![Indexed::new(1, 0xFFFF), Indexed::new(2, 0x01CC)]
        );
    }

    #[test]
    fn bit_vector_packs_lsb_first() {
        let bits: BitVector = [true, false, true, true, false, false, false, false, true]
            .into_iter()
            .collect();
        assert_eq!(bits.len(), 9);
        assert_eq!(bits.as_bytes(), &[0x0D, 0x01]);
        assert_eq!(bits.get(8), Some(true));
        assert_eq!(bits.get(9), None);
    }

    #[test]
    fn bit_vector_survives_packing_and_unpacking() {
        let original = BitVector::from_packed(&[0x00, 0xFF, 0x55]);
        let unpacked: Vec<bool> = original.iter().collect();
        assert_eq!(unpacked.len(), 24);
        assert!(unpacked[0..8].iter().all(|x| !x));
        assert!(unpacked[8..16].iter().all(|x| *x));
        assert_eq!(
            &unpacked[16..24],
            &[true, false, true, false, true, false, true, false]
        );
        let repacked: BitVector = unpacked.into_iter().collect();
        assert_eq!(repacked, original);
    }

    #[test]
    fn every_register_value_round_trips() {
        use crate::common::cursor::WriteCursor;
        use crate::common::traits::{Parse, Serialize};

        let mut buffer = [0u8; 4];
        for value in 0..=u16::MAX {
            let expected = Indexed::new(value.wrapping_mul(7), value);
            let mut cursor = WriteCursor::new(&mut buffer);
            expected.serialize(&mut cursor).unwrap();
            let mut cursor = ReadCursor::new(&buffer);
            assert_eq!(Indexed::<u16>::parse(&mut cursor).unwrap(), expected);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn bit_vectors_of_every_length_round_trip() {
        for len in 1..=24usize {
            // every pattern up to 12 bits, longer vectors repeat a 12-bit pattern
            for pattern in 0u32..(1 << len.min(12)) {
                let values: Vec<bool> = (0..len).map(|i| (pattern >> (i % 12)) & 1 == 1).collect();
                let bits: BitVector = values.iter().copied().collect();
                assert_eq!(bits.len(), len);
                assert_eq!(bits.as_bytes().len(), num_bytes_for_bits(len as u16));

                let unpacked = BitVector::from_packed_with_len(bits.as_bytes(), len).unwrap();
                assert_eq!(unpacked, bits);
                assert_eq!(unpacked.iter().collect::<Vec<bool>>(), values);
            }
        }
    }

    #[test]
    fn bit_vector_ignores_unused_high_bits() {
        let bits = BitVector::from_packed_with_len(&[0xFF, 0xFF, 0xAA], 10).unwrap();
        assert_eq!(bits.as_bytes(), &[0xFF, 0x03]);
        assert_eq!(bits.iter().filter(|x| *x).count(), 10);
        assert!(BitVector::from_packed_with_len(&[0xFF], 9).is_none());
    }

    #[test]
    fn bit_vector_set_respects_length() {
        let mut bits = BitVector::new(3);
        assert!(bits.set(2, true));
        assert!(!bits.set(3, true));
        assert_eq!(bits.as_bytes(), &[0x04]);
        assert!(bits.set(2, false));
        assert_eq!(bits.as_bytes(), &[0x00]);
    }

    #[test]
    fn write_multiple_validates_count() {
        assert_eq!(
            WriteMultiple::from_registers(0, Vec::new()),
            Err(InvalidRequest::BadRange(InvalidRange::CountOfZero))
        );
        assert_eq!(
            WriteMultiple::from_registers(0, vec![0; 124]),
            Err(InvalidRequest::CountTooBigForType(124, 123))
        );
        assert_eq!(
            WriteMultiple::from_coils(0, vec![false; 1969]),
            Err(InvalidRequest::CountTooBigForType(1969, 1968))
        );
        assert_eq!(
            WriteMultiple::from_coils(u16::MAX, vec![true, true]),
            Err(InvalidRequest::BadRange(InvalidRange::AddressOverflow(
                u16::MAX,
                2
            )))
        );
        let request = WriteMultiple::from_bits(7, &BitVector::from_packed(&[0x01])).unwrap();
        assert_eq!(request.range(), AddressRange::try_from(7, 8).unwrap());
        assert!(request.values()[0]);
    }

    #[test]
    fn mask_write_formula() {
        let mask = MaskWrite::new(0, 0xF2F2, 0x2525);
        assert_eq!(mask.apply(0x1212), 0x1717);
        let mask = MaskWrite::new(0, 0xABCD, 0xBCDA);
        let once = mask.apply(0x0000);
        assert_eq!(once, 0x1412);
        assert_eq!(mask.apply(once), once);
    }

    #[test]
    fn broadcast_address() {
        assert_eq!(UnitId::broadcast(), UnitId::new(0x00));
    }

    #[test]
    fn rtu_reserved_address() {
        assert!(UnitId::new(248).is_rtu_reserved());
        assert!(UnitId::new(255).is_rtu_reserved());
        assert!(!UnitId::new(41).is_rtu_reserved());
    }
}
