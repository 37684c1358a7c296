use crate::common::cursor::ReadCursor;
use crate::common::traits::Parse;
use crate::error::RequestError;
use crate::types::{coil_from_u16, AddressRange, Indexed, MaskWrite};

impl Parse for AddressRange {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(AddressRange::try_from(
            cursor.read_u16_be()?,
            cursor.read_u16_be()?,
        )?)
    }
}

impl Parse for Indexed<bool> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(Indexed::new(
            cursor.read_u16_be()?,
            coil_from_u16(cursor.read_u16_be()?)?,
        ))
    }
}

impl Parse for Indexed<u16> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(Indexed::new(cursor.read_u16_be()?, cursor.read_u16_be()?))
    }
}

impl Parse for MaskWrite {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError> {
        Ok(MaskWrite::new(
            cursor.read_u16_be()?,
            cursor.read_u16_be()?,
            cursor.read_u16_be()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AduParseError, InvalidRange};

    #[test]
    fn parse_fails_for_unknown_coil_value() {
        let mut cursor = ReadCursor::new(&[0x00, 0x01, 0xAB, 0xCD]);
        let result = Indexed::<bool>::parse(&mut cursor);
        assert_eq!(result, Err(AduParseError::UnknownCoilState(0xABCD).into()))
    }

    #[test]
    fn parse_succeeds_for_valid_coil_values() {
        let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0xFF, 0x00]);
        assert_eq!(Indexed::<bool>::parse(&mut cursor), Ok(Indexed::new(1, false)));
        assert_eq!(Indexed::<bool>::parse(&mut cursor), Ok(Indexed::new(2, true)));
        assert!(cursor.is_empty());
    }

    #[test]
    fn parse_fails_for_zero_count_range() {
        let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(
            AddressRange::parse(&mut cursor),
            Err(InvalidRange::CountOfZero.into())
        );
    }

    #[test]
    fn parse_mask_write() {
        let mut cursor = ReadCursor::new(&[0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]);
        assert_eq!(
            MaskWrite::parse(&mut cursor),
            Ok(MaskWrite::new(0x0004, 0x00F2, 0x0025))
        );
    }

    #[test]
    fn parse_reports_short_body() {
        let mut cursor = ReadCursor::new(&[0x00, 0x04, 0x00]);
        assert_eq!(
            MaskWrite::parse(&mut cursor),
            Err(AduParseError::InsufficientBytes.into())
        );
    }
}
