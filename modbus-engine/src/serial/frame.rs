use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader, FrameInfo, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::traits::Serialize;
use crate::decode::AduDecodeLevel;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH + CRC_LENGTH;
}

/// precomputes the CRC table as a constant!
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    ReadFullBody(UnitId, usize),          // unit_id, length of rest
    ReadToOffsetForLength(UnitId, usize), // unit_id, length to length
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LengthMode {
    /// The length is always the same (without function code)
    Fixed(usize),
    /// Read this many bytes, the last of which is the count of bytes that follow
    Offset(usize),
    /// Unknown function code, can't determine the size
    Unknown,
}

/// Parses RTU responses, the body length is implied by the function code
pub(crate) struct RtuParser {
    state: ParseState,
}

impl RtuParser {
    pub(crate) fn new_response_parser() -> Self {
        Self {
            state: ParseState::Start,
        }
    }

    fn length_mode(function_code: u8) -> LengthMode {
        // exceptions carry a single byte
        if function_code & 0x80 != 0 {
            return LengthMode::Fixed(1);
        }

        match FunctionCode::get(function_code) {
            Some(FunctionCode::ReadCoils)
            | Some(FunctionCode::ReadDiscreteInputs)
            | Some(FunctionCode::ReadHoldingRegisters)
            | Some(FunctionCode::ReadInputRegisters) => LengthMode::Offset(1),
            Some(FunctionCode::WriteSingleCoil)
            | Some(FunctionCode::WriteSingleRegister)
            | Some(FunctionCode::WriteMultipleCoils)
            | Some(FunctionCode::WriteMultipleRegisters) => LengthMode::Fixed(4),
            Some(FunctionCode::MaskWriteRegister) => LengthMode::Fixed(6),
            None => LengthMode::Unknown,
        }
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: AduDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                if cursor.len() < 2 {
                    return Ok(None);
                }

                let unit_id = UnitId::new(cursor.read_u8()?);

                // leave the function code in the buffer so the body is read in one piece
                let raw_function_code = cursor.peek_at(0)?;

                self.state = match Self::length_mode(raw_function_code) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(unit_id, length),
                    LengthMode::Offset(offset) => ParseState::ReadToOffsetForLength(unit_id, offset),
                    LengthMode::Unknown => {
                        return Err(FrameParseError::UnknownFunctionCode(raw_function_code).into())
                    }
                };

                self.parse(cursor, decode_level)
            }
            ParseState::ReadToOffsetForLength(unit_id, offset) => {
                if cursor.len() < constants::FUNCTION_CODE_LENGTH + offset {
                    return Ok(None);
                }

                let extra_bytes_to_read =
                    cursor.peek_at(constants::FUNCTION_CODE_LENGTH + offset - 1)? as usize;
                self.state = ParseState::ReadFullBody(unit_id, offset + extra_bytes_to_read);

                self.parse(cursor, decode_level)
            }
            ParseState::ReadFullBody(unit_id, length) => {
                let pdu_length = constants::FUNCTION_CODE_LENGTH + length;
                if pdu_length > crate::common::frame::constants::MAX_ADU_LENGTH {
                    return Err(FrameParseError::FrameLengthTooBig(
                        pdu_length,
                        crate::common::frame::constants::MAX_ADU_LENGTH,
                    )
                    .into());
                }

                if cursor.len() < pdu_length + constants::CRC_LENGTH {
                    return Ok(None);
                }

                let mut frame = Frame::new(FrameHeader::new_rtu_header(unit_id));
                frame.set(cursor.read(pdu_length)?);
                let received_crc = cursor.read_u16_le()?;
                self.state = ParseState::Start;

                let expected_crc = {
                    let mut digest = CRC.digest();
                    digest.update(&[unit_id.value]);
                    digest.update(frame.payload());
                    digest.finalize()
                };

                if received_crc != expected_crc {
                    return Err(FrameParseError::CrcValidationFailure(received_crc, expected_crc).into());
                }

                if decode_level.enabled() {
                    tracing::info!(
                        "RTU RX - {}",
                        RtuDisplay::new(decode_level, unit_id, frame.payload(), received_crc)
                    );
                }

                Ok(Some(frame))
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Start;
    }
}

pub(crate) fn format_rtu_pdu<T: Serialize + ?Sized>(
    cursor: &mut WriteCursor,
    header: FrameHeader,
    function: FunctionField,
    msg: &T,
) -> Result<FrameInfo, RequestError> {
    let start_frame = cursor.position();
    cursor.write_u8(header.unit_id.value)?;
    cursor.write_u8(function.get_value())?;
    let start_pdu_body = cursor.position();
    msg.serialize(cursor)?;
    let end_pdu_body = cursor.position();

    let pdu_length = end_pdu_body - start_pdu_body + constants::FUNCTION_CODE_LENGTH;
    if pdu_length > crate::common::frame::constants::MAX_ADU_LENGTH {
        return Err(InternalError::FrameTooBig(
            pdu_length,
            crate::common::frame::constants::MAX_ADU_LENGTH,
        )
        .into());
    }

    let crc = match cursor.get(start_frame..end_pdu_body) {
        Some(bytes) => CRC.checksum(bytes),
        None => return Err(InternalError::BadSeekOperation.into()),
    };
    cursor.write_u16_le(crc)?;

    Ok(FrameInfo::new(start_pdu_body..end_pdu_body, Some(crc)))
}

pub(crate) struct RtuDisplay<'a> {
    level: AduDecodeLevel,
    unit_id: UnitId,
    payload: &'a [u8],
    crc: u16,
}

impl<'a> RtuDisplay<'a> {
    pub(crate) fn new(level: AduDecodeLevel, unit_id: UnitId, payload: &'a [u8], crc: u16) -> Self {
        RtuDisplay {
            level,
            unit_id,
            payload,
            crc,
        }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "unit: {} crc: {:#06X} (payload len = {})",
            self.unit_id,
            self.crc,
            self.payload.len(),
        )?;
        if self.level.payload_enabled() {
            crate::common::phys::format_bytes(f, self.payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::block_on;
    use tokio_test::io::Builder;

    use crate::common::frame::FramedReader;
    use crate::common::phys::PhysLayer;
    use crate::decode::PhysDecodeLevel;
    use crate::DecodeLevel;

    use super::*;

    const UNIT_ID: u8 = 0x2A;

    const READ_COILS_REQUEST: &[u8] = &[
        UNIT_ID, // unit id
        0x01,    // function code
        0x00, 0x10, // starting address
        0x00, 0x13, // qty of outputs
        0x7A, 0x19, // crc
    ];

    const READ_COILS_RESPONSE: &[u8] = &[
        UNIT_ID, // unit id
        0x01,    // function code
        0x03,    // byte count
        0xCD, 0x6B, 0x05, // output status
        0x44, 0x99, // crc
    ];

    const READ_HOLDING_REGISTERS_RESPONSE: &[u8] = &[
        UNIT_ID, // unit id
        0x03,    // function code
        0x06,    // byte count
        0x12, 0x34, 0x56, 0x78, 0x23, 0x45, // register values
        0x30, 0x60, // crc
    ];

    const WRITE_SINGLE_COIL_RESPONSE: &[u8] = &[
        UNIT_ID, // unit id
        0x05,    // function code
        0x00, 0x10, // output address
        0xFF, 0x00, // output value
        0x8B, 0xE4, // crc
    ];

    const WRITE_MULTIPLE_REGISTERS_RESPONSE: &[u8] = &[
        UNIT_ID, // unit id
        0x10,    // function code
        0x00, 0x10, // starting address
        0x00, 0x02, // qty of outputs
        0x46, 0x16, // crc
    ];

    const MASK_WRITE_REGISTER_RESPONSE: &[u8] = &[
        UNIT_ID, // unit id
        0x16,    // function code
        0x00, 0x04, // address
        0x00, 0xF2, // and mask
        0x00, 0x25, // or mask
        0x24, 0x45, // crc
    ];

    const EXCEPTION_RESPONSE: &[u8] = &[
        UNIT_ID, // unit id
        0x81,    // function code
        0x02,    // exception code
        0xB1, 0x99, // crc
    ];

    struct AddressAndCount {
        address: u16,
        count: u16,
    }

    impl Serialize for AddressAndCount {
        fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            cursor.write_u16_be(self.address)?;
            cursor.write_u16_be(self.count)?;
            Ok(())
        }
    }

    fn parse_in_chunks(bytes: &[u8], split_at: usize) -> Result<Frame, RequestError> {
        let (first, second) = bytes.split_at(split_at);
        let mut builder = Builder::new();
        builder.read(first);
        if !second.is_empty() {
            builder.read(second);
        }
        let mut io = PhysLayer::new_mock(builder.build());
        let mut reader = FramedReader::rtu_response();
        block_on(reader.next_frame(&mut io, DecodeLevel::nothing()))
    }

    fn assert_can_parse_response(bytes: &[u8]) {
        // every possible segmentation yields the same frame
        for split_at in 1..=bytes.len() {
            let frame = parse_in_chunks(bytes, split_at).unwrap();
            assert_eq!(frame.header.unit_id, UnitId::new(UNIT_ID));
            assert_eq!(frame.header.tx_id, None);
            assert_eq!(frame.payload(), &bytes[1..bytes.len() - 2]);
        }
    }

    #[test]
    fn formats_read_coils_request() {
        let mut buffer = [0u8; constants::MAX_FRAME_LENGTH];
        let mut cursor = WriteCursor::new(&mut buffer);
        let info = format_rtu_pdu(
            &mut cursor,
            FrameHeader::new_rtu_header(UnitId::new(UNIT_ID)),
            FunctionField::Valid(FunctionCode::ReadCoils),
            &AddressAndCount {
                address: 0x10,
                count: 0x13,
            },
        )
        .unwrap();
        let len = cursor.position();

        assert_eq!(&buffer[..len], READ_COILS_REQUEST);
        assert_eq!(info.pdu_body, 2..6);
        assert_eq!(info.crc, Some(0x197A));
    }

    #[test]
    fn can_parse_read_coils_response() {
        assert_can_parse_response(READ_COILS_RESPONSE);
    }

    #[test]
    fn can_parse_read_holding_registers_response() {
        assert_can_parse_response(READ_HOLDING_REGISTERS_RESPONSE);
    }

    #[test]
    fn can_parse_write_single_coil_response() {
        assert_can_parse_response(WRITE_SINGLE_COIL_RESPONSE);
    }

    #[test]
    fn can_parse_write_multiple_registers_response() {
        assert_can_parse_response(WRITE_MULTIPLE_REGISTERS_RESPONSE);
    }

    #[test]
    fn can_parse_mask_write_register_response() {
        assert_can_parse_response(MASK_WRITE_REGISTER_RESPONSE);
    }

    #[test]
    fn can_parse_exception_response() {
        assert_can_parse_response(EXCEPTION_RESPONSE);
    }

    #[test]
    fn fails_on_wrong_crc() {
        let mut bytes = WRITE_SINGLE_COIL_RESPONSE.to_vec();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert_eq!(
            parse_in_chunks(&bytes, bytes.len()).err(),
            Some(RequestError::BadFrame(FrameParseError::CrcValidationFailure(
                0x008B, 0xE48B
            )))
        );
    }

    #[test]
    fn fails_on_unknown_function_code() {
        let bytes: &[u8] = &[UNIT_ID, 0x2B, 0x0E, 0x01];
        assert_eq!(
            parse_in_chunks(bytes, bytes.len()).err(),
            Some(RequestError::BadFrame(FrameParseError::UnknownFunctionCode(
                0x2B
            )))
        );
    }

    #[test]
    fn fails_on_byte_count_exceeding_adu() {
        let bytes: &[u8] = &[UNIT_ID, 0x03, 0xFF];
        assert_eq!(
            parse_in_chunks(bytes, bytes.len()).err(),
            Some(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                257, 253
            )))
        );
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut io = PhysLayer::new_mock(
            Builder::new()
                .read(&EXCEPTION_RESPONSE[..2])
                .read(WRITE_SINGLE_COIL_RESPONSE)
                .build(),
        );
        let mut buffer = ReadBuffer::new(constants::MAX_FRAME_LENGTH);
        let mut parser = RtuParser::new_response_parser();

        block_on(buffer.read_some(&mut io, PhysDecodeLevel::Nothing)).unwrap();
        assert!(parser
            .parse(&mut buffer, AduDecodeLevel::Nothing)
            .unwrap()
            .is_none());

        // what a timeout does to the reader
        parser.reset();
        buffer.clear();

        block_on(buffer.read_some(&mut io, PhysDecodeLevel::Nothing)).unwrap();
        let frame = parser
            .parse(&mut buffer, AduDecodeLevel::Nothing)
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload(), &WRITE_SINGLE_COIL_RESPONSE[1..6]);
    }
}
