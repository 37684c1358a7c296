use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::frame::{Frame, FrameHeader, FrameInfo, FunctionField, TxId};
use crate::common::traits::Serialize;
use crate::decode::AduDecodeLevel;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize = crate::common::frame::constants::MAX_ADU_LENGTH + 1;
}

#[derive(Clone, Copy)]
struct MbapHeader {
    tx_id: TxId,
    adu_length: usize,
    unit_id: UnitId,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    Header(MbapHeader),
}

pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    fn parse_header(cursor: &mut ReadBuffer) -> Result<MbapHeader, RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let length = cursor.read_u16_be()? as usize;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::MbapLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        // must be > 0 b/c the 1-byte unit identifier counts towards length
        if length == 0 {
            return Err(FrameParseError::MbapLengthZero.into());
        }

        Ok(MbapHeader {
            tx_id,
            adu_length: length - 1,
            unit_id,
        })
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: AduDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header) => {
                if cursor.len() < header.adu_length {
                    return Ok(None);
                }

                let mut frame = Frame::new(FrameHeader::new_tcp_header(header.unit_id, header.tx_id));
                frame.set(cursor.read(header.adu_length)?);
                self.state = ParseState::Begin;

                if decode_level.enabled() {
                    tracing::info!(
                        "MBAP RX - {}",
                        MbapDisplay::new(decode_level, frame.header, frame.payload())
                    );
                }

                Ok(Some(frame))
            }
            ParseState::Begin => {
                if cursor.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                self.state = ParseState::Header(Self::parse_header(cursor)?);
                self.parse(cursor, decode_level)
            }
        }
    }
}

pub(crate) fn format_mbap<T: Serialize + ?Sized>(
    cursor: &mut WriteCursor,
    header: FrameHeader,
    function: FunctionField,
    msg: &T,
) -> Result<FrameInfo, RequestError> {
    // RTU headers never reach this formatter
    let tx_id = header.tx_id.unwrap_or_default();

    cursor.write_u16_be(tx_id.to_u16())?;
    cursor.write_u16_be(0)?;
    let length_pos = cursor.position();
    cursor.seek_from_current(2)?; // write the length later
    cursor.write_u8(header.unit_id.value)?;

    let start_pdu = cursor.position();
    cursor.write_u8(function.get_value())?;
    let start_pdu_body = cursor.position();
    msg.serialize(cursor)?;
    let end_pdu = cursor.position();

    // the length field counts the unit id
    let mbap_length = end_pdu - start_pdu + 1;
    if mbap_length > constants::MAX_LENGTH_FIELD {
        return Err(
            InternalError::FrameTooBig(mbap_length, constants::MAX_LENGTH_FIELD).into(),
        );
    }

    cursor.seek_from_start(length_pos)?;
    cursor.write_u16_be(mbap_length as u16)?;
    cursor.seek_from_start(end_pdu)?;

    Ok(FrameInfo::new(start_pdu_body..end_pdu, None))
}

pub(crate) struct MbapDisplay<'a> {
    level: AduDecodeLevel,
    header: FrameHeader,
    bytes: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    pub(crate) fn new(level: AduDecodeLevel, header: FrameHeader, bytes: &'a [u8]) -> Self {
        MbapDisplay {
            level,
            header,
            bytes,
        }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} len: {}",
            self.header.tx_id.unwrap_or_default(),
            self.header.unit_id,
            self.bytes.len()
        )?;
        if self.level.payload_enabled() {
            crate::common::phys::format_bytes(f, self.bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::block_on;
    use tokio_test::io::Builder;

    use crate::common::frame::FramedReader;
    use crate::common::function::FunctionCode;
    use crate::common::phys::PhysLayer;
    use crate::DecodeLevel;

    use super::*;

    //                            |   tx id  |  proto id |  length  | unit |  payload   |
    const SIMPLE_FRAME: &[u8] = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x2A, 0x03, 0x04];

    struct MockBody {
        value: u8,
    }

    impl Serialize for MockBody {
        fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
            cursor.write_u8(self.value)?;
            Ok(())
        }
    }

    fn assert_equals_simple_frame(frame: &Frame) {
        assert_eq!(frame.header.tx_id, Some(TxId::new(0x0007)));
        assert_eq!(frame.header.unit_id, UnitId::new(0x2A));
        assert_eq!(frame.payload(), &[0x03, 0x04]);
    }

    fn read_frame(reads: &[&[u8]]) -> Result<Frame, RequestError> {
        let mut builder = Builder::new();
        for bytes in reads {
            builder.read(bytes);
        }
        let mut io = PhysLayer::new_mock(builder.build());
        let mut reader = FramedReader::tcp();
        block_on(reader.next_frame(&mut io, DecodeLevel::nothing()))
    }

    fn test_segmented_parse(split_at: usize) {
        let (f1, f2) = SIMPLE_FRAME.split_at(split_at);
        let frame = read_frame(&[f1, f2]).unwrap();
        assert_equals_simple_frame(&frame);
    }

    #[test]
    fn correctly_formats_frame() {
        let mut buffer = [0u8; constants::MAX_FRAME_LENGTH];
        let mut cursor = WriteCursor::new(&mut buffer);
        let header = FrameHeader::new_tcp_header(UnitId::new(42), TxId::new(7));
        let info = format_mbap(
            &mut cursor,
            header,
            FunctionField::Valid(FunctionCode::ReadHoldingRegisters),
            &MockBody { value: 0x04 },
        )
        .unwrap();
        let len = cursor.position();

        assert_eq!(&buffer[..len], SIMPLE_FRAME);
        assert_eq!(info.pdu_body, 8..9);
    }

    #[test]
    fn formats_exception_with_high_bit() {
        let mut buffer = [0u8; constants::MAX_FRAME_LENGTH];
        let mut cursor = WriteCursor::new(&mut buffer);
        let header = FrameHeader::new_tcp_header(UnitId::new(1), TxId::new(0x0102));
        format_mbap(
            &mut cursor,
            header,
            FunctionField::Exception(FunctionCode::WriteSingleCoil),
            &MockBody { value: 0x02 },
        )
        .unwrap();
        let len = cursor.position();

        assert_eq!(
            &buffer[..len],
            &[0x01, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x85, 0x02]
        );
    }

    #[test]
    fn can_parse_frame_from_stream() {
        let frame = read_frame(&[SIMPLE_FRAME]).unwrap();
        assert_equals_simple_frame(&frame);
    }

    #[test]
    fn can_parse_two_frames_from_one_read() {
        let mut both = SIMPLE_FRAME.to_vec();
        both.extend_from_slice(&[0x00, 0x08, 0x00, 0x00, 0x00, 0x02, 0x2A, 0x06]);
        let mut io = PhysLayer::new_mock(Builder::new().read(&both).build());
        let mut reader = FramedReader::tcp();

        let first = block_on(reader.next_frame(&mut io, DecodeLevel::nothing())).unwrap();
        assert_equals_simple_frame(&first);
        let second = block_on(reader.next_frame(&mut io, DecodeLevel::nothing())).unwrap();
        assert_eq!(second.header.tx_id, Some(TxId::new(0x0008)));
        assert_eq!(second.payload(), &[0x06]);
    }

    #[test]
    fn can_parse_maximum_size_frame() {
        // maximum ADU length is 253, so max MBAP length value is 254 which is 0xFE
        let header: &[u8] = &[0x00, 0x07, 0x00, 0x00, 0x00, 0xFE, 0x2A];
        let payload: &[u8] = &[0xCC; 253];

        let frame = read_frame(&[header, payload]).unwrap();
        assert_eq!(frame.payload(), payload);
    }

    #[test]
    fn can_parse_frame_if_segmented_in_header() {
        test_segmented_parse(4);
    }

    #[test]
    fn can_parse_frame_if_segmented_in_payload() {
        test_segmented_parse(8);
    }

    #[test]
    fn errors_on_bad_protocol_id() {
        let frame: &[u8] = &[0x00, 0x07, 0xCA, 0xFE, 0x00, 0x01, 0x2A];
        assert_eq!(
            read_frame(&[frame]).err(),
            Some(RequestError::BadFrame(FrameParseError::UnknownProtocolId(
                0xCAFE
            )))
        );
    }

    #[test]
    fn errors_on_length_of_zero() {
        let frame: &[u8] = &[0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x2A];
        assert_eq!(
            read_frame(&[frame]).err(),
            Some(RequestError::BadFrame(FrameParseError::MbapLengthZero))
        );
    }

    #[test]
    fn errors_when_mbap_length_too_big() {
        let frame: &[u8] = &[0x00, 0x07, 0x00, 0x00, 0x00, 0xFF, 0x2A];
        assert_eq!(
            read_frame(&[frame]).err(),
            Some(RequestError::BadFrame(FrameParseError::MbapLengthTooBig(
                0xFF,
                constants::MAX_LENGTH_FIELD
            )))
        );
    }

    #[test]
    fn truncated_stream_is_an_io_error() {
        assert_eq!(
            read_frame(&[&SIMPLE_FRAME[..5]]).err(),
            Some(RequestError::Io(std::io::ErrorKind::UnexpectedEof))
        );
    }
}
