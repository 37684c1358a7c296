use std::sync::{Mutex, PoisonError};

use crate::common::bits::num_bytes_for_bits;
use crate::common::cursor::ReadCursor;
use crate::common::frame::{FrameHeader, FrameWriter, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::traits::{Loggable, Parse};
use crate::constants::limits;
use crate::decode::{DecodeLevel, PduDecodeLevel};
use crate::error::{AduParseError, InvalidRange, RequestError};
use crate::exception::ExceptionCode;
use crate::server::handler::RequestHandler;
use crate::server::response::{BitsReply, RegistersReply};
use crate::types::*;

/// A request received by the slave, validated against the protocol limits
#[derive(Debug)]
pub(crate) enum Request {
    ReadCoils(ReadBitsRange),
    ReadDiscreteInputs(ReadBitsRange),
    ReadHoldingRegisters(ReadRegistersRange),
    ReadInputRegisters(ReadRegistersRange),
    WriteSingleCoil(Indexed<bool>),
    WriteSingleRegister(Indexed<u16>),
    WriteMultipleCoils(WriteMultiple<bool>),
    WriteMultipleRegisters(WriteMultiple<u16>),
    MaskWriteRegister(MaskWrite),
}

impl Request {
    pub(crate) fn get_function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
            Request::MaskWriteRegister(_) => FunctionCode::MaskWriteRegister,
        }
    }

    pub(crate) fn parse(
        function: FunctionCode,
        cursor: &mut ReadCursor,
    ) -> Result<Self, RequestError> {
        let request = match function {
            FunctionCode::ReadCoils => Request::ReadCoils(AddressRange::parse(cursor)?.of_read_bits()?),
            FunctionCode::ReadDiscreteInputs => {
                Request::ReadDiscreteInputs(AddressRange::parse(cursor)?.of_read_bits()?)
            }
            FunctionCode::ReadHoldingRegisters => {
                Request::ReadHoldingRegisters(AddressRange::parse(cursor)?.of_read_registers()?)
            }
            FunctionCode::ReadInputRegisters => {
                Request::ReadInputRegisters(AddressRange::parse(cursor)?.of_read_registers()?)
            }
            FunctionCode::WriteSingleCoil => Request::WriteSingleCoil(Indexed::parse(cursor)?),
            FunctionCode::WriteSingleRegister => {
                Request::WriteSingleRegister(Indexed::parse(cursor)?)
            }
            FunctionCode::WriteMultipleCoils => {
                let range = parse_write_range(cursor, limits::MAX_WRITE_COILS_COUNT)?;
                let bytes = read_byte_counted(cursor, num_bytes_for_bits(range.count))?;
                let bits = BitVector::from_packed_with_len(bytes, range.count as usize)
                    .ok_or(AduParseError::InsufficientBytes)?;
                Request::WriteMultipleCoils(WriteMultiple::from_bits(range.start, &bits)?)
            }
            FunctionCode::WriteMultipleRegisters => {
                let range = parse_write_range(cursor, limits::MAX_WRITE_REGISTERS_COUNT)?;
                let bytes = read_byte_counted(cursor, 2 * range.count as usize)?;
                let values = bytes
                    .chunks_exact(2)
                    .map(|x| u16::from_be_bytes([x[0], x[1]]))
                    .collect();
                Request::WriteMultipleRegisters(WriteMultiple::from_registers(range.start, values)?)
            }
            FunctionCode::MaskWriteRegister => Request::MaskWriteRegister(MaskWrite::parse(cursor)?),
        };
        cursor.expect_empty()?;
        Ok(request)
    }

    /// Execute the request against the handler and format the reply
    ///
    /// The handler stays locked until the reply is formatted.
    pub(crate) fn get_reply<'a, T: RequestHandler>(
        &self,
        header: FrameHeader,
        handler: &Mutex<T>,
        writer: &'a mut FrameWriter,
        level: DecodeLevel,
    ) -> Result<&'a [u8], RequestError> {
        let function = self.get_function();
        let mut handler = handler.lock().unwrap_or_else(PoisonError::into_inner);

        match self {
            Request::ReadCoils(range) => {
                let range = range.get();
                let result = handler
                    .read_coils(range)
                    .and_then(|bits| {
                        check_count(range, bits.len())?;
                        Ok(BitsReply::new(range, bits))
                    });
                write_result(function, header, writer, result, level)
            }
            Request::ReadDiscreteInputs(range) => {
                let range = range.get();
                let result = handler
                    .read_discrete_inputs(range)
                    .and_then(|bits| {
                        check_count(range, bits.len())?;
                        Ok(BitsReply::new(range, bits))
                    });
                write_result(function, header, writer, result, level)
            }
            Request::ReadHoldingRegisters(range) => {
                let range = range.get();
                let result = handler
                    .read_holding_registers(range)
                    .and_then(|values| {
                        check_count(range, values.len())?;
                        Ok(RegistersReply::new(range, values))
                    });
                write_result(function, header, writer, result, level)
            }
            Request::ReadInputRegisters(range) => {
                let range = range.get();
                let result = handler
                    .read_input_registers(range)
                    .and_then(|values| {
                        check_count(range, values.len())?;
                        Ok(RegistersReply::new(range, values))
                    });
                write_result(function, header, writer, result, level)
            }
            Request::WriteSingleCoil(request) => {
                let result = handler.write_single_coil(*request).map(|_| *request);
                write_result(function, header, writer, result, level)
            }
            Request::WriteSingleRegister(request) => {
                let result = handler.write_single_register(*request).map(|_| *request);
                write_result(function, header, writer, result, level)
            }
            Request::WriteMultipleCoils(request) => {
                let bits: BitVector = request.values().iter().copied().collect();
                let result = handler
                    .write_multiple_coils(request.range().start, &bits)
                    .map(|_| request.range());
                write_result(function, header, writer, result, level)
            }
            Request::WriteMultipleRegisters(request) => {
                let result = handler
                    .write_multiple_registers(request.range().start, request.values())
                    .map(|_| request.range());
                write_result(function, header, writer, result, level)
            }
            Request::MaskWriteRegister(request) => {
                let result = handler.mask_write_register(*request).map(|_| *request);
                write_result(function, header, writer, result, level)
            }
        }
    }
}

/// A handler must return exactly one value per requested address
fn check_count(range: AddressRange, actual: usize) -> Result<(), ExceptionCode> {
    if actual != range.count as usize {
        tracing::warn!(
            "handler returned {} values for a request of {}",
            actual,
            range.count
        );
        return Err(ExceptionCode::ServerDeviceFailure);
    }
    Ok(())
}

fn parse_write_range(cursor: &mut ReadCursor, limit: u16) -> Result<AddressRange, RequestError> {
    let range = AddressRange::parse(cursor)?;
    if range.count > limit {
        return Err(InvalidRange::CountTooLargeForType(range.count, limit).into());
    }
    Ok(range)
}

fn read_byte_counted<'a>(
    cursor: &mut ReadCursor<'a>,
    expected: usize,
) -> Result<&'a [u8], RequestError> {
    let byte_count = cursor.read_u8()? as usize;
    if byte_count != expected {
        return Err(AduParseError::RequestByteCountMismatch(expected, byte_count).into());
    }
    if cursor.len() < byte_count {
        return Err(AduParseError::InsufficientBytesForByteCount(byte_count, cursor.len()).into());
    }
    Ok(cursor.read_bytes(byte_count)?)
}

fn write_result<'a, T: Loggable>(
    function: FunctionCode,
    header: FrameHeader,
    writer: &'a mut FrameWriter,
    result: Result<T, ExceptionCode>,
    level: DecodeLevel,
) -> Result<&'a [u8], RequestError> {
    match result {
        Ok(response) => writer.format_reply(header, function, &response, level),
        Err(ex) => writer.format_ex(header, FunctionField::Exception(function), ex, level),
    }
}

pub(crate) struct RequestDisplay<'a> {
    request: &'a Request,
    level: PduDecodeLevel,
}

impl<'a> RequestDisplay<'a> {
    pub(crate) fn new(level: PduDecodeLevel, request: &'a Request) -> Self {
        Self { request, level }
    }
}

impl std::fmt::Display for RequestDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.request.get_function())?;
        match self.request {
            Request::ReadCoils(range) | Request::ReadDiscreteInputs(range) => {
                write!(f, " ")?;
                range.get().log(self.level, f)
            }
            Request::ReadHoldingRegisters(range) | Request::ReadInputRegisters(range) => {
                write!(f, " ")?;
                range.get().log(self.level, f)
            }
            Request::WriteSingleCoil(x) => {
                write!(f, " ")?;
                x.log(self.level, f)
            }
            Request::WriteSingleRegister(x) => {
                write!(f, " ")?;
                x.log(self.level, f)
            }
            Request::WriteMultipleCoils(x) => {
                write!(f, " ")?;
                x.log(self.level, f)
            }
            Request::WriteMultipleRegisters(x) => {
                write!(f, " ")?;
                x.log(self.level, f)
            }
            Request::MaskWriteRegister(x) => {
                write!(f, " ")?;
                x.log(self.level, f)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_write_multiple_coils() {
        let mut cursor = ReadCursor::new(&[0x00, 0x01, 0x00, 0x0A, 0x02, 0xFF, 0x01]);
        let request = Request::parse(FunctionCode::WriteMultipleCoils, &mut cursor).unwrap();
        match request {
            Request::WriteMultipleCoils(x) => {
                assert_eq!(x.range(), AddressRange::try_from(1, 10).unwrap());
                assert_eq!(x.values(), &[true, true, true, true, true, true, true, true, true, false]);
            }
            _ => panic!("unexpected request: {request:?}"),
        }
    }

    #[test]
    fn parses_write_multiple_registers() {
        let mut cursor = ReadCursor::new(&[0x27, 0x0F, 0x00, 0x02, 0x04, 0xCA, 0xFE, 0x00, 0x01]);
        let request = Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor).unwrap();
        match request {
            Request::WriteMultipleRegisters(x) => {
                assert_eq!(x.range(), AddressRange::try_from(9999, 2).unwrap());
                assert_eq!(x.values(), &[0xCAFE, 0x0001]);
            }
            _ => panic!("unexpected request: {request:?}"),
        }
    }

    #[test]
    fn rejects_byte_count_mismatch() {
        let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x00, 0x02, 0x03, 0xCA, 0xFE, 0x00]);
        let err = Request::parse(FunctionCode::WriteMultipleRegisters, &mut cursor).unwrap_err();
        assert_eq!(err, AduParseError::RequestByteCountMismatch(4, 3).into());
    }

    #[test]
    fn rejects_read_count_above_limit() {
        let mut cursor = ReadCursor::new(&[0x00, 0x00, 0x00, 0x7E]);
        let err = Request::parse(FunctionCode::ReadHoldingRegisters, &mut cursor).unwrap_err();
        assert_eq!(err, InvalidRange::CountTooLargeForType(126, 125).into());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut cursor = ReadCursor::new(&[0x00, 0x04, 0x00, 0xF2, 0x00, 0x25, 0x00]);
        let err = Request::parse(FunctionCode::MaskWriteRegister, &mut cursor).unwrap_err();
        assert_eq!(err, AduParseError::TrailingBytes(1).into());
    }
}
