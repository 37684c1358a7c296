use crate::client::message::Promise;
use crate::common::cursor::ReadCursor;
use crate::common::function::FunctionCode;
use crate::decode::PduDecodeLevel;
use crate::error::{AduParseError, RequestError};
use crate::types::{
    AddressRange, Indexed, ReadRegistersRange, RegisterIterator, RegisterIteratorDisplay,
};

pub(crate) struct ReadRegisters {
    pub(crate) request: ReadRegistersRange,
    promise: Promise<Vec<Indexed<u16>>>,
}

impl ReadRegisters {
    pub(crate) fn new(request: ReadRegistersRange, promise: Promise<Vec<Indexed<u16>>>) -> Self {
        Self { request, promise }
    }

    pub(crate) fn failure(&mut self, err: RequestError) {
        self.promise.failure(err)
    }

    pub(crate) fn handle_response(
        &mut self,
        mut cursor: ReadCursor,
        function: FunctionCode,
        decode: PduDecodeLevel,
    ) -> Result<(), RequestError> {
        let registers = Self::parse_registers_response(self.request.get(), &mut cursor)?;

        if decode.enabled() {
            tracing::info!(
                "PDU RX - {} {}",
                function,
                RegisterIteratorDisplay::new(decode, registers)
            );
        }

        self.promise.success(registers.collect());
        Ok(())
    }

    fn parse_registers_response<'a>(
        range: AddressRange,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<RegisterIterator<'a>, RequestError> {
        let expected = 2 * range.count as usize;
        let byte_count = cursor.read_u8()? as usize;
        if byte_count != expected {
            return Err(AduParseError::RequestByteCountMismatch(expected, byte_count).into());
        }
        if cursor.len() < byte_count {
            return Err(
                AduParseError::InsufficientBytesForByteCount(byte_count, cursor.len()).into(),
            );
        }
        RegisterIterator::parse_all(range, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[test]
    fn parses_registers_with_addresses() {
        let (tx, mut rx) = oneshot::channel();
        let range = AddressRange::try_from(7, 2)
            .unwrap()
            .of_read_registers()
            .unwrap();
        let mut req = ReadRegisters::new(range, Promise::new(tx));
        let cursor = ReadCursor::new(&[0x04, 0xCA, 0xFE, 0x00, 0x01]);
        req.handle_response(
            cursor,
            FunctionCode::ReadHoldingRegisters,
            PduDecodeLevel::Nothing,
        )
        .unwrap();
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            vec![Indexed::new(7, 0xCAFE), Indexed::new(8, 0x0001)]
        );
    }

    #[test]
    fn odd_byte_count_is_rejected() {
        let (tx, _rx) = oneshot::channel();
        let range = AddressRange::try_from(0, 1)
            .unwrap()
            .of_read_registers()
            .unwrap();
        let mut req = ReadRegisters::new(range, Promise::new(tx));
        let cursor = ReadCursor::new(&[0x03, 0xCA, 0xFE, 0x00]);
        assert_eq!(
            req.handle_response(cursor, FunctionCode::ReadInputRegisters, PduDecodeLevel::Nothing),
            Err(AduParseError::RequestByteCountMismatch(2, 3).into())
        );
    }
}
