use std::time::Duration;

use tokio::sync::oneshot;

use crate::client::requests::read_bits::ReadBits;
use crate::client::requests::read_registers::ReadRegisters;
use crate::client::requests::write_multiple::MultipleWrite;
use crate::client::requests::write_single::SingleWrite;
use crate::client::RequestParam;
use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::common::function::FunctionCode;
use crate::common::traits::{Loggable, Serialize};
use crate::decode::{DecodeLevel, PduDecodeLevel};
use crate::error::{AduParseError, RequestError};
use crate::exception::ExceptionCode;
use crate::types::{Indexed, MaskWrite, UnitId};

/// Messages processed by the channel task
pub(crate) enum Command {
    Request(Request),
    SetDecodeLevel(DecodeLevel),
}

/// A request waiting in the queue or in flight
pub(crate) struct Request {
    pub(crate) id: UnitId,
    pub(crate) timeout: Duration,
    pub(crate) retries: usize,
    pub(crate) details: RequestDetails,
}

/// One variant per supported operation
pub(crate) enum RequestDetails {
    ReadCoils(ReadBits),
    ReadDiscreteInputs(ReadBits),
    ReadHoldingRegisters(ReadRegisters),
    ReadInputRegisters(ReadRegisters),
    WriteSingleCoil(SingleWrite<Indexed<bool>>),
    WriteSingleRegister(SingleWrite<Indexed<u16>>),
    WriteMultipleCoils(MultipleWrite<bool>),
    WriteMultipleRegisters(MultipleWrite<u16>),
    MaskWriteRegister(SingleWrite<MaskWrite>),
}

impl Request {
    pub(crate) fn new(param: RequestParam, details: RequestDetails) -> Self {
        Self {
            id: param.id,
            timeout: param.response_timeout,
            retries: param.retries,
            details,
        }
    }

    /// Decode the reply PDU and complete the promise on success
    ///
    /// On error the promise is left pending so that the caller fails it in one place.
    pub(crate) fn handle_response(
        &mut self,
        payload: &[u8],
        decode: PduDecodeLevel,
    ) -> Result<(), RequestError> {
        let expected = self.details.function();
        let mut cursor = ReadCursor::new(payload);
        let function = cursor.read_u8()?;

        if function == expected.get_value() {
            return self.details.handle_response(cursor, expected, decode);
        }

        if function == expected.as_error() {
            let ex = ExceptionCode::from(cursor.read_u8()?);
            cursor.expect_empty()?;
            if decode.enabled() {
                tracing::warn!(
                    "PDU RX - Modbus exception {:?} ({:#04X}) for {}",
                    ex,
                    u8::from(ex),
                    expected
                );
            }
            return Err(RequestError::Exception(ex));
        }

        Err(AduParseError::UnknownResponseFunction(
            function,
            expected.get_value(),
            expected.as_error(),
        )
        .into())
    }
}

impl RequestDetails {
    pub(crate) fn function(&self) -> FunctionCode {
        match self {
            RequestDetails::ReadCoils(_) => FunctionCode::ReadCoils,
            RequestDetails::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            RequestDetails::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            RequestDetails::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            RequestDetails::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            RequestDetails::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            RequestDetails::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            RequestDetails::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
            RequestDetails::MaskWriteRegister(_) => FunctionCode::MaskWriteRegister,
        }
    }

    pub(crate) fn fail(&mut self, err: RequestError) {
        match self {
            RequestDetails::ReadCoils(x) => x.failure(err),
            RequestDetails::ReadDiscreteInputs(x) => x.failure(err),
            RequestDetails::ReadHoldingRegisters(x) => x.failure(err),
            RequestDetails::ReadInputRegisters(x) => x.failure(err),
            RequestDetails::WriteSingleCoil(x) => x.failure(err),
            RequestDetails::WriteSingleRegister(x) => x.failure(err),
            RequestDetails::WriteMultipleCoils(x) => x.failure(err),
            RequestDetails::WriteMultipleRegisters(x) => x.failure(err),
            RequestDetails::MaskWriteRegister(x) => x.failure(err),
        }
    }

    fn handle_response(
        &mut self,
        cursor: ReadCursor,
        function: FunctionCode,
        decode: PduDecodeLevel,
    ) -> Result<(), RequestError> {
        match self {
            RequestDetails::ReadCoils(x) => x.handle_response(cursor, function, decode),
            RequestDetails::ReadDiscreteInputs(x) => x.handle_response(cursor, function, decode),
            RequestDetails::ReadHoldingRegisters(x) => x.handle_response(cursor, function, decode),
            RequestDetails::ReadInputRegisters(x) => x.handle_response(cursor, function, decode),
            RequestDetails::WriteSingleCoil(x) => x.handle_response(cursor, function, decode),
            RequestDetails::WriteSingleRegister(x) => x.handle_response(cursor, function, decode),
            RequestDetails::WriteMultipleCoils(x) => x.handle_response(cursor, function, decode),
            RequestDetails::WriteMultipleRegisters(x) => {
                x.handle_response(cursor, function, decode)
            }
            RequestDetails::MaskWriteRegister(x) => x.handle_response(cursor, function, decode),
        }
    }
}

impl Serialize for RequestDetails {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        match self {
            RequestDetails::ReadCoils(x) => x.request.get().serialize(cursor),
            RequestDetails::ReadDiscreteInputs(x) => x.request.get().serialize(cursor),
            RequestDetails::ReadHoldingRegisters(x) => x.request.get().serialize(cursor),
            RequestDetails::ReadInputRegisters(x) => x.request.get().serialize(cursor),
            RequestDetails::WriteSingleCoil(x) => x.request.serialize(cursor),
            RequestDetails::WriteSingleRegister(x) => x.request.serialize(cursor),
            RequestDetails::WriteMultipleCoils(x) => x.request.serialize(cursor),
            RequestDetails::WriteMultipleRegisters(x) => x.request.serialize(cursor),
            RequestDetails::MaskWriteRegister(x) => x.request.serialize(cursor),
        }
    }
}

impl Loggable for RequestDetails {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestDetails::ReadCoils(x) => x.request.get().log(level, f),
            RequestDetails::ReadDiscreteInputs(x) => x.request.get().log(level, f),
            RequestDetails::ReadHoldingRegisters(x) => x.request.get().log(level, f),
            RequestDetails::ReadInputRegisters(x) => x.request.get().log(level, f),
            RequestDetails::WriteSingleCoil(x) => x.request.log(level, f),
            RequestDetails::WriteSingleRegister(x) => x.request.log(level, f),
            RequestDetails::WriteMultipleCoils(x) => x.request.log(level, f),
            RequestDetails::WriteMultipleRegisters(x) => x.request.log(level, f),
            RequestDetails::MaskWriteRegister(x) => x.request.log(level, f),
        }
    }
}

/// Completes the caller's future exactly once
///
/// Dropping an incomplete promise fails the caller with [`RequestError::Shutdown`].
pub(crate) struct Promise<T> {
    tx: Option<oneshot::Sender<Result<T, RequestError>>>,
}

impl<T> Promise<T> {
    pub(crate) fn new(tx: oneshot::Sender<Result<T, RequestError>>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn failure(&mut self, err: RequestError) {
        self.complete(Err(err))
    }

    pub(crate) fn success(&mut self, value: T) {
        self.complete(Ok(value))
    }

    fn complete(&mut self, result: Result<T, RequestError>) {
        if let Some(tx) = self.tx.take() {
            // the caller may have stopped waiting
            tx.send(result).ok();
        }
    }
}
