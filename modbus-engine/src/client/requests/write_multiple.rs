use crate::client::message::Promise;
use crate::common::cursor::ReadCursor;
use crate::common::function::FunctionCode;
use crate::common::traits::{Loggable, Serialize};
use crate::decode::PduDecodeLevel;
use crate::error::{AduParseError, RequestError};
use crate::types::{AddressRange, WriteMultiple};

/// Multiple writes are answered with the start address and count that were written
pub(crate) struct MultipleWrite<T> {
    pub(crate) request: WriteMultiple<T>,
    promise: Promise<AddressRange>,
}

impl<T> MultipleWrite<T>
where
    WriteMultiple<T>: Serialize + Loggable,
{
    pub(crate) fn new(request: WriteMultiple<T>, promise: Promise<AddressRange>) -> Self {
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
        // compared as raw fields, an echoed range that is not even valid is still a reply error
        let start = cursor.read_u16_be()?;
        let count = cursor.read_u16_be()?;
        cursor.expect_empty()?;

        let response = self.request.range;
        if response.start != start || response.count != count {
            tracing::warn!(
                "reply to {} echoed start: {} qty: {} instead of {}",
                function,
                start,
                count,
                response
            );
            return Err(AduParseError::ReplyEchoMismatch.into());
        }

        if decode.enabled() {
            tracing::info!("PDU RX - {} {}", function, response);
        }

        self.promise.success(response);
        Ok(())
    }
}
