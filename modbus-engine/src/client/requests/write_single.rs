use std::fmt::Display;

use crate::client::message::Promise;
use crate::common::cursor::ReadCursor;
use crate::common::function::FunctionCode;
use crate::common::traits::{Loggable, LoggableDisplay, Parse};
use crate::decode::PduDecodeLevel;
use crate::error::{AduParseError, RequestError};

/// Single writes (coil, register, mask) are answered with an exact echo of the request
pub(crate) struct SingleWrite<T> {
    pub(crate) request: T,
    promise: Promise<T>,
}

impl<T> SingleWrite<T>
where
    T: Loggable + Parse + PartialEq + Copy + Display,
{
    pub(crate) fn new(request: T, promise: Promise<T>) -> Self {
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
        let response = T::parse(&mut cursor)?;
        cursor.expect_empty()?;

        if self.request != response {
            tracing::warn!(
                "reply to {} echoed {} instead of {}",
                function,
                response,
                self.request
            );
            return Err(AduParseError::ReplyEchoMismatch.into());
        }

        if decode.enabled() {
            tracing::info!(
                "PDU RX - {} {}",
                function,
                LoggableDisplay::new(&response, decode)
            );
        }

        self.promise.success(response);
        Ok(())
    }
}
