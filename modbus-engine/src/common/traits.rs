use crate::common::cursor::{ReadCursor, WriteCursor};
use crate::decode::PduDecodeLevel;
use crate::error::RequestError;

pub(crate) trait Serialize {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError>;
}

/// A message that can describe itself in the PDU logs
pub(crate) trait Loggable: Serialize {
    fn log(&self, level: PduDecodeLevel, f: &mut std::fmt::Formatter) -> std::fmt::Result;
}

pub(crate) struct LoggableDisplay<'a> {
    loggable: &'a dyn Loggable,
    level: PduDecodeLevel,
}

impl<'a> LoggableDisplay<'a> {
    pub(crate) fn new(loggable: &'a dyn Loggable, level: PduDecodeLevel) -> Self {
        Self { loggable, level }
    }
}

impl std::fmt::Display for LoggableDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.loggable.log(self.level, f)
    }
}

pub(crate) trait Parse: Sized {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, RequestError>;
}
