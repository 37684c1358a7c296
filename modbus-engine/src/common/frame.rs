use std::ops::Range;

use crate::common::buffer::ReadBuffer;
use crate::common::cursor::WriteCursor;
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::common::traits::{Loggable, LoggableDisplay, Serialize};
use crate::decode::DecodeLevel;
use crate::error::{InternalError, RequestError};
use crate::exception::ExceptionCode;
use crate::serial::frame::{RtuDisplay, RtuParser};
use crate::tcp::frame::{MbapDisplay, MbapParser};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
}

/// MBAP transaction identifier
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }

    /// return the current id and advance the counter, wrapping at u16::MAX
    pub(crate) fn next(&mut self) -> TxId {
        let ret = *self;
        self.value = self.value.wrapping_add(1);
        ret
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) unit_id: UnitId,
    /// only present on TCP, serial relies on request/response ordering
    pub(crate) tx_id: Option<TxId>,
}

impl FrameHeader {
    pub(crate) fn new_tcp_header(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: Some(tx_id),
        }
    }

    pub(crate) fn new_rtu_header(unit_id: UnitId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: None,
        }
    }
}

/// A received ADU with the transport header stripped
pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; constants::MAX_ADU_LENGTH],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        match self.pdu.get_mut(0..src.len()) {
            Some(dest) => {
                dest.copy_from_slice(src);
                self.length = src.len();
                true
            }
            None => false,
        }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[0..self.length]
    }
}

/// The first byte of a PDU as it is placed on the wire
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum FunctionField {
    Valid(FunctionCode),
    Exception(FunctionCode),
    UnknownFunction(u8),
}

impl FunctionField {
    pub(crate) fn unknown(fc: u8) -> Self {
        Self::UnknownFunction(fc)
    }

    pub(crate) fn get_value(&self) -> u8 {
        match self {
            FunctionField::Valid(x) => x.get_value(),
            FunctionField::Exception(x) => x.as_error(),
            FunctionField::UnknownFunction(x) => x | 0x80,
        }
    }
}

impl std::fmt::Display for FunctionField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionField::Valid(x) => write!(f, "{x}"),
            FunctionField::Exception(x) => write!(f, "Exception({:#04X}) for {}", x.as_error(), x),
            FunctionField::UnknownFunction(x) => write!(f, "Exception({:#04X}) for unknown function", x | 0x80),
        }
    }
}

/// Where the PDU body landed inside a formatted frame
pub(crate) struct FrameInfo {
    pub(crate) pdu_body: Range<usize>,
    pub(crate) crc: Option<u16>,
}

impl FrameInfo {
    pub(crate) fn new(pdu_body: Range<usize>, crc: Option<u16>) -> Self {
        Self { pdu_body, crc }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FrameFormat {
    Mbap,
    Rtu,
}

/// Formats requests, replies and exceptions into a reusable frame buffer
pub(crate) struct FrameWriter {
    format: FrameFormat,
    buffer: [u8; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
}

impl FrameWriter {
    pub(crate) fn tcp() -> Self {
        Self::new(FrameFormat::Mbap)
    }

    #[cfg_attr(not(feature = "serial"), allow(dead_code))]
    pub(crate) fn rtu() -> Self {
        Self::new(FrameFormat::Rtu)
    }

    fn new(format: FrameFormat) -> Self {
        Self {
            format,
            buffer: [0; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
        }
    }

    /// the header used for an outgoing request on this transport
    pub(crate) fn header(&self, unit_id: UnitId, tx_id: TxId) -> FrameHeader {
        match self.format {
            FrameFormat::Mbap => FrameHeader::new_tcp_header(unit_id, tx_id),
            FrameFormat::Rtu => FrameHeader::new_rtu_header(unit_id),
        }
    }

    pub(crate) fn format_request(
        &mut self,
        header: FrameHeader,
        function: FunctionCode,
        msg: &dyn Loggable,
        level: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        if level.pdu.enabled() {
            tracing::info!(
                "PDU TX - {} {}",
                function,
                LoggableDisplay::new(msg, level.pdu)
            );
        }
        let (len, _) = self.format_generic(header, FunctionField::Valid(function), msg, level)?;
        self.frame(len)
    }

    pub(crate) fn format_reply(
        &mut self,
        header: FrameHeader,
        function: FunctionCode,
        msg: &dyn Loggable,
        level: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        self.format_request(header, function, msg, level)
    }

    pub(crate) fn format_ex(
        &mut self,
        header: FrameHeader,
        function: FunctionField,
        ex: ExceptionCode,
        level: DecodeLevel,
    ) -> Result<&[u8], RequestError> {
        if level.pdu.enabled() {
            tracing::warn!(
                "PDU TX - {} Modbus exception {:?} ({:#04X})",
                function,
                ex,
                u8::from(ex)
            );
        }
        let (len, _) = self.format_generic(header, function, &ex, level)?;
        self.frame(len)
    }

    fn frame(&self, len: usize) -> Result<&[u8], RequestError> {
        self.buffer
            .get(0..len)
            .ok_or_else(|| InternalError::BadSeekOperation.into())
    }

    fn format_generic<T: Serialize + ?Sized>(
        &mut self,
        header: FrameHeader,
        function: FunctionField,
        msg: &T,
        level: DecodeLevel,
    ) -> Result<(usize, FrameInfo), RequestError> {
        let format = self.format;
        let mut cursor = WriteCursor::new(self.buffer.as_mut());
        let info = match format {
            FrameFormat::Mbap => crate::tcp::frame::format_mbap(&mut cursor, header, function, msg)?,
            FrameFormat::Rtu => {
                crate::serial::frame::format_rtu_pdu(&mut cursor, header, function, msg)?
            }
        };
        let len = cursor.position();

        if level.adu.enabled() {
            if let Some(pdu) = self.buffer.get(info.pdu_body.start - 1..info.pdu_body.end) {
                match format {
                    FrameFormat::Mbap => {
                        tracing::info!("MBAP TX - {}", MbapDisplay::new(level.adu, header, pdu))
                    }
                    FrameFormat::Rtu => tracing::info!(
                        "RTU TX - {}",
                        RtuDisplay::new(level.adu, header.unit_id, pdu, info.crc.unwrap_or(0))
                    ),
                }
            }
        }

        Ok((len, info))
    }
}

enum FrameParser {
    Mbap(MbapParser),
    Rtu(RtuParser),
}

/// Reads complete frames off a [`PhysLayer`], buffering partial reads
pub(crate) struct FramedReader {
    parser: FrameParser,
    buffer: ReadBuffer,
}

impl FramedReader {
    pub(crate) fn tcp() -> Self {
        Self {
            parser: FrameParser::Mbap(MbapParser::new()),
            buffer: ReadBuffer::new(crate::tcp::frame::constants::MAX_FRAME_LENGTH),
        }
    }

    #[cfg_attr(not(feature = "serial"), allow(dead_code))]
    pub(crate) fn rtu_response() -> Self {
        Self {
            parser: FrameParser::Rtu(RtuParser::new_response_parser()),
            buffer: ReadBuffer::new(crate::serial::frame::constants::MAX_FRAME_LENGTH),
        }
    }

    /// Discard partially received data after a timeout
    ///
    /// A stream with MBAP headers stays aligned, so only RTU state is dropped.
    pub(crate) fn reset(&mut self) {
        if let FrameParser::Rtu(parser) = &mut self.parser {
            parser.reset();
            self.buffer.clear();
        }
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        level: DecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            let parsed = match &mut self.parser {
                FrameParser::Mbap(parser) => parser.parse(&mut self.buffer, level.adu)?,
                FrameParser::Rtu(parser) => parser.parse(&mut self.buffer, level.adu)?,
            };

            match parsed {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some(io, level.physical).await?;
                }
            }
        }
    }
}
