use crate::exception::ExceptionCode;

/// The task processing requests has terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown;

/// Top-level error type for requests made by a master
///
/// Each variant maps onto one class of failure: a bad argument detected before any
/// I/O, an exception returned by the slave, a framing or decoding problem, a timeout,
/// or a transport failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An internal error occurred in the library itself
    ///
    /// These errors should never happen, but are trapped and reported
    Internal(InternalError),
    /// A Modbus exception was returned by the slave
    Exception(ExceptionCode),
    /// Request was not performed because it is invalid
    BadRequest(InvalidRequest),
    /// Unable to parse a frame from the stream, the connection is closed
    BadFrame(FrameParseError),
    /// Response PDU was malformed or did not echo the request
    BadResponse(AduParseError),
    /// Timeout occurred before receiving a response from the slave
    ResponseTimeout,
    /// No connection could be made to the slave
    NoConnection,
    /// The task processing requests has been shut down
    Shutdown,
    /// An I/O error occurred on the transport
    Io(std::io::ErrorKind),
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::Exception(err) => write!(f, "Modbus exception: {err}"),
            RequestError::BadRequest(err) => write!(f, "invalid request: {err}"),
            RequestError::BadFrame(err) => write!(f, "bad frame: {err}"),
            RequestError::BadResponse(err) => write!(f, "bad response: {err}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response from the slave")
            }
            RequestError::NoConnection => f.write_str("no connection exists to the slave"),
            RequestError::Shutdown => f.write_str("the task processing requests has been shut down"),
            RequestError::Io(kind) => write!(f, "I/O error: {kind}"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(err: ExceptionCode) -> Self {
        RequestError::Exception(err)
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<InvalidRange> for RequestError {
    fn from(err: InvalidRange) -> Self {
        RequestError::BadRequest(InvalidRequest::BadRange(err))
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<Shutdown> for RequestError {
    fn from(_: Shutdown) -> Self {
        RequestError::Shutdown
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RequestError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RequestError::Shutdown
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RequestError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RequestError::Shutdown
    }
}

/// Errors that result from an invalid address range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRange {
    /// Range contains a count of zero
    CountOfZero,
    /// Start and count would overflow the 16-bit address space
    AddressOverflow(u16, u16),
    /// Count is too large for the type of request
    CountTooLargeForType(u16, u16), // actual and limit
}

impl std::error::Error for InvalidRange {}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRange::CountOfZero => f.write_str("range contains count == 0"),
            InvalidRange::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count == {count} would overflow the representation of u16"
            ),
            InvalidRange::CountTooLargeForType(count, limit) => write!(
                f,
                "the request count of {count} exceeds maximum allowed count of {limit} for this type"
            ),
        }
    }
}

/// Errors that result from a bad request parameter, detected before any I/O
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// Request contained an invalid range
    BadRange(InvalidRange),
    /// Count of values does not fit in a u16
    CountTooBigForU16(usize),
    /// Count exceeds the maximum allowed for the type of request
    CountTooBigForType(u16, u16), // count / max
}

impl std::error::Error for InvalidRequest {}

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRequest::BadRange(err) => write!(f, "{err}"),
            InvalidRequest::CountTooBigForU16(count) => write!(
                f,
                "the requested count of objects exceeds the maximum value of u16: {count}"
            ),
            InvalidRequest::CountTooBigForType(count, max) => write!(
                f,
                "the request count of {count} exceeds maximum allowed count of {max} for this type"
            ),
        }
    }
}

/// Errors that occur while parsing a frame off a stream (TCP or serial)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Received TCP frame with the length field set to zero
    MbapLengthZero,
    /// Received TCP frame with length that exceeds max allowed size
    MbapLengthTooBig(usize, usize), // actual size and the maximum size
    /// Received TCP frame within non-Modbus protocol id
    UnknownProtocolId(u16),
    /// Received serial frame whose body exceeds the maximum allowed size
    FrameLengthTooBig(usize, usize), // calculated size and the maximum size
    /// Received serial frame with a function code whose length cannot be determined
    UnknownFunctionCode(u8),
    /// Received serial frame with an invalid CRC
    CrcValidationFailure(u16, u16), // received and expected
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received TCP frame with the length field set to zero")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received TCP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "received serial frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownFunctionCode(code) => {
                write!(f, "received serial frame with unknown function code: {code:#04X}")
            }
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received serial frame with CRC {received:#06X} but expected {expected:#06X}"
            ),
        }
    }
}

/// Errors that occur while parsing the body of requests and responses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// Body is too short to be valid
    InsufficientBytes,
    /// Byte count doesn't match what is expected based on the request
    RequestByteCountMismatch(usize, usize), // expected count / actual count
    /// Byte count doesn't match the actual number of bytes present
    InsufficientBytesForByteCount(usize, usize), // count / remaining
    /// Body contains extra trailing bytes
    TrailingBytes(usize),
    /// A parameter expected to be echoed in the reply did not match
    ReplyEchoMismatch,
    /// An unknown response function code was received
    UnknownResponseFunction(u8, u8, u8), // actual, expected, expected error
    /// Bad value for the coil state
    UnknownCoilState(u16),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("response is too short to be valid"),
            AduParseError::RequestByteCountMismatch(request, response) => write!(
                f,
                "byte count ({response}) doesn't match what is expected based on request ({request})"
            ),
            AduParseError::InsufficientBytesForByteCount(count, remaining) => write!(
                f,
                "byte count ({count}) doesn't match the actual number of bytes remaining ({remaining})"
            ),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "response contains {remaining} extra trailing bytes")
            }
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual}. Expected {expected} or {error}"
            ),
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
        }
    }
}

/// Errors that indicate faulty logic in the library itself if they occur
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Insufficient space for write operation
    InsufficientWriteSpace(usize, usize), // written vs remaining space
    /// The calculated frame size exceeds what is allowed by the protocol
    FrameTooBig(usize, usize), // calculate size vs allowed maximum
    /// Attempted to read more bytes than present
    InsufficientBytesForRead(usize, usize), // requested vs remaining
    /// Cursor seek operation exceeded the bounds of the underlying buffer
    BadSeekOperation,
    /// Byte count would exceed maximum allowed size in the ADU of u8
    BadByteCount(usize),
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace(written, remaining) => write!(
                f,
                "attempted to write {written} bytes with {remaining} bytes remaining"
            ),
            InternalError::FrameTooBig(size, max) => write!(
                f,
                "frame length of {size} exceeds the maximum allowed length of {max}"
            ),
            InternalError::InsufficientBytesForRead(requested, remaining) => write!(
                f,
                "attempted to read {requested} bytes with only {remaining} remaining"
            ),
            InternalError::BadSeekOperation => {
                f.write_str("cursor seek operation exceeded the bounds of the underlying buffer")
            }
            InternalError::BadByteCount(size) => {
                write!(f, "byte count would exceed maximum size of u8: {size}")
            }
        }
    }
}
