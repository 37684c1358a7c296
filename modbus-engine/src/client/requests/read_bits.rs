use crate::client::message::Promise;
use crate::common::bits::num_bytes_for_bits;
use crate::common::cursor::ReadCursor;
use crate::common::function::FunctionCode;
use crate::decode::PduDecodeLevel;
use crate::error::{AduParseError, RequestError};
use crate::types::{AddressRange, BitIterator, BitIteratorDisplay, BitVector, ReadBitsRange};

pub(crate) struct ReadBits {
    pub(crate) request: ReadBitsRange,
    promise: Promise<BitVector>,
}

impl ReadBits {
    pub(crate) fn new(request: ReadBitsRange, promise: Promise<BitVector>) -> Self {
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
        let bits = Self::parse_bits_response(self.request.get(), &mut cursor)?;

        if decode.enabled() {
            tracing::info!(
                "PDU RX - {} {}",
                function,
                BitIteratorDisplay::new(decode, bits)
            );
        }

        self.promise.success(bits.to_bit_vector());
        Ok(())
    }

    fn parse_bits_response<'a>(
        range: AddressRange,
        cursor: &mut ReadCursor<'a>,
    ) -> Result<BitIterator<'a>, RequestError> {
        let expected = num_bytes_for_bits(range.count);
        let byte_count = cursor.read_u8()? as usize;
        if byte_count != expected {
            return Err(AduParseError::RequestByteCountMismatch(expected, byte_count).into());
        }
        if cursor.len() < byte_count {
            return Err(
                AduParseError::InsufficientBytesForByteCount(byte_count, cursor.len()).into(),
            );
        }
        BitIterator::parse_all(range, cursor)
    }
}
