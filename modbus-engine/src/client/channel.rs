use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::client::message::{Command, Promise, Request, RequestDetails};
use crate::client::requests::read_bits::ReadBits;
use crate::client::requests::read_registers::ReadRegisters;
use crate::client::requests::write_multiple::MultipleWrite;
use crate::client::requests::write_single::SingleWrite;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::types::{AddressRange, BitVector, Indexed, MaskWrite, UnitId, WriteMultiple};

/// Async channel used to make requests
///
/// Cloning the channel is cheap and every clone talks to the same task. The task
/// shuts down once every clone has been dropped.
#[derive(Debug, Clone)]
pub struct Channel {
    tx: mpsc::Sender<Command>,
}

/// Request parameters to dispatch the request to the proper device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestParam {
    /// Unit ID of the target device
    pub id: UnitId,
    /// Response timeout applied to each attempt
    pub response_timeout: Duration,
    /// Number of times the request is re-sent after a response timeout
    ///
    /// Only timeouts are retried. A retried write may be applied twice if the
    /// first reply was merely late.
    pub retries: usize,
}

impl RequestParam {
    /// Create a new `RequestParam` that is sent only once
    pub fn new(id: UnitId, response_timeout: Duration) -> Self {
        Self {
            id,
            response_timeout,
            retries: 0,
        }
    }

    /// Set the number of extra attempts made after a response timeout
    pub fn with_retries(self, retries: usize) -> Self {
        Self { retries, ..self }
    }
}

impl Channel {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Read coils from the server
    pub async fn read_coils(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<Vec<Indexed<bool>>, RequestError> {
        let bits = self.read_coils_bits(param, range).await?;
        Ok(range.iter().zip(bits.iter()).map(Indexed::from).collect())
    }

    /// Read coils from the server and return them packed in a [`BitVector`]
    pub async fn read_coils_bits(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<BitVector, RequestError> {
        let range = range.of_read_bits()?;
        self.send(param, |promise| {
            RequestDetails::ReadCoils(ReadBits::new(range, promise))
        })
        .await
    }

    /// Read discrete inputs from the server
    pub async fn read_discrete_inputs(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<Vec<Indexed<bool>>, RequestError> {
        let bits_range = range.of_read_bits()?;
        let bits = self
            .send(param, |promise| {
                RequestDetails::ReadDiscreteInputs(ReadBits::new(bits_range, promise))
            })
            .await?;
        Ok(range.iter().zip(bits.iter()).map(Indexed::from).collect())
    }

    /// Read holding registers from the server
    pub async fn read_holding_registers(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        let range = range.of_read_registers()?;
        self.send(param, |promise| {
            RequestDetails::ReadHoldingRegisters(ReadRegisters::new(range, promise))
        })
        .await
    }

    /// Read input registers from the server
    pub async fn read_input_registers(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        let range = range.of_read_registers()?;
        self.send(param, |promise| {
            RequestDetails::ReadInputRegisters(ReadRegisters::new(range, promise))
        })
        .await
    }

    /// Write a single coil on the server
    pub async fn write_single_coil(
        &mut self,
        param: RequestParam,
        request: Indexed<bool>,
    ) -> Result<Indexed<bool>, RequestError> {
        self.send(param, |promise| {
            RequestDetails::WriteSingleCoil(SingleWrite::new(request, promise))
        })
        .await
    }

    /// Write a single register on the server
    pub async fn write_single_register(
        &mut self,
        param: RequestParam,
        request: Indexed<u16>,
    ) -> Result<Indexed<u16>, RequestError> {
        self.send(param, |promise| {
            RequestDetails::WriteSingleRegister(SingleWrite::new(request, promise))
        })
        .await
    }

    /// Write multiple contiguous coils on the server
    ///
    /// Returns the range the server confirmed. A reply that confirms anything
    /// other than the full range fails with a reply echo mismatch.
    pub async fn write_multiple_coils(
        &mut self,
        param: RequestParam,
        request: WriteMultiple<bool>,
    ) -> Result<AddressRange, RequestError> {
        self.send(param, |promise| {
            RequestDetails::WriteMultipleCoils(MultipleWrite::new(request, promise))
        })
        .await
    }

    /// Write multiple contiguous registers on the server
    pub async fn write_multiple_registers(
        &mut self,
        param: RequestParam,
        request: WriteMultiple<u16>,
    ) -> Result<AddressRange, RequestError> {
        self.send(param, |promise| {
            RequestDetails::WriteMultipleRegisters(MultipleWrite::new(request, promise))
        })
        .await
    }

    /// Modify a single holding register with an AND and an OR mask
    pub async fn mask_write_register(
        &mut self,
        param: RequestParam,
        request: MaskWrite,
    ) -> Result<MaskWrite, RequestError> {
        self.send(param, |promise| {
            RequestDetails::MaskWriteRegister(SingleWrite::new(request, promise))
        })
        .await
    }

    /// Dynamically change the protocol decoding level of the channel
    pub async fn set_decode_level(&mut self, level: DecodeLevel) -> Result<(), RequestError> {
        self.tx.send(Command::SetDecodeLevel(level)).await?;
        Ok(())
    }

    async fn send<T, F>(&mut self, param: RequestParam, create: F) -> Result<T, RequestError>
    where
        F: FnOnce(Promise<T>) -> RequestDetails,
    {
        let (tx, rx) = oneshot::channel::<Result<T, RequestError>>();
        let request = Request::new(param, create(Promise::new(tx)));
        self.tx.send(Command::Request(request)).await?;
        rx.await?
    }
}
