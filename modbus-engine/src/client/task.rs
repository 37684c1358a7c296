use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::client::message::{Command, Request};
use crate::common::frame::{Frame, FrameWriter, FramedReader, TxId};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::{RequestError, Shutdown};

/**
* We execute requests in a session until one of the following occurs
*/
#[derive(Debug, PartialEq)]
pub(crate) enum SessionError {
    /// the stream errors
    IoError(std::io::ErrorKind),
    /// unrecoverable framing issue,
    BadFrame,
    /// the mpsc is closed (dropped) on the sender side
    Shutdown,
}

impl From<Shutdown> for SessionError {
    fn from(_: Shutdown) -> Self {
        SessionError::Shutdown
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SessionError::IoError(err) => {
                write!(f, "I/O error: {err}")
            }
            SessionError::BadFrame => {
                write!(f, "Parser encountered a bad frame")
            }
            SessionError::Shutdown => {
                write!(f, "Shutdown was requested")
            }
        }
    }
}

impl SessionError {
    pub(crate) fn from_request_err(err: RequestError) -> Option<Self> {
        match err {
            RequestError::Io(x) => Some(SessionError::IoError(x)),
            RequestError::BadFrame(_) => Some(SessionError::BadFrame),
            // all other errors don't kill the loop
            _ => None,
        }
    }
}

/// How a single attempt of a transaction resolved
///
/// An attempt starts out pending when the request is written and ends in exactly one of these.
pub(crate) enum TransactionState {
    /// a frame with the expected transaction and unit id arrived
    Matched(Frame),
    /// the deadline for this attempt expired
    TimedOut,
    /// the transport or the framer failed
    Failed(RequestError),
}

pub(crate) struct ClientLoop {
    rx: crate::channel::Receiver<Command>,
    writer: FrameWriter,
    reader: FramedReader,
    tx_id: TxId,
    decode: DecodeLevel,
}

impl ClientLoop {
    pub(crate) fn new(
        rx: crate::channel::Receiver<Command>,
        writer: FrameWriter,
        reader: FramedReader,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            rx,
            writer,
            reader,
            tx_id: TxId::default(),
            decode,
        }
    }

    pub(crate) async fn run(&mut self, io: &mut PhysLayer) -> SessionError {
        loop {
            if let Err(err) = self.poll(io).await {
                tracing::warn!("ending session: {}", err);
                return err;
            }
        }
    }

    pub(crate) async fn poll(&mut self, io: &mut PhysLayer) -> Result<(), SessionError> {
        tokio::select! {
            frame = self.reader.next_frame(io, self.decode) => {
                match frame {
                    Ok(frame) => {
                        tracing::warn!("Received unexpected frame while idle: {:?}", frame.header);
                        Ok(())
                    }
                    Err(err) => match SessionError::from_request_err(err) {
                        Some(err) => Err(err),
                        None => Ok(()),
                    }
                }
            }
            res = self.rx.recv() => {
                match res? {
                    Command::Request(mut request) => self.run_one_request(io, &mut request).await,
                    Command::SetDecodeLevel(level) => {
                        self.set_decode_level(level);
                        Ok(())
                    }
                }
            }
        }
    }

    async fn run_one_request(
        &mut self,
        io: &mut PhysLayer,
        request: &mut Request,
    ) -> Result<(), SessionError> {
        if let Err(err) = self.execute_request(io, request).await {
            // Fail the request in ONE place. If the whole future
            // gets dropped, then the request gets failed with Shutdown
            tracing::warn!("request error: {}", err);
            request.details.fail(err);

            // some request errors are a session error that will
            // bubble up and close the session
            if let Some(err) = SessionError::from_request_err(err) {
                return Err(err);
            }
        }

        Ok(())
    }

    async fn execute_request(
        &mut self,
        io: &mut PhysLayer,
        request: &mut Request,
    ) -> Result<(), RequestError> {
        let mut retries_left = request.retries;

        loop {
            let tx_id = self.tx_id.next();
            let result = self
                .attempt(io, request, tx_id)
                .instrument(tracing::info_span!("Transaction", tx_id = %tx_id))
                .await;

            match result {
                Err(RequestError::ResponseTimeout) => {
                    // a serial stream cannot resync a partially received reply
                    self.reader.reset();
                    if retries_left == 0 {
                        return Err(RequestError::ResponseTimeout);
                    }
                    retries_left -= 1;
                    tracing::warn!(
                        "response timeout for {}, retrying ({} remaining)",
                        tx_id,
                        retries_left
                    );
                }
                other => return other,
            }
        }
    }

    async fn attempt(
        &mut self,
        io: &mut PhysLayer,
        request: &mut Request,
        tx_id: TxId,
    ) -> Result<(), RequestError> {
        let header = self.writer.header(request.id, tx_id);
        let bytes = self.writer.format_request(
            header,
            request.details.function(),
            &request.details,
            self.decode,
        )?;

        io.write(bytes, self.decode.physical).await?;

        let deadline = Instant::now() + request.timeout;

        match self.wait_for_reply(io, request, tx_id, deadline).await {
            TransactionState::Matched(frame) => {
                // once we have a response, handle it. This may complete the promise
                // successfully or bubble up an error
                request.handle_response(frame.payload(), self.decode.pdu)
            }
            TransactionState::TimedOut => Err(RequestError::ResponseTimeout),
            TransactionState::Failed(err) => Err(err),
        }
    }

    // loop until we get a response with the correct ids or we timeout
    async fn wait_for_reply(
        &mut self,
        io: &mut PhysLayer,
        request: &Request,
        tx_id: TxId,
        deadline: Instant,
    ) -> TransactionState {
        loop {
            let frame = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return TransactionState::TimedOut;
                }
                frame = self.reader.next_frame(io, self.decode) => {
                    match frame {
                        Ok(frame) => frame,
                        Err(err) => return TransactionState::Failed(err),
                    }
                }
            };

            // only MBAP carries a transaction id
            if let Some(received) = frame.header.tx_id {
                if received != tx_id {
                    tracing::warn!("received {} while expecting {}, discarding", received, tx_id);
                    continue;
                }
            }

            if frame.header.unit_id != request.id {
                tracing::warn!(
                    "received reply from unit {} while expecting {}, discarding",
                    frame.header.unit_id,
                    request.id
                );
                continue;
            }

            return TransactionState::Matched(frame);
        }
    }

    fn set_decode_level(&mut self, level: DecodeLevel) {
        tracing::info!("Decode level changed: {:?}", level);
        self.decode = level;
    }

    async fn fail_next_request(&mut self) -> Result<(), Shutdown> {
        match self.rx.recv().await? {
            Command::Request(mut req) => {
                req.details.fail(RequestError::NoConnection);
            }
            Command::SetDecodeLevel(level) => self.set_decode_level(level),
        }
        Ok(())
    }

    /// Fail every request that arrives while the channel waits to reconnect
    pub(crate) async fn fail_requests_for(&mut self, duration: Duration) -> Result<(), Shutdown> {
        let deadline = Instant::now() + duration;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(())
                }
                x = self.fail_next_request() => {
                    x?
                }
            }
        }
    }
}
