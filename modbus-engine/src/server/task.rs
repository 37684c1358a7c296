use std::sync::Arc;

use crate::common::cursor::ReadCursor;
use crate::common::frame::{Frame, FrameWriter, FramedReader, FunctionField};
use crate::common::function::FunctionCode;
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::exception::ExceptionCode;
use crate::server::handler::{RequestHandler, ServerHandlerMap};
use crate::server::request::{Request, RequestDisplay};

/// Serves requests from a single connected master
pub(crate) struct SessionTask<T: RequestHandler> {
    io: PhysLayer,
    handlers: ServerHandlerMap<T>,
    writer: FrameWriter,
    reader: FramedReader,
    shutdown: tokio::sync::mpsc::Receiver<()>,
    decode: DecodeLevel,
}

impl<T> SessionTask<T>
where
    T: RequestHandler,
{
    pub(crate) fn new(
        io: PhysLayer,
        handlers: ServerHandlerMap<T>,
        writer: FrameWriter,
        reader: FramedReader,
        shutdown: tokio::sync::mpsc::Receiver<()>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            io,
            handlers,
            writer,
            reader,
            shutdown,
            decode,
        }
    }

    /// Run until the connection fails or the session is evicted
    pub(crate) async fn run(&mut self) -> Result<(), RequestError> {
        loop {
            tokio::select! {
                frame = self.reader.next_frame(&mut self.io, self.decode) => {
                    self.reply_to_request(frame?).await?;
                }
                _ = self.shutdown.recv() => {
                    return Err(RequestError::Shutdown);
                }
            }
        }
    }

    async fn reply_to_request(&mut self, frame: Frame) -> Result<(), RequestError> {
        let handler = match self.handlers.get(frame.header.unit_id) {
            None => {
                tracing::warn!(
                    "received frame for unmapped unit id: {}",
                    frame.header.unit_id
                );
                return Ok(());
            }
            Some(handler) => Arc::clone(handler),
        };

        let mut cursor = ReadCursor::new(frame.payload());

        let function = match cursor.read_u8() {
            Err(_) => {
                tracing::warn!("received request without a function code");
                return Ok(());
            }
            Ok(value) => match FunctionCode::get(value) {
                Some(x) => x,
                None => {
                    tracing::warn!("received unknown function code: {:#04X}", value);
                    let reply = self.writer.format_ex(
                        frame.header,
                        FunctionField::unknown(value),
                        ExceptionCode::IllegalFunction,
                        self.decode,
                    )?;
                    self.io.write(reply, self.decode.physical).await?;
                    return Ok(());
                }
            },
        };

        let request = match Request::parse(function, &mut cursor) {
            Ok(x) => x,
            Err(err) => {
                tracing::warn!("error parsing {} request: {}", function, err);
                let reply = self.writer.format_ex(
                    frame.header,
                    FunctionField::Exception(function),
                    ExceptionCode::IllegalDataValue,
                    self.decode,
                )?;
                self.io.write(reply, self.decode.physical).await?;
                return Ok(());
            }
        };

        if self.decode.pdu.enabled() {
            tracing::info!("PDU RX - {}", RequestDisplay::new(self.decode.pdu, &request));
        }

        let reply = request.get_reply(frame.header, &handler, &mut self.writer, self.decode)?;
        self.io.write(reply, self.decode.physical).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::server::image::ProcessImage;
    use crate::types::UnitId;

    fn spawn_session() -> (
        Arc<Mutex<ProcessImage>>,
        tokio::sync::mpsc::Sender<()>,
        tokio::task::JoinHandle<Result<(), RequestError>>,
        DuplexStream,
    ) {
        let image = ProcessImage::new(16, 16, 16).wrap();
        let handlers = ServerHandlerMap::single(UnitId::new(1), image.clone());
        let (client, server) = tokio::io::duplex(1024);
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let mut task = SessionTask::new(
            PhysLayer::new_mock(server),
            handlers,
            FrameWriter::tcp(),
            FramedReader::tcp(),
            rx,
            DecodeLevel::nothing(),
        );
        let join = tokio::spawn(async move { task.run().await });
        (image, tx, join, client)
    }

    async fn round_trip(io: &mut DuplexStream, request: &[u8], reply_len: usize) -> Vec<u8> {
        io.write_all(request).await.unwrap();
        let mut reply = vec![0; reply_len];
        io.read_exact(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn replies_to_read_coils() {
        let (image, _tx, _task, mut io) = spawn_session();
        image.lock().unwrap().write_coils(0, &[true, false, true].into_iter().collect()).unwrap();

        let reply = round_trip(
            &mut io,
            &[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x03],
            10,
        )
        .await;
        assert_eq!(reply, &[0x00, 0x07, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x01, 0x05]);
    }

    #[tokio::test]
    async fn echoes_mask_write_and_updates_image() {
        let (image, _tx, _task, mut io) = spawn_session();
        image.lock().unwrap().write_registers(4, &[0x0012]).unwrap();

        let request = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x08, 0x01, 0x16, 0x00, 0x04, 0x00, 0xF2, 0x00, 0x25,
        ];
        let reply = round_trip(&mut io, &request, request.len()).await;
        assert_eq!(reply, &request);

        let range = crate::types::AddressRange::try_from(4, 1).unwrap();
        assert_eq!(image.lock().unwrap().read_registers(range), Ok(vec![0x0017]));
    }

    #[tokio::test]
    async fn out_of_range_read_returns_illegal_data_address() {
        let (_image, _tx, _task, mut io) = spawn_session();

        let reply = round_trip(
            &mut io,
            &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x0F, 0x00, 0x02],
            9,
        )
        .await;
        assert_eq!(reply, &[0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);
    }

    #[tokio::test]
    async fn unknown_function_returns_illegal_function() {
        let (_image, _tx, _task, mut io) = spawn_session();

        let reply = round_trip(&mut io, &[0x00, 0x03, 0x00, 0x00, 0x00, 0x02, 0x01, 0x2B], 9).await;
        assert_eq!(reply, &[0x00, 0x03, 0x00, 0x00, 0x00, 0x03, 0x01, 0xAB, 0x01]);
    }

    #[tokio::test]
    async fn malformed_request_returns_illegal_data_value() {
        let (_image, _tx, _task, mut io) = spawn_session();

        let reply = round_trip(
            &mut io,
            &[0x00, 0x04, 0x00, 0x00, 0x00, 0x06, 0x01, 0x05, 0x00, 0x01, 0x12, 0x34],
            9,
        )
        .await;
        assert_eq!(reply, &[0x00, 0x04, 0x00, 0x00, 0x00, 0x03, 0x01, 0x85, 0x03]);
    }

    #[tokio::test]
    async fn unmapped_unit_is_ignored() {
        let (_image, _tx, _task, mut io) = spawn_session();

        io.write_all(&[0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x02, 0x06, 0x00, 0x01, 0x00, 0x01])
            .await
            .unwrap();
        let reply = round_trip(
            &mut io,
            &[0x00, 0x06, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x01],
            12,
        )
        .await;
        // the first reply on the wire answers the second request
        assert_eq!(
            reply,
            &[0x00, 0x06, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x01]
        );
    }

    struct ShortReads;

    impl RequestHandler for ShortReads {
        fn read_holding_registers(
            &self,
            _range: crate::types::AddressRange,
        ) -> Result<Vec<u16>, ExceptionCode> {
            Ok(vec![0xAAAA])
        }

        fn read_coils(
            &self,
            _range: crate::types::AddressRange,
        ) -> Result<crate::types::BitVector, ExceptionCode> {
            Ok(crate::types::BitVector::new(20))
        }
    }

    #[tokio::test]
    async fn wrong_value_count_from_handler_returns_device_failure() {
        let handlers = ServerHandlerMap::single(UnitId::new(1), ShortReads.wrap());
        let (mut io, server) = tokio::io::duplex(1024);
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let mut task = SessionTask::new(
            PhysLayer::new_mock(server),
            handlers,
            FrameWriter::tcp(),
            FramedReader::tcp(),
            rx,
            DecodeLevel::nothing(),
        );
        let _task = tokio::spawn(async move { task.run().await });

        let reply = round_trip(
            &mut io,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x03],
            9,
        )
        .await;
        assert_eq!(reply, &[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x04]);

        let reply = round_trip(
            &mut io,
            &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x00, 0x00, 0x10],
            9,
        )
        .await;
        assert_eq!(reply, &[0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x04]);
    }

    #[tokio::test]
    async fn session_ends_when_evicted() {
        let (_image, tx, task, _io) = spawn_session();
        drop(tx);
        assert_eq!(task.await.unwrap(), Err(RequestError::Shutdown));
    }
}
