use crate::client::message::Command;
use crate::client::task::{ClientLoop, SessionError};
use crate::common::frame::{FrameWriter, FramedReader};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::Shutdown;
use crate::retry::RetryStrategy;
use crate::serial::SerialSettings;

/// Owns a serial port talking RTU to one or more slaves and re-opens it when it fails
pub(crate) struct SerialChannelTask {
    path: String,
    serial_settings: SerialSettings,
    retry: Box<dyn RetryStrategy>,
    client_loop: ClientLoop,
}

impl SerialChannelTask {
    pub(crate) fn new(
        path: &str,
        serial_settings: SerialSettings,
        rx: crate::channel::Receiver<Command>,
        retry: Box<dyn RetryStrategy>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            path: path.to_string(),
            serial_settings,
            retry,
            client_loop: ClientLoop::new(
                rx,
                FrameWriter::rtu(),
                FramedReader::rtu_response(),
                decode,
            ),
        }
    }

    pub(crate) async fn run(&mut self) -> Shutdown {
        loop {
            if let Err(Shutdown) = self.try_open_and_run().await {
                return Shutdown;
            }
        }
    }

    async fn try_open_and_run(&mut self) -> Result<(), Shutdown> {
        match crate::serial::open(self.path.as_str(), self.serial_settings) {
            Err(err) => {
                let delay = self.retry.after_failed_connect();
                tracing::warn!(
                    "{} - waiting {} ms to re-open port",
                    err,
                    delay.as_millis()
                );
                self.client_loop.fail_requests_for(delay).await
            }
            Ok(serial) => {
                self.retry.reset();
                let mut phys = PhysLayer::new_serial(serial, self.serial_settings.baud_rate);
                tracing::info!("serial port open: {}", self.path);
                match self.client_loop.run(&mut phys).await {
                    // the mpsc was closed, end the task
                    SessionError::Shutdown => Err(Shutdown),
                    // re-open the port
                    SessionError::IoError(_) | SessionError::BadFrame => {
                        let delay = self.retry.after_disconnect();
                        tracing::warn!("serial port closed, waiting {} ms to re-open", delay.as_millis());
                        self.client_loop.fail_requests_for(delay).await
                    }
                }
            }
        }
    }
}
