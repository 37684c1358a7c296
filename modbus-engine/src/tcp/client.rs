use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::client::message::Command;
use crate::client::task::{ClientLoop, SessionError};
use crate::common::frame::{FrameWriter, FramedReader};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::retry::RetryStrategy;

/// Owns the connection to a single TCP slave and reconnects when it is lost
pub(crate) struct TcpChannelTask {
    addr: SocketAddr,
    connect_retry: Box<dyn RetryStrategy>,
    client_loop: ClientLoop,
}

impl TcpChannelTask {
    pub(crate) fn new(
        addr: SocketAddr,
        rx: crate::channel::Receiver<Command>,
        connect_retry: Box<dyn RetryStrategy>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            addr,
            connect_retry,
            client_loop: ClientLoop::new(rx, FrameWriter::tcp(), FramedReader::tcp(), decode),
        }
    }

    pub(crate) async fn run(&mut self) {
        // try to connect
        loop {
            match TcpStream::connect(self.addr).await {
                Err(err) => {
                    tracing::warn!("error connecting to {}: {}", self.addr, err);
                    let delay = self.connect_retry.after_failed_connect();
                    if self.client_loop.fail_requests_for(delay).await.is_err() {
                        // this occurs when the mpsc is dropped, so the task can exit
                        return;
                    }
                }
                Ok(socket) => {
                    if let Err(err) = socket.set_nodelay(true) {
                        tracing::warn!("unable to enable TCP_NODELAY: {}", err);
                    }
                    tracing::info!("connected to: {}", self.addr);
                    self.connect_retry.reset();
                    let mut phys = PhysLayer::new_tcp(socket);
                    match self.client_loop.run(&mut phys).await {
                        // the mpsc was closed, end the task
                        SessionError::Shutdown => return,
                        // re-establish the connection
                        SessionError::IoError(_) | SessionError::BadFrame => {
                            let delay = self.connect_retry.after_disconnect();
                            tracing::info!("waiting {:?} before reconnecting", delay);
                            if self.client_loop.fail_requests_for(delay).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}
