//! Modbus slave: serves one or more [`RequestHandler`]s, typically a [`ProcessImage`], over TCP

use std::net::SocketAddr;

use tracing::Instrument;

use crate::decode::DecodeLevel;
use crate::tcp::server::ServerTask;

pub(crate) mod handler;
pub(crate) mod image;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod task;

pub use handler::*;
pub use image::*;

/// A handle to the server async task. The task is shutdown when the handle is dropped.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    _tx: tokio::sync::mpsc::Sender<()>,
}

impl ServerHandle {
    /// The address the server is listening on
    ///
    /// Useful when binding to port 0 and letting the OS pick a free port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Spawns a TCP server task onto the runtime. This method can only
/// be called from within the runtime context.
///
/// Each incoming connection will spawn a new task to handle it.
///
/// * `max_sessions` - Maximum number of concurrent sessions
/// * `addr` - A socket address to bound to
/// * `handlers` - A map of handlers keyed by a unit id
/// * `decode` - Decode log level
pub async fn spawn_tcp_server_task<T: RequestHandler>(
    max_sessions: usize,
    addr: SocketAddr,
    handlers: ServerHandlerMap<T>,
    decode: DecodeLevel,
) -> Result<ServerHandle, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let (tx, rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        ServerTask::new(max_sessions, listener, handlers, decode)
            .run(rx)
            .instrument(tracing::info_span!("Modbus-Server-TCP", "listen" = ?local_addr))
            .await
    });

    Ok(ServerHandle {
        local_addr,
        _tx: tx,
    })
}
