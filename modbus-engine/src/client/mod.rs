//! Modbus master: a [`Channel`] queues requests to a task that owns the transport
//!
//! Each request is framed, sent, and correlated with its reply by the task. At most
//! one request is in flight per channel.

use std::net::SocketAddr;

use crate::decode::DecodeLevel;
use crate::retry::RetryStrategy;
use crate::tcp::client::TcpChannelTask;

mod channel;
pub(crate) mod message;
pub(crate) mod requests;
pub(crate) mod task;

pub use channel::*;

/// Spawns a channel task onto the runtime that maintains a TCP connection and processes
/// requests. The task completes when the returned channel handle and all derived session
/// handles are dropped.
///
/// * `addr` - A socket address of the slave
/// * `max_queued_requests` - The maximum size of the request queue
/// * `retry` - A boxed [`RetryStrategy`] that paces reconnection attempts
/// * `decode` - Decode log level
pub fn spawn_tcp_client_task(
    addr: SocketAddr,
    max_queued_requests: usize,
    retry: Box<dyn RetryStrategy>,
    decode: DecodeLevel,
) -> Channel {
    let (handle, task) = create_tcp_handle_and_task(addr, max_queued_requests, retry, decode);
    tokio::spawn(task);
    handle
}

/// Creates a channel handle and a future that runs the TCP channel task
///
/// Useful when the caller wants to control where the task runs.
pub fn create_tcp_handle_and_task(
    addr: SocketAddr,
    max_queued_requests: usize,
    retry: Box<dyn RetryStrategy>,
    decode: DecodeLevel,
) -> (Channel, impl std::future::Future<Output = ()>) {
    let (tx, rx) = tokio::sync::mpsc::channel(max_queued_requests);
    let task = async move {
        TcpChannelTask::new(addr, rx.into(), retry, decode)
            .run()
            .await
    };
    (Channel::new(tx), task)
}

/// Spawns a channel task onto the runtime that opens a serial port and talks RTU
///
/// * `path` - Path to the serial device. Generally `/dev/tty0` on Linux and `COM1` on Windows.
/// * `serial_settings` - Serial port settings
/// * `max_queued_requests` - The maximum size of the request queue
/// * `retry` - A boxed [`RetryStrategy`] that paces attempts to re-open the port
/// * `decode` - Decode log level
#[cfg(feature = "serial")]
pub fn spawn_rtu_client_task(
    path: &str,
    serial_settings: crate::serial::SerialSettings,
    max_queued_requests: usize,
    retry: Box<dyn RetryStrategy>,
    decode: DecodeLevel,
) -> Channel {
    let (tx, rx) = tokio::sync::mpsc::channel(max_queued_requests);
    let mut task = crate::serial::client::SerialChannelTask::new(
        path,
        serial_settings,
        rx.into(),
        retry,
        decode,
    );
    tokio::spawn(async move { task.run().await });
    Channel::new(tx)
}
