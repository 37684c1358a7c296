use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::TcpListener;

use crate::common::frame::{FrameWriter, FramedReader};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::server::handler::{RequestHandler, ServerHandlerMap};
use crate::server::task::SessionTask;

/// Tracks live sessions so that the oldest can be closed when the limit is reached
struct SessionTracker {
    max: usize,
    id: u64,
    sessions: BTreeMap<u64, tokio::sync::mpsc::Sender<()>>,
}

type SessionTrackerWrapper = Arc<Mutex<SessionTracker>>;

impl SessionTracker {
    fn new(max: usize) -> SessionTracker {
        Self {
            max,
            id: 0,
            sessions: BTreeMap::new(),
        }
    }

    fn get_next_id(&mut self) -> u64 {
        let ret = self.id;
        self.id += 1;
        ret
    }

    fn wrapped(max: usize) -> SessionTrackerWrapper {
        Arc::new(Mutex::new(Self::new(max)))
    }

    fn add(&mut self, sender: tokio::sync::mpsc::Sender<()>) -> u64 {
        if self.sessions.len() >= self.max {
            if let Some((id, _)) = self.sessions.pop_first() {
                // dropping the only sender ends the session task
                tracing::warn!("exceeded max connections, closing oldest session: {}", id);
            }
        }

        let id = self.get_next_id();
        self.sessions.insert(id, sender);
        id
    }

    fn remove(&mut self, id: u64) {
        self.sessions.remove(&id);
    }
}

pub(crate) struct ServerTask<T: RequestHandler> {
    listener: TcpListener,
    handlers: ServerHandlerMap<T>,
    tracker: SessionTrackerWrapper,
    decode: DecodeLevel,
}

impl<T> ServerTask<T>
where
    T: RequestHandler,
{
    pub(crate) fn new(
        max_sessions: usize,
        listener: TcpListener,
        handlers: ServerHandlerMap<T>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            listener,
            handlers,
            tracker: SessionTracker::wrapped(max_sessions),
            decode,
        }
    }

    pub(crate) async fn run(&mut self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        loop {
            tokio::select! {
               _ = shutdown.recv() => {
                    tracing::info!("server shutdown");
                    return;
               }
               result = self.listener.accept() => {
                   match result {
                        Err(err) => {
                            tracing::error!("error accepting connection: {}", err);
                            return;
                        }
                        Ok((socket, addr)) => {
                            self.handle(socket, addr)
                        }
                   }
               }
            }
        }
    }

    fn handle(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let phys = PhysLayer::new_tcp(socket);
        let decode = self.decode;
        let handlers = self.handlers.clone();
        let tracker = self.tracker.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(1);

        let id = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(tx);

        tracing::info!("accepted connection {} from: {}", id, addr);

        tokio::spawn(async move {
            let result = SessionTask::new(
                phys,
                handlers,
                FrameWriter::tcp(),
                FramedReader::tcp(),
                rx,
                decode,
            )
            .run()
            .await;
            if let Err(err) = result {
                tracing::info!("session {} ended: {}", id, err);
            }
            tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_evicts_oldest_session() {
        let mut tracker = SessionTracker::new(2);
        let (tx1, mut rx1) = tokio::sync::mpsc::channel(1);
        let (tx2, mut rx2) = tokio::sync::mpsc::channel(1);
        let (tx3, mut rx3) = tokio::sync::mpsc::channel::<()>(1);

        assert_eq!(tracker.add(tx1), 0);
        assert_eq!(tracker.add(tx2), 1);
        assert_eq!(tracker.add(tx3), 2);

        assert_eq!(
            rx1.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        );
        assert_eq!(
            rx2.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty)
        );
        assert_eq!(
            rx3.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty)
        );
    }

    #[test]
    fn removed_sessions_free_a_slot() {
        let mut tracker = SessionTracker::new(1);
        let (tx1, mut rx1) = tokio::sync::mpsc::channel::<()>(1);
        let (tx2, _rx2) = tokio::sync::mpsc::channel::<()>(1);

        let id = tracker.add(tx1);
        tracker.remove(id);
        assert_eq!(
            rx1.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        );
        tracker.add(tx2);
        assert_eq!(tracker.sessions.len(), 1);
    }
}
