//! TCP transport: unicast connections (dialled or accepted) and the accepting
//! server worker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::link::{
    ConnectionState, GuardedReader, GuardedWriter, LinkLayerConnection, LinkLayerError,
    LinkLayerKind, LinkLayerNeighbour, LinkLayerPriority, StreamGuard, StreamPair,
};
use crate::protocol::ProtocolKind;
use crate::worker::{stop_requested, Worker, WorkerError};

pub struct TcpConnection {
    neighbour: LinkLayerNeighbour,
    target: SocketAddr,
    connect_timeout: Duration,
    state: ConnectionState,
    stream: Option<TcpStream>,
    guard: StreamGuard,
}

impl TcpConnection {
    /// A connection that dials `target` on `connect`.
    pub fn outbound(
        neighbour: LinkLayerNeighbour,
        target: SocketAddr,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            neighbour,
            target,
            connect_timeout,
            state: ConnectionState::Unconnected,
            stream: None,
            guard: StreamGuard::open(),
        }
    }

    /// Wrap a stream handed out by a listener; `connect` only flips state.
    pub fn accepted(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            neighbour: LinkLayerNeighbour::new(LinkLayerKind::Wifi, peer.to_string()),
            target: peer,
            connect_timeout: Duration::ZERO,
            state: ConnectionState::Unconnected,
            stream: Some(stream),
            guard: StreamGuard::open(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

#[async_trait]
impl LinkLayerConnection for TcpConnection {
    fn connection_id(&self) -> String {
        format!("Wifi:TCP:{}", self.target)
    }

    fn link_layer_kind(&self) -> LinkLayerKind {
        LinkLayerKind::Wifi
    }

    fn priority(&self) -> LinkLayerPriority {
        LinkLayerPriority::High
    }

    fn neighbour(&self) -> &LinkLayerNeighbour {
        &self.neighbour
    }

    async fn connect(&mut self) -> Result<(), LinkLayerError> {
        match self.state {
            ConnectionState::Connected => {
                return Err(LinkLayerError::AlreadyConnected(self.connection_id()))
            }
            ConnectionState::Closed => {
                return Err(LinkLayerError::SocketAlreadyClosed(self.connection_id()))
            }
            ConnectionState::Unconnected => {}
        }
        if self.stream.is_none() {
            let attempt = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.target));
            let stream = match attempt.await {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => {
                    return Err(LinkLayerError::ConnectionFailed {
                        address: self.target.to_string(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(LinkLayerError::ConnectionFailed {
                        address: self.target.to_string(),
                        source: std::io::ErrorKind::TimedOut.into(),
                    })
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %self.target, error = %e, "set_nodelay");
            }
            self.stream = Some(stream);
        }
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkLayerError> {
        if self.state == ConnectionState::Closed {
            return Err(LinkLayerError::SocketAlreadyClosed(self.connection_id()));
        }
        self.guard.close();
        self.stream = None;
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn take_streams(&mut self) -> Result<StreamPair, LinkLayerError> {
        if self.state != ConnectionState::Connected {
            return Err(LinkLayerError::StreamUnavailable(self.connection_id()));
        }
        let stream = self
            .stream
            .take()
            .ok_or_else(|| LinkLayerError::NullSocket(self.connection_id()))?;
        let (r, w) = stream.into_split();
        Ok((
            Box::new(GuardedReader::new(r, self.guard.clone())),
            Box::new(GuardedWriter::new(w, self.guard.clone())),
        ))
    }
}

/// Called for every accepted connection.
pub type ConnectionHandler = Arc<dyn Fn(TcpConnection) + Send + Sync>;

/// Accept loop for inbound Rumble connections. Binds on construction so the
/// port is known before the worker runs.
pub struct TcpServerWorker {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    on_accept: ConnectionHandler,
    shutdown: watch::Sender<bool>,
    working: AtomicBool,
}

impl TcpServerWorker {
    pub async fn bind(addr: SocketAddr, on_accept: ConnectionHandler) -> Result<Self, LinkLayerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LinkLayerError::ConnectionFailed {
                address: addr.to_string(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| LinkLayerError::ConnectionFailed {
                address: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            on_accept,
            shutdown: watch::channel(false).0,
            working: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Worker for TcpServerWorker {
    fn worker_id(&self) -> String {
        format!("Wifi:TCP-server:{}", self.local_addr.port())
    }

    fn link_layer_kind(&self) -> LinkLayerKind {
        LinkLayerKind::Wifi
    }

    fn protocol_kind(&self) -> ProtocolKind {
        ProtocolKind::Rumble
    }

    async fn start_worker(&self) -> Result<(), WorkerError> {
        let listener = self.listener.lock().take();
        let Some(listener) = listener else {
            return Err(WorkerError::AlreadyStarted(self.worker_id()));
        };
        self.working.store(true, Ordering::SeqCst);
        info!(addr = %self.local_addr, "tcp server listening");
        let mut shutdown = self.shutdown.subscribe();
        let result = loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted tcp connection");
                        (self.on_accept)(TcpConnection::accepted(stream, peer));
                    }
                    Err(e) => break Err(WorkerError::Accept(e)),
                },
            }
        };
        self.working.store(false, Ordering::SeqCst);
        info!(addr = %self.local_addr, "tcp server stopped");
        result
    }

    fn stop_worker(&self) {
        self.shutdown.send_replace(true);
    }

    fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }
}
