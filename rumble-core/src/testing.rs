//! In-memory and loopback connections used by unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::events::NetworkEvent;
use crate::link::{
    ConnectionState, GuardedReader, GuardedWriter, LinkLayerConnection, LinkLayerError,
    LinkLayerKind, LinkLayerNeighbour, LinkLayerPriority, StreamGuard, StreamPair,
};
use crate::multicast::{DatagramReader, DatagramWriter};

pub(crate) struct MemoryConnection {
    neighbour: LinkLayerNeighbour,
    state: ConnectionState,
    stream: Option<DuplexStream>,
    guard: StreamGuard,
    fail_connect: bool,
    pub(crate) sockets_opened: Arc<AtomicUsize>,
}

/// A connection whose far end is the returned duplex half.
pub(crate) fn memory_pair(address: &str) -> (MemoryConnection, DuplexStream) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let conn = MemoryConnection {
        neighbour: LinkLayerNeighbour::new(LinkLayerKind::Wifi, address),
        state: ConnectionState::Unconnected,
        stream: Some(near),
        guard: StreamGuard::open(),
        fail_connect: false,
        sockets_opened: Arc::new(AtomicUsize::new(0)),
    };
    (conn, far)
}

impl MemoryConnection {
    pub(crate) fn refusing(address: &str) -> Self {
        let (mut conn, _far) = memory_pair(address);
        conn.fail_connect = true;
        conn
    }
}

#[async_trait]
impl LinkLayerConnection for MemoryConnection {
    fn connection_id(&self) -> String {
        format!("Wifi:MEM:{}", self.neighbour.address())
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
        if self.fail_connect {
            return Err(LinkLayerError::ConnectionFailed {
                address: self.neighbour.address().to_string(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }
        if self.stream.is_none() {
            return Err(LinkLayerError::NullSocket(self.connection_id()));
        }
        self.sockets_opened.fetch_add(1, Ordering::SeqCst);
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
            .ok_or_else(|| LinkLayerError::StreamUnavailable(self.connection_id()))?;
        let (r, w) = tokio::io::split(stream);
        Ok((
            Box::new(GuardedReader::new(r, self.guard.clone())),
            Box::new(GuardedWriter::new(w, self.guard.clone())),
        ))
    }
}

/// Unicast loopback UDP connection with datagram framing. The far socket
/// sends to the returned address.
pub(crate) struct DatagramConnection {
    neighbour: LinkLayerNeighbour,
    state: ConnectionState,
    socket: Option<Arc<UdpSocket>>,
    far: SocketAddr,
    guard: StreamGuard,
}

pub(crate) async fn datagram_pair(address: &str) -> (DatagramConnection, UdpSocket, SocketAddr) {
    let near = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let far = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let near_addr = near.local_addr().unwrap();
    let conn = DatagramConnection {
        neighbour: LinkLayerNeighbour::new(LinkLayerKind::Wifi, address),
        state: ConnectionState::Unconnected,
        socket: Some(Arc::new(near)),
        far: far.local_addr().unwrap(),
        guard: StreamGuard::open(),
    };
    (conn, far, near_addr)
}

#[async_trait]
impl LinkLayerConnection for DatagramConnection {
    fn connection_id(&self) -> String {
        format!("Wifi:DGRAM:{}", self.neighbour.address())
    }

    fn link_layer_kind(&self) -> LinkLayerKind {
        LinkLayerKind::Wifi
    }

    fn priority(&self) -> LinkLayerPriority {
        LinkLayerPriority::Middle
    }

    fn neighbour(&self) -> &LinkLayerNeighbour {
        &self.neighbour
    }

    async fn connect(&mut self) -> Result<(), LinkLayerError> {
        if self.state != ConnectionState::Unconnected {
            return Err(LinkLayerError::AlreadyConnected(self.connection_id()));
        }
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkLayerError> {
        if self.state == ConnectionState::Closed {
            return Err(LinkLayerError::SocketAlreadyClosed(self.connection_id()));
        }
        self.guard.close();
        self.socket = None;
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn take_streams(&mut self) -> Result<StreamPair, LinkLayerError> {
        let socket = self
            .socket
            .clone()
            .ok_or_else(|| LinkLayerError::StreamUnavailable(self.connection_id()))?;
        Ok((
            Box::new(DatagramReader::new(socket.clone(), self.guard.clone())),
            Box::new(DatagramWriter::new(socket, self.far, self.guard.clone())),
        ))
    }
}

/// Next event matching `pred`, skipping others. Panics after five seconds.
pub(crate) async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<NetworkEvent>,
    mut pred: impl FnMut(&NetworkEvent) -> bool,
) -> NetworkEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(ev) if pred(&ev) => return ev,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `f` until it holds. Panics after five seconds.
pub(crate) async fn wait_until(mut f: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
