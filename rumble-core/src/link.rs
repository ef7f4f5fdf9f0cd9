//! Link-layer abstraction: neighbours, connection contract, guarded I/O halves.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::identity::NodeId;

/// Transport family a neighbour was seen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkLayerKind {
    Bluetooth,
    Wifi,
}

impl LinkLayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkLayerKind::Bluetooth => "Bluetooth",
            LinkLayerKind::Wifi => "Wifi",
        }
    }
}

impl fmt::Display for LinkLayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tie-breaker when several transports reach the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkLayerPriority {
    Low = 0,
    Middle = 5,
    High = 10,
}

impl LinkLayerPriority {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// A remote device as seen on one transport. Equality is by (kind, address);
/// the resolved node is extra information and does not take part.
#[derive(Debug, Clone)]
pub struct LinkLayerNeighbour {
    kind: LinkLayerKind,
    address: String,
    node: Option<NodeId>,
}

impl LinkLayerNeighbour {
    pub fn new(kind: LinkLayerKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            node: None,
        }
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn kind(&self) -> LinkLayerKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Address without its port. Stable across reconnects from the same
    /// device, unlike the ephemeral port of an accepted connection.
    pub fn host(&self) -> String {
        match self.address.parse::<SocketAddr>() {
            Ok(addr) => addr.ip().to_string(),
            Err(_) => self.address.clone(),
        }
    }
}

impl PartialEq for LinkLayerNeighbour {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.address == other.address
    }
}

impl Eq for LinkLayerNeighbour {}

impl Hash for LinkLayerNeighbour {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.address.hash(state);
    }
}

impl fmt::Display for LinkLayerNeighbour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.address)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkLayerError {
    #[error("connection to {address} failed: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("no socket was opened for {0}")]
    NullSocket(String),
    #[error("socket for {0} is already closed")]
    SocketAlreadyClosed(String),
    #[error("connection {0} is already established")]
    AlreadyConnected(String),
    #[error("input/output streams unavailable for {0}")]
    StreamUnavailable(String),
    #[error("could not join multicast group {group} after {attempts} attempts: {source}")]
    MulticastJoin {
        group: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Read side of a connection, valid only while the connection is open.
#[async_trait]
pub trait InboundStream: Send {
    /// Fill `buf` completely. Stream transports fail with `UnexpectedEof` when the
    /// peer closed; datagram transports fail with `InvalidData` when the current
    /// datagram is shorter than requested.
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Next whole datagram, for transports that preserve message boundaries.
    async fn read_datagram(&mut self) -> io::Result<Vec<u8>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport has no datagram boundaries",
        ))
    }

    /// Drop buffered bytes of a partially consumed unit. No-op on byte streams.
    fn discard_remaining(&mut self) {}
}

/// Write side of a connection, valid only while the connection is open.
#[async_trait]
pub trait OutboundStream: Send {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}

/// Shared open/closed flag between a connection and the halves it handed out.
#[derive(Debug, Clone)]
pub struct StreamGuard(Arc<AtomicBool>);

impl StreamGuard {
    pub fn open() -> Self {
        StreamGuard(Arc::new(AtomicBool::new(true)))
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> io::Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already disconnected",
            ))
        }
    }
}

/// Byte-stream read half wrapped with the connection's guard.
pub struct GuardedReader<R> {
    inner: R,
    guard: StreamGuard,
}

impl<R> GuardedReader<R> {
    pub fn new(inner: R, guard: StreamGuard) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> InboundStream for GuardedReader<R> {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.guard.check()?;
        self.inner.read_exact(buf).await?;
        Ok(())
    }
}

/// Byte-stream write half wrapped with the connection's guard.
pub struct GuardedWriter<W> {
    inner: W,
    guard: StreamGuard,
}

impl<W> GuardedWriter<W> {
    pub fn new(inner: W, guard: StreamGuard) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> OutboundStream for GuardedWriter<W> {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.guard.check()?;
        self.inner.write_all(buf).await?;
        self.inner.flush().await
    }
}

pub type StreamPair = (Box<dyn InboundStream>, Box<dyn OutboundStream>);

/// Lifecycle of a connection object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

/// One transport-level session to one neighbour.
///
/// `connect` on a connected instance returns `AlreadyConnected` and opens
/// nothing. `disconnect` succeeds once (also after a failed connect); later
/// calls return `SocketAlreadyClosed`.
#[async_trait]
pub trait LinkLayerConnection: Send + Sync {
    /// Stable per remote endpoint, e.g. `Wifi:TCP:10.0.0.2`.
    fn connection_id(&self) -> String;

    fn link_layer_kind(&self) -> LinkLayerKind;

    fn priority(&self) -> LinkLayerPriority;

    fn neighbour(&self) -> &LinkLayerNeighbour;

    async fn connect(&mut self) -> Result<(), LinkLayerError>;

    async fn disconnect(&mut self) -> Result<(), LinkLayerError>;

    /// Hand out the I/O halves once, after a successful connect.
    fn take_streams(&mut self) -> Result<StreamPair, LinkLayerError>;
}
