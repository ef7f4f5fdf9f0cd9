//! UDP multicast transport. One connection per group; each write is one
//! datagram and reads never cross datagram boundaries.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::link::{
    ConnectionState, InboundStream, LinkLayerConnection, LinkLayerError, LinkLayerKind,
    LinkLayerNeighbour, LinkLayerPriority, OutboundStream, StreamGuard, StreamPair,
};

const MAX_DATAGRAM: usize = 65536;

pub struct UdpMulticastConnection {
    neighbour: LinkLayerNeighbour,
    group: Ipv4Addr,
    port: u16,
    join_attempts: u32,
    join_backoff: Duration,
    state: ConnectionState,
    socket: Option<Arc<UdpSocket>>,
    guard: StreamGuard,
}

impl UdpMulticastConnection {
    pub fn new(group: Ipv4Addr, port: u16, join_attempts: u32, join_backoff: Duration) -> Self {
        Self {
            neighbour: LinkLayerNeighbour::new(LinkLayerKind::Wifi, format!("{group}:{port}")),
            group,
            port,
            join_attempts: join_attempts.max(1),
            join_backoff,
            state: ConnectionState::Unconnected,
            socket: None,
            guard: StreamGuard::open(),
        }
    }
}

/// Bind `port` on all interfaces and join `group`, retrying the join up to
/// `attempts` times with a fixed `backoff`.
pub(crate) async fn join_group(
    group: Ipv4Addr,
    port: u16,
    attempts: u32,
    backoff: Duration,
) -> Result<UdpSocket, LinkLayerError> {
    let failed = |source: io::Error| LinkLayerError::ConnectionFailed {
        address: format!("{group}:{port}"),
        source,
    };
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(failed)?;

    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match std_sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
            Ok(()) => break,
            Err(source) if attempt >= attempts => {
                return Err(LinkLayerError::MulticastJoin {
                    group: group.to_string(),
                    attempts: attempt,
                    source,
                })
            }
            Err(e) => {
                warn!(%group, attempt, error = %e, "multicast join failed, retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
    std_sock.set_multicast_ttl_v4(1).map_err(failed)?;
    std_sock.set_nonblocking(true).map_err(failed)?;
    UdpSocket::from_std(std_sock).map_err(failed)
}

#[async_trait]
impl LinkLayerConnection for UdpMulticastConnection {
    fn connection_id(&self) -> String {
        format!("Wifi:UDP:{}:{}", self.group, self.port)
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
        match self.state {
            ConnectionState::Connected => {
                return Err(LinkLayerError::AlreadyConnected(self.connection_id()))
            }
            ConnectionState::Closed => {
                return Err(LinkLayerError::SocketAlreadyClosed(self.connection_id()))
            }
            ConnectionState::Unconnected => {}
        }
        let socket = join_group(self.group, self.port, self.join_attempts, self.join_backoff).await?;
        info!(group = %self.group, port = self.port, "joined multicast group");
        self.socket = Some(Arc::new(socket));
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkLayerError> {
        if self.state == ConnectionState::Closed {
            return Err(LinkLayerError::SocketAlreadyClosed(self.connection_id()));
        }
        self.guard.close();
        if let Some(socket) = self.socket.take() {
            if let Err(e) = socket.leave_multicast_v4(self.group, Ipv4Addr::UNSPECIFIED) {
                debug!(group = %self.group, error = %e, "leave multicast group");
            }
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn take_streams(&mut self) -> Result<StreamPair, LinkLayerError> {
        if self.state != ConnectionState::Connected {
            return Err(LinkLayerError::StreamUnavailable(self.connection_id()));
        }
        let socket = self
            .socket
            .clone()
            .ok_or_else(|| LinkLayerError::NullSocket(self.connection_id()))?;
        let dest = SocketAddr::V4(SocketAddrV4::new(self.group, self.port));
        Ok((
            Box::new(DatagramReader::new(socket.clone(), self.guard.clone())),
            Box::new(DatagramWriter::new(socket, dest, self.guard.clone())),
        ))
    }
}

/// Reads datagram by datagram. A request longer than what is left of the
/// current datagram fails with `InvalidData` and consumes the rest of it.
pub struct DatagramReader {
    socket: Arc<UdpSocket>,
    guard: StreamGuard,
    current: Vec<u8>,
    pos: usize,
}

impl DatagramReader {
    pub fn new(socket: Arc<UdpSocket>, guard: StreamGuard) -> Self {
        Self {
            socket,
            guard,
            current: Vec::new(),
            pos: 0,
        }
    }

    async fn fill(&mut self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, _from) = self.socket.recv_from(&mut buf).await?;
        self.guard.check()?;
        buf.truncate(n);
        self.current = buf;
        self.pos = 0;
        Ok(())
    }
}

#[async_trait]
impl InboundStream for DatagramReader {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.guard.check()?;
        if self.pos >= self.current.len() {
            self.fill().await?;
        }
        let available = self.current.len() - self.pos;
        if available < buf.len() {
            self.pos = self.current.len();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("datagram has {available} bytes left, {} requested", buf.len()),
            ));
        }
        let end = self.pos + buf.len();
        buf.copy_from_slice(&self.current[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    async fn read_datagram(&mut self) -> io::Result<Vec<u8>> {
        self.guard.check()?;
        if self.pos >= self.current.len() {
            self.fill().await?;
        }
        let out = self.current[self.pos..].to_vec();
        self.pos = self.current.len();
        Ok(out)
    }

    fn discard_remaining(&mut self) {
        self.pos = self.current.len();
    }
}

/// Sends each write as one datagram to a fixed destination.
pub struct DatagramWriter {
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    guard: StreamGuard,
}

impl DatagramWriter {
    pub fn new(socket: Arc<UdpSocket>, dest: SocketAddr, guard: StreamGuard) -> Self {
        Self { socket, dest, guard }
    }
}

#[async_trait]
impl OutboundStream for DatagramWriter {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.guard.check()?;
        let n = self.socket.send_to(buf, self.dest).await?;
        if n != buf.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "datagram truncated"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (Arc<UdpSocket>, Arc<UdpSocket>) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (Arc::new(a), Arc::new(b))
    }

    #[tokio::test]
    async fn reads_stay_within_datagram() {
        let (a, b) = pair().await;
        let guard = StreamGuard::open();
        let mut writer = DatagramWriter::new(a, b.local_addr().unwrap(), guard.clone());
        let mut reader = DatagramReader::new(b, guard);

        writer.write_all(&[1, 2, 3]).await.unwrap();
        writer.write_all(&[4, 5, 6, 7]).await.unwrap();

        let mut two = [0u8; 2];
        reader.read_exact(&mut two).await.unwrap();
        assert_eq!(two, [1, 2]);
        // One byte left in the first datagram; asking for two must not borrow
        // from the second.
        let err = reader.read_exact(&mut two).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut four = [0u8; 4];
        reader.read_exact(&mut four).await.unwrap();
        assert_eq!(four, [4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn read_datagram_returns_whole_unit() {
        let (a, b) = pair().await;
        let guard = StreamGuard::open();
        let mut writer = DatagramWriter::new(a, b.local_addr().unwrap(), guard.clone());
        let mut reader = DatagramReader::new(b, guard);
        writer.write_all(b"{\"x\":1}").await.unwrap();
        assert_eq!(reader.read_datagram().await.unwrap(), b"{\"x\":1}".to_vec());
    }

    #[tokio::test]
    async fn closed_guard_fails_both_halves() {
        let (a, b) = pair().await;
        let guard = StreamGuard::open();
        let mut writer = DatagramWriter::new(a, b.local_addr().unwrap(), guard.clone());
        let mut reader = DatagramReader::new(b, guard.clone());
        guard.close();
        assert_eq!(
            writer.write_all(b"x").await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert_eq!(
            reader.read_datagram().await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[tokio::test]
    async fn streams_need_connect() {
        let mut conn = UdpMulticastConnection::new(
            Ipv4Addr::new(239, 192, 0, 1),
            0,
            1,
            Duration::from_millis(1),
        );
        assert_eq!(conn.priority(), LinkLayerPriority::Middle);
        assert!(matches!(
            conn.take_streams(),
            Err(LinkLayerError::StreamUnavailable(_))
        ));
        conn.disconnect().await.unwrap();
        assert!(matches!(
            conn.disconnect().await,
            Err(LinkLayerError::SocketAlreadyClosed(_))
        ));
    }
}
