//! LAN neighbour discovery: UDP multicast beacon, parse beacons/responses,
//! maintain the neighbour list.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::events::{EventSink, NetworkEvent};
use crate::identity::NodeId;
use crate::link::{LinkLayerError, LinkLayerKind, LinkLayerNeighbour};
use crate::multicast::join_group;
use crate::protocol::PROTOCOL_VERSION;
use crate::wire::{decode_frame, encode_frame, DiscoveryMessage};

#[async_trait]
pub trait Scanner: Send + Sync {
    fn link_layer_kind(&self) -> LinkLayerKind;

    async fn start_scanning(&self) -> Result<(), LinkLayerError>;

    fn stop_scanning(&self);

    fn is_scanning(&self) -> bool;

    /// Neighbours currently considered reachable.
    fn neighbours(&self) -> Vec<LinkLayerNeighbour>;
}

struct PeerEntry {
    neighbour: LinkLayerNeighbour,
    last_seen: Instant,
}

/// Peer table plus the beacon we answer with. Shared by the scanner's loops.
struct ScanState {
    node_id: NodeId,
    listen_port: u16,
    peers: Mutex<HashMap<NodeId, PeerEntry>>,
    events: EventSink,
}

impl ScanState {
    fn frame(&self, response: bool) -> Option<Vec<u8>> {
        let msg = if response {
            DiscoveryMessage::BeaconResponse {
                protocol_version: PROTOCOL_VERSION,
                node_id: self.node_id,
                listen_port: self.listen_port,
            }
        } else {
            DiscoveryMessage::Beacon {
                protocol_version: PROTOCOL_VERSION,
                node_id: self.node_id,
                listen_port: self.listen_port,
            }
        };
        match encode_frame(&msg) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "encode discovery frame");
                None
            }
        }
    }

    /// Handle one datagram. Returns the frame to send back to `from`, if any.
    fn on_datagram(&self, data: &[u8], from: SocketAddr, now: Instant) -> Option<Vec<u8>> {
        let msg = match decode_frame(data) {
            Ok((msg, _)) => msg,
            Err(e) => {
                debug!(%from, error = %e, "ignoring discovery datagram");
                return None;
            }
        };
        if msg.protocol_version() != PROTOCOL_VERSION || msg.node_id() == self.node_id {
            return None;
        }
        let node = msg.node_id();
        let neighbour = LinkLayerNeighbour::new(
            LinkLayerKind::Wifi,
            SocketAddr::new(from.ip(), msg.listen_port()).to_string(),
        )
        .with_node(node);

        let announce = {
            let mut peers = self.peers.lock();
            let changed = peers
                .get(&node)
                .map_or(true, |p| p.neighbour.address() != neighbour.address());
            peers.insert(
                node,
                PeerEntry {
                    neighbour: neighbour.clone(),
                    last_seen: now,
                },
            );
            changed
        };
        if announce {
            info!(peer = %node, address = %neighbour.address(), "neighbour reachable");
            self.events.emit(NetworkEvent::NeighbourReachable(neighbour));
        }

        match msg {
            DiscoveryMessage::Beacon { .. } => self.frame(true),
            DiscoveryMessage::BeaconResponse { .. } => None,
        }
    }

    /// Drop peers not heard from within `timeout` and announce them gone.
    fn expire(&self, now: Instant, timeout: Duration) {
        let gone: Vec<LinkLayerNeighbour> = {
            let mut peers = self.peers.lock();
            let stale: Vec<NodeId> = peers
                .iter()
                .filter(|(_, p)| now.duration_since(p.last_seen) >= timeout)
                .map(|(id, _)| *id)
                .collect();
            stale
                .iter()
                .filter_map(|id| peers.remove(id))
                .map(|p| p.neighbour)
                .collect()
        };
        for neighbour in gone {
            info!(address = %neighbour.address(), "neighbour unreachable");
            self.events.emit(NetworkEvent::NeighbourUnreachable(neighbour));
        }
    }

    fn clear(&self) {
        let gone: Vec<_> = self.peers.lock().drain().map(|(_, p)| p.neighbour).collect();
        for neighbour in gone {
            self.events.emit(NetworkEvent::NeighbourUnreachable(neighbour));
        }
    }
}

/// Announces this node on the discovery group and tracks who else does.
pub struct BeaconScanner {
    state: Arc<ScanState>,
    group: Ipv4Addr,
    port: u16,
    beacon_interval: Duration,
    neighbour_timeout: Duration,
    join_attempts: u32,
    join_backoff: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BeaconScanner {
    pub fn new(config: &NetworkConfig, node_id: NodeId, listen_port: u16, events: EventSink) -> Self {
        Self {
            state: Arc::new(ScanState {
                node_id,
                listen_port,
                peers: Mutex::new(HashMap::new()),
                events,
            }),
            group: config.discovery_group,
            port: config.discovery_port,
            beacon_interval: config.beacon_interval(),
            neighbour_timeout: config.neighbour_timeout(),
            join_attempts: config.multicast_join_attempts,
            join_backoff: config.multicast_join_backoff(),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Scanner for BeaconScanner {
    fn link_layer_kind(&self) -> LinkLayerKind {
        LinkLayerKind::Wifi
    }

    async fn start_scanning(&self) -> Result<(), LinkLayerError> {
        if self.is_scanning() {
            return Ok(());
        }
        let socket = Arc::new(
            join_group(self.group, self.port, self.join_attempts, self.join_backoff).await?,
        );
        let dest = SocketAddr::new(self.group.into(), self.port);

        let beacon_task = tokio::spawn(beacon_loop(
            socket.clone(),
            self.state.clone(),
            dest,
            self.beacon_interval,
        ));
        let recv_task = tokio::spawn(recv_loop(socket, self.state.clone()));
        let timeout_task = tokio::spawn(peer_timeout_loop(
            self.state.clone(),
            self.beacon_interval,
            self.neighbour_timeout,
        ));
        self.tasks
            .lock()
            .extend([beacon_task, recv_task, timeout_task]);

        info!(group = %self.group, port = self.port, "beacon scanner started");
        self.state
            .events
            .emit(NetworkEvent::ScannerStarted(LinkLayerKind::Wifi));
        Ok(())
    }

    fn stop_scanning(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        self.state.clear();
        info!("beacon scanner stopped");
        self.state
            .events
            .emit(NetworkEvent::ScannerStopped(LinkLayerKind::Wifi));
    }

    fn is_scanning(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    fn neighbours(&self) -> Vec<LinkLayerNeighbour> {
        self.state
            .peers
            .lock()
            .values()
            .map(|p| p.neighbour.clone())
            .collect()
    }
}

async fn beacon_loop(socket: Arc<UdpSocket>, state: Arc<ScanState>, dest: SocketAddr, interval: Duration) {
    let Some(frame) = state.frame(false) else {
        return;
    };
    let spread = (interval.as_millis() as u64 / 10).max(1);
    loop {
        if let Err(e) = socket.send_to(&frame, dest).await {
            debug!(error = %e, "beacon send failed");
        }
        // Jitter so nodes started together do not beacon in lockstep.
        let jitter = rand::thread_rng().gen_range(0..=spread);
        tokio::time::sleep(interval + Duration::from_millis(jitter)).await;
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, state: Arc<ScanState>) {
    let mut buf = vec![0u8; 65536];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                if let Some(reply) = state.on_datagram(&buf[..n], from, Instant::now()) {
                    if let Err(e) = socket.send_to(&reply, from).await {
                        debug!(%from, error = %e, "beacon response failed");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "discovery socket failed");
                return;
            }
        }
    }
}

async fn peer_timeout_loop(state: Arc<ScanState>, every: Duration, timeout: Duration) {
    loop {
        tokio::time::sleep(every).await;
        state.expire(Instant::now(), timeout);
    }
}
