//! Network coordinator: owns link layers, workers, channels and the message
//! queue, and routes lifecycle events between them.
//!
//! Components report into one [`EventSink`]. A single pump task applies each
//! event (dial a neighbour, attach a dispatcher to a new Rumble channel, drop
//! a finished one, admit a received status) and then republishes it to
//! [`NetworkCoordinator::subscribe`]rs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, ChannelId, ChannelState, ProtocolChannel};
use crate::command::Command;
use crate::config::NetworkConfig;
use crate::events::{EventSink, NetworkEvent};
use crate::firechat::FirechatProtocol;
use crate::identity::NodeId;
use crate::link::{LinkLayerConnection, LinkLayerError, LinkLayerKind, LinkLayerNeighbour};
use crate::multicast::UdpMulticastConnection;
use crate::protocol::{ChannelProtocol, ProtocolKind};
use crate::queue::{MessageQueue, PeerQueue};
use crate::rumble::RumbleProtocol;
use crate::status::{now_millis, ChatMessage, StatusMessage};
use crate::store::{ChatStore, InsertOutcome, ScoringRecord, StatusStore, StoreError};
use crate::tcp::{ConnectionHandler, TcpConnection};
use crate::wifi::{LinkLayerAdapter, WifiLinkLayer};
use crate::worker::WorkerPool;

const SUBSCRIBER_BACKLOG: usize = 256;
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("channel {0} already exists")]
    DuplicateChannel(ChannelId),
    #[error("no channel {0}")]
    UnknownChannel(ChannelId),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    LinkLayer(#[from] LinkLayerError),
}

struct Inner {
    config: NetworkConfig,
    node_id: NodeId,
    statuses: Arc<dyn StatusStore>,
    chats: Arc<dyn ChatStore>,
    queue: Arc<MessageQueue>,
    workers: Arc<WorkerPool>,
    channels: Mutex<HashMap<ChannelId, Arc<dyn Channel>>>,
    dispatchers: Mutex<HashMap<ChannelId, JoinHandle<()>>>,
    link_layers: Mutex<Vec<Arc<dyn LinkLayerAdapter>>>,
    events: EventSink,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<NetworkEvent>>>,
    subscribers: broadcast::Sender<NetworkEvent>,
    rumble: Arc<RumbleProtocol>,
    firechat: Arc<FirechatProtocol>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Entry point of the engine. Construct one per node and `start` it once.
pub struct NetworkCoordinator {
    inner: Arc<Inner>,
}

impl NetworkCoordinator {
    pub fn new(
        config: NetworkConfig,
        statuses: Arc<dyn StatusStore>,
        chats: Arc<dyn ChatStore>,
    ) -> Self {
        Self::with_node_id(config, NodeId::generate(), statuses, chats)
    }

    pub fn with_node_id(
        config: NetworkConfig,
        node_id: NodeId,
        statuses: Arc<dyn StatusStore>,
        chats: Arc<dyn ChatStore>,
    ) -> Self {
        let (events, incoming) = EventSink::channel();
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_BACKLOG);
        let rumble = Arc::new(RumbleProtocol::new(statuses.clone(), events.clone()));
        let firechat = Arc::new(FirechatProtocol::new(chats.clone(), events.clone()));
        Self {
            inner: Arc::new(Inner {
                config,
                node_id,
                statuses,
                chats,
                queue: Arc::new(MessageQueue::new()),
                workers: Arc::new(WorkerPool::new()),
                channels: Mutex::new(HashMap::new()),
                dispatchers: Mutex::new(HashMap::new()),
                link_layers: Mutex::new(Vec::new()),
                events,
                incoming: Mutex::new(Some(incoming)),
                subscribers,
                rumble,
                firechat,
                pump: Mutex::new(None),
            }),
        }
    }

    /// Index stored statuses, start routing events and bring up the link
    /// layers. A second call does nothing.
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        let inner = &self.inner;
        if inner.pump.lock().is_some() {
            return Ok(());
        }
        let indexed = inner.queue.rebuild(inner.statuses.as_ref())?;
        let incoming = inner.incoming.lock().take();
        let Some(incoming) = incoming else {
            return Ok(());
        };
        *inner.pump.lock() = Some(tokio::spawn(pump(Arc::downgrade(inner), incoming)));
        info!(node = %inner.node_id, indexed, "network coordinator started");

        if inner.config.enable_wifi {
            let wifi = WifiLinkLayer::new(
                inner.config.clone(),
                inner.node_id,
                inner.workers.clone(),
                self.connection_handler(),
                inner.events.clone(),
            );
            inner.link_layers.lock().push(Arc::new(wifi));
        }
        let layers: Vec<_> = inner.link_layers.lock().clone();
        for layer in layers {
            layer.start().await?;
        }
        Ok(())
    }

    /// Stop link layers and every worker, then close all peer queues. Events
    /// raised during teardown still reach subscribers.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let layers: Vec<_> = inner.link_layers.lock().clone();
        for layer in layers {
            layer.stop();
        }
        inner.workers.stop_all();
        let drained = tokio::time::timeout(STOP_GRACE, async {
            while !inner.workers.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(remaining = inner.workers.len(), "workers still running after stop");
        }
        inner.queue.close_all();
        for (_, dispatcher) in inner.dispatchers.lock().drain() {
            dispatcher.abort();
        }
        info!(node = %inner.node_id, "network coordinator stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.subscribers.subscribe()
    }

    /// Sink for embedders that drive their own transports.
    pub fn events(&self) -> EventSink {
        self.inner.events.clone()
    }

    /// Register an extra link layer; started with the others by `start`.
    pub fn add_link_layer(&self, layer: Arc<dyn LinkLayerAdapter>) {
        self.inner.link_layers.lock().push(layer);
    }

    /// Handler for TCP servers: every accepted connection becomes a Rumble channel.
    pub fn connection_handler(&self) -> ConnectionHandler {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |conn: TcpConnection| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Err(e) = inner.open_channel(Box::new(conn), ProtocolKind::Rumble) {
                warn!(error = %e, "accepted connection rejected");
            }
        })
    }

    /// Run `protocol` over `connection` on the worker pool.
    pub fn open_channel(
        &self,
        connection: Box<dyn LinkLayerConnection>,
        protocol: ProtocolKind,
    ) -> Result<ChannelId, CoordinatorError> {
        self.inner.open_channel(connection, protocol)
    }

    /// Store a locally authored status, queue it for every peer and announce
    /// it to subscribers.
    pub fn post_status(&self, status: &StatusMessage) -> Result<InsertOutcome, CoordinatorError> {
        let outcome = self.inner.statuses.insert_status(status)?;
        if !outcome.duplicate {
            self.inner
                .queue
                .admit(ScoringRecord::from_status(outcome.row_id, status));
            debug!(uid = %status.uid, row = outcome.row_id, "status posted");
            self.inner.events.emit(NetworkEvent::StatusInserted {
                row_id: outcome.row_id,
            });
        }
        Ok(outcome)
    }

    /// Store a chat line for the configured room and queue it on every
    /// Firechat channel. Returns how many channels accepted it.
    pub fn send_chat_message(&self, author: &str, text: &str) -> Result<usize, CoordinatorError> {
        let message = ChatMessage::new(self.inner.config.firechat_room.clone(), author, text);
        self.inner.chats.insert_chat(&message)?;
        let accepted = self
            .channels()
            .into_iter()
            .filter(|c| c.channel_id().protocol() == ProtocolKind::Firechat)
            .filter(|c| c.execute_non_blocking(Command::SendChatMessage(message.clone())))
            .count();
        Ok(accepted)
    }

    pub async fn execute(&self, channel: &ChannelId, command: Command) -> Result<bool, CoordinatorError> {
        let found = self.inner.channels.lock().get(channel).cloned();
        let found = found.ok_or_else(|| CoordinatorError::UnknownChannel(channel.clone()))?;
        Ok(found.execute(command).await?)
    }

    pub fn channels(&self) -> Vec<Arc<dyn Channel>> {
        self.inner.channels.lock().values().cloned().collect()
    }

    /// Connected channel to `node` over the highest-priority link layer.
    pub fn best_channel_to(&self, node: NodeId) -> Option<Arc<dyn Channel>> {
        self.inner.best_channel_to(node)
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    pub fn message_queue(&self) -> &Arc<MessageQueue> {
        &self.inner.queue
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }
}

impl Drop for NetworkCoordinator {
    fn drop(&mut self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        for (_, dispatcher) in self.inner.dispatchers.lock().drain() {
            dispatcher.abort();
        }
    }
}

/// Of two nodes that see each other, only the lower id dials.
fn dials(local: NodeId, remote: NodeId) -> bool {
    local < remote
}

impl Inner {
    fn open_channel(
        &self,
        connection: Box<dyn LinkLayerConnection>,
        protocol: ProtocolKind,
    ) -> Result<ChannelId, CoordinatorError> {
        let capacity = self.config.command_queue_capacity;
        match protocol {
            ProtocolKind::Rumble => self.register(ProtocolChannel::new(
                connection,
                self.rumble.clone(),
                capacity,
                self.events.clone(),
            )),
            ProtocolKind::Firechat => self.register(ProtocolChannel::new(
                connection,
                self.firechat.clone(),
                capacity,
                self.events.clone(),
            )),
        }
    }

    fn register<P: ChannelProtocol>(&self, channel: ProtocolChannel<P>) -> Result<ChannelId, CoordinatorError> {
        let channel = Arc::new(channel);
        let id = channel.channel_id().clone();
        {
            let mut channels = self.channels.lock();
            if channels.contains_key(&id) {
                return Err(CoordinatorError::DuplicateChannel(id));
            }
            channels.insert(id.clone(), channel.clone());
        }
        if !self.workers.add_worker(channel) {
            self.channels.lock().remove(&id);
            return Err(CoordinatorError::DuplicateChannel(id));
        }
        debug!(channel = %id, "channel opened");
        Ok(id)
    }

    fn best_channel_to(&self, node: NodeId) -> Option<Arc<dyn Channel>> {
        self.channels
            .lock()
            .values()
            .filter(|c| c.neighbour().node() == Some(node))
            .filter(|c| c.state() == ChannelState::Connected)
            .max_by_key(|c| c.channel_priority())
            .cloned()
    }

    fn has_channel_to(&self, node: NodeId) -> bool {
        self.channels
            .lock()
            .values()
            .any(|c| c.neighbour().node() == Some(node))
    }

    fn route(&self, event: &NetworkEvent) {
        match event {
            NetworkEvent::NeighbourReachable(neighbour) if neighbour.kind() == LinkLayerKind::Wifi => {
                self.dial(neighbour);
            }
            NetworkEvent::LinkLayerStarted(LinkLayerKind::Wifi) if self.config.enable_firechat => {
                let conn = UdpMulticastConnection::new(
                    self.config.firechat_group,
                    self.config.firechat_port,
                    self.config.multicast_join_attempts,
                    self.config.multicast_join_backoff(),
                );
                if let Err(e) = self.open_channel(Box::new(conn), ProtocolKind::Firechat) {
                    warn!(error = %e, "firechat channel not opened");
                }
            }
            NetworkEvent::ChannelConnected { channel, .. } if channel.protocol() == ProtocolKind::Rumble => {
                self.attach_dispatcher(channel);
            }
            NetworkEvent::ChannelDisconnected { channel, .. } | NetworkEvent::ConnectionFailed { channel, .. } => {
                self.forget(channel);
            }
            NetworkEvent::StatusInserted { row_id } => self.admit_stored(*row_id),
            _ => {}
        }
    }

    fn dial(&self, neighbour: &LinkLayerNeighbour) {
        let Some(node) = neighbour.node() else {
            return;
        };
        if !dials(self.node_id, node) {
            debug!(peer = %node, "peer dials this pair");
            return;
        }
        if self.has_channel_to(node) {
            return;
        }
        let target: SocketAddr = match neighbour.address().parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(address = %neighbour.address(), error = %e, "neighbour address not dialable");
                return;
            }
        };
        let conn = TcpConnection::outbound(neighbour.clone(), target, self.config.connect_timeout());
        match self.open_channel(Box::new(conn), ProtocolKind::Rumble) {
            Ok(id) => info!(channel = %id, peer = %node, "dialling neighbour"),
            Err(e) => debug!(peer = %node, error = %e, "not dialling"),
        }
    }

    fn attach_dispatcher(&self, id: &ChannelId) {
        let channel = self.channels.lock().get(id).cloned();
        let Some(channel) = channel else {
            return;
        };
        let peer = self
            .queue
            .open_peer_queue(id.to_string(), self.config.dispatch_queue_capacity);
        let dispatcher = tokio::spawn(dispatch(
            channel.clone(),
            peer,
            self.statuses.clone(),
            self.queue.clone(),
        ));
        if let Some(old) = self.dispatchers.lock().insert(id.clone(), dispatcher) {
            old.abort();
        }
        if !channel.execute_non_blocking(Command::SendHello) {
            debug!(channel = %id, "hello not queued");
        }
    }

    fn forget(&self, id: &ChannelId) {
        self.queue.close_peer_queue(&id.to_string());
        if let Some(dispatcher) = self.dispatchers.lock().remove(id) {
            dispatcher.abort();
        }
        self.channels.lock().remove(id);
    }

    fn admit_stored(&self, row_id: u64) {
        match self.statuses.batch_status(&[row_id]) {
            Ok(found) => {
                for (id, status) in found {
                    if !status.is_expired(now_millis()) {
                        self.queue.admit(ScoringRecord::from_status(id, &status));
                    }
                }
            }
            Err(e) => warn!(row = row_id, error = %e, "inserted status not readable"),
        }
    }
}

async fn pump(inner: Weak<Inner>, mut incoming: mpsc::UnboundedReceiver<NetworkEvent>) {
    while let Some(event) = incoming.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.route(&event);
        // No subscribers is fine.
        let _ = inner.subscribers.send(event);
    }
}

/// Feed one Rumble channel from its peer queue until the queue closes or the
/// channel stops accepting commands.
async fn dispatch(
    channel: Arc<dyn Channel>,
    peer: Arc<PeerQueue>,
    store: Arc<dyn StatusStore>,
    queue: Arc<MessageQueue>,
) {
    let hosts: Vec<String> = channel.recipient_list().iter().map(|n| n.host()).collect();
    while let Some(record) = peer.take().await {
        let status = match store.batch_status(&[record.id]) {
            Ok(mut found) => match found.pop() {
                Some((_, status)) => status,
                None => continue,
            },
            Err(e) => {
                warn!(id = record.id, error = %e, "status lookup failed");
                continue;
            }
        };
        if status.is_expired(now_millis()) {
            continue;
        }
        // Never hand a status back to a node it came from.
        if status.forwarders.iter().any(|f| hosts.contains(f)) {
            debug!(channel = %channel.channel_id(), uid = %status.uid, "peer already has status");
            continue;
        }
        match channel.execute(Command::SendStatus(status)).await {
            Ok(true) => {
                if let Err(e) = store.increment_replication(record.id) {
                    warn!(id = record.id, error = %e, "replication not recorded");
                }
                queue.increment_replication(record.id);
            }
            Ok(false) => {}
            Err(e) => {
                debug!(channel = %channel.channel_id(), error = %e, "dispatcher stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tcp::TcpServerWorker;
    use crate::testing::{memory_pair, wait_until};
    use crate::worker::Worker;

    fn offline() -> NetworkConfig {
        NetworkConfig {
            enable_wifi: false,
            enable_firechat: false,
            ..NetworkConfig::default()
        }
    }

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; 16])
    }

    fn coordinator(id: NodeId) -> (NetworkCoordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let c = NetworkCoordinator::with_node_id(offline(), id, store.clone(), store.clone());
        (c, store)
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<NetworkEvent>,
        pred: impl Fn(&NetworkEvent) -> bool,
    ) -> NetworkEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(ev) if pred(&ev) => return ev,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[test]
    fn lower_node_id_dials() {
        assert!(dials(node(1), node(2)));
        assert!(!dials(node(2), node(1)));
        assert!(!dials(node(3), node(3)));
    }

    #[tokio::test]
    async fn status_reaches_peer_over_tcp() {
        let (a, _a_store) = coordinator(node(0x01));
        let (b, b_store) = coordinator(node(0xEE));
        a.start().await.unwrap();
        b.start().await.unwrap();
        let mut b_events = b.subscribe();

        let server = Arc::new(
            TcpServerWorker::bind("127.0.0.1:0".parse().unwrap(), b.connection_handler())
                .await
                .unwrap(),
        );
        let addr = server.local_addr();
        let running = server.clone();
        tokio::spawn(async move { running.start_worker().await });

        // Posted before any peer exists; picked up when the channel opens.
        let status = StatusMessage::new("alice", "road closed #flood").with_ttl(12);
        assert!(!a.post_status(&status).unwrap().duplicate);

        a.events().emit(NetworkEvent::NeighbourReachable(
            LinkLayerNeighbour::new(LinkLayerKind::Wifi, addr.to_string()).with_node(b.node_id()),
        ));

        let row = match next_matching(&mut b_events, |e| matches!(e, NetworkEvent::StatusInserted { .. })).await {
            NetworkEvent::StatusInserted { row_id } => row_id,
            _ => unreachable!(),
        };
        let received = b_store.status(row).unwrap();
        assert_eq!(received.uid, status.uid);
        assert_eq!(received.hop_count, 1);
        assert_eq!(b.message_queue().len(), 1);

        let best = a.best_channel_to(b.node_id()).unwrap();
        assert_eq!(best.channel_id().protocol(), ProtocolKind::Rumble);
        assert_eq!(best.channel_id().connection(), format!("Wifi:TCP:{addr}"));

        a.stop().await;
        server.stop_worker();
        b.stop().await;
        wait_until(|| a.channels().is_empty()).await;
        assert!(a.best_channel_to(b.node_id()).is_none());
    }

    #[tokio::test]
    async fn higher_node_id_waits_to_be_dialled() {
        let (b, _) = coordinator(node(0xEE));
        b.start().await.unwrap();
        let mut events = b.subscribe();
        b.events().emit(NetworkEvent::NeighbourReachable(
            LinkLayerNeighbour::new(LinkLayerKind::Wifi, "127.0.0.1:9").with_node(node(0x01)),
        ));
        next_matching(&mut events, |e| matches!(e, NetworkEvent::NeighbourReachable(_))).await;
        assert!(b.channels().is_empty());
    }

    #[tokio::test]
    async fn duplicate_channel_is_refused() {
        let (c, _) = coordinator(node(7));
        let (first, _far1) = memory_pair("10.1.1.1:1");
        let (second, _far2) = memory_pair("10.1.1.1:1");
        let id = c.open_channel(Box::new(first), ProtocolKind::Rumble).unwrap();
        assert!(matches!(
            c.open_channel(Box::new(second), ProtocolKind::Rumble),
            Err(CoordinatorError::DuplicateChannel(dup)) if dup == id
        ));
        assert_eq!(c.channels().len(), 1);
    }

    #[tokio::test]
    async fn connected_rumble_channel_sends_hello_then_status() {
        use crate::rumble::block::{BlockHeader, HEADER_LENGTH, SUBTYPE_HELLO, SUBTYPE_STATUS};
        use tokio::io::AsyncReadExt;

        let (c, store) = coordinator(node(7));
        c.start().await.unwrap();
        let (conn, mut far) = memory_pair("10.1.1.2:1");
        c.open_channel(Box::new(conn), ProtocolKind::Rumble).unwrap();

        let mut head = [0u8; HEADER_LENGTH];
        far.read_exact(&mut head).await.unwrap();
        let hello = BlockHeader::decode(&head).unwrap();
        assert_eq!(hello.subtype, SUBTYPE_HELLO);
        assert_eq!(hello.length, 0);

        let posted = c.post_status(&StatusMessage::new("dan", "bridge open")).unwrap();
        far.read_exact(&mut head).await.unwrap();
        let status = BlockHeader::decode(&head).unwrap();
        assert_eq!(status.subtype, SUBTYPE_STATUS);
        let mut payload = vec![0u8; status.length as usize];
        far.read_exact(&mut payload).await.unwrap();

        // A successful send counts as one more replica.
        wait_until(|| store.status(posted.row_id).map_or(false, |s| s.replication == 1)).await;
        c.stop().await;
    }

    #[tokio::test]
    async fn status_is_not_sent_back_to_its_forwarder() {
        use crate::rumble::block::{read_block, Block};
        use crate::link::{GuardedReader, StreamGuard};

        let (c, store) = coordinator(node(7));
        c.start().await.unwrap();
        // The peer handed this one over on an earlier connection.
        let mut echoed = StatusMessage::new("gus", "from the peer").with_ttl(6);
        echoed.add_forwarder("10.1.1.3");
        let echoed_row = c.post_status(&echoed).unwrap().row_id;
        let fresh = StatusMessage::new("hal", "local news").with_ttl(6);
        let fresh_row = c.post_status(&fresh).unwrap().row_id;

        // Reconnected from a new ephemeral port.
        let (conn, far) = memory_pair("10.1.1.3:40211");
        c.open_channel(Box::new(conn), ProtocolKind::Rumble).unwrap();
        let mut input = GuardedReader::new(far, StreamGuard::open());
        assert_eq!(read_block(&mut input).await.unwrap().0, Block::Hello);
        match read_block(&mut input).await.unwrap().0 {
            Block::Status(sent) => assert_eq!(sent.uid, fresh.uid),
            other => panic!("unexpected {other:?}"),
        }

        wait_until(|| store.status(fresh_row).map_or(false, |s| s.replication == 1)).await;
        c.stop().await;
        assert_eq!(store.status(echoed_row).unwrap().replication, 0);
    }

    #[tokio::test]
    async fn local_post_is_announced_once() {
        let (c, _) = coordinator(node(7));
        c.start().await.unwrap();
        let mut events = c.subscribe();
        let status = StatusMessage::new("ida", "water at the school");
        let posted = c.post_status(&status).unwrap();
        assert!(c.post_status(&status).unwrap().duplicate);
        match next_matching(&mut events, |e| matches!(e, NetworkEvent::StatusInserted { .. })).await {
            NetworkEvent::StatusInserted { row_id } => assert_eq!(row_id, posted.row_id),
            _ => unreachable!(),
        }
        assert_eq!(c.message_queue().len(), 1);
    }

    #[tokio::test]
    async fn execute_on_unknown_channel_fails() {
        let (c, _) = coordinator(node(7));
        let id = ChannelId::new(ProtocolKind::Rumble, "Wifi:TCP:10.0.0.1:1");
        assert!(matches!(
            c.execute(&id, Command::SendHello).await,
            Err(CoordinatorError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn chat_is_stored_without_firechat_channel() {
        let (c, store) = coordinator(node(7));
        assert_eq!(c.send_chat_message("eve", "anyone near the station?").unwrap(), 0);
        let stored = store.chat_messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].room, "#Nearby");
    }
}
