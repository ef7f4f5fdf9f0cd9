//! Protocol channel: one application-protocol session over one link-layer
//! connection, with a receive path, a bounded command queue and statistics.
//!
//! The channel lock is the async mutex around the [`Session`]. Inbound unit
//! handling and command execution both take it, so they never interleave on
//! the output stream; framing (`read_unit`) runs outside it.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::events::{EventSink, NetworkEvent};
use crate::link::{
    InboundStream, LinkLayerConnection, LinkLayerError, LinkLayerKind, LinkLayerNeighbour,
    LinkLayerPriority, OutboundStream,
};
use crate::protocol::{ChannelProtocol, ProtocolError, ProtocolKind};
use crate::status::now_millis;
use crate::worker::{stop_requested, Worker, WorkerError};

/// (protocol, connection id). At most one live channel per id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    protocol: ProtocolKind,
    connection: String,
}

impl ChannelId {
    pub fn new(protocol: ProtocolKind, connection: impl Into<String>) -> Self {
        Self {
            protocol,
            connection: connection.into(),
        }
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.protocol, self.connection)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Connecting,
    Connected,
    Disconnecting,
    Terminated,
    /// Connect failed; the channel never reached `Connected`.
    Failed,
}

/// Per-channel counters, reported once with the disconnect event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatistics {
    /// Milliseconds since the epoch; 0 if never connected.
    pub connection_start: u64,
    pub connection_end: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Time spent inside writes.
    pub in_transmission_time_ms: u64,
    pub statuses_sent: u64,
    pub statuses_received: u64,
    pub duplicates_received: u64,
    /// Commands still queued when the channel went down.
    pub commands_dropped: u64,
}

/// State guarded by the channel lock.
pub struct Session {
    channel: ChannelId,
    neighbour: LinkLayerNeighbour,
    writer: Box<dyn OutboundStream>,
    stats: ChannelStatistics,
}

impl Session {
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn neighbour(&self) -> &LinkLayerNeighbour {
        &self.neighbour
    }

    pub fn statistics(&self) -> &ChannelStatistics {
        &self.stats
    }

    pub fn statistics_mut(&mut self) -> &mut ChannelStatistics {
        &mut self.stats
    }

    /// Write `bytes` to the peer, accounting for them in the statistics.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let started = Instant::now();
        self.writer.write_all(bytes).await?;
        self.stats.bytes_sent += bytes.len() as u64;
        self.stats.in_transmission_time_ms += started.elapsed().as_millis() as u64;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {0} is not connected")]
    NotConnected(ChannelId),
    #[error("channel {channel}: {source}")]
    Protocol {
        channel: ChannelId,
        #[source]
        source: ProtocolError,
    },
}

/// Object-safe view of a channel, as held by the coordinator.
#[async_trait]
pub trait Channel: Worker {
    fn channel_id(&self) -> &ChannelId;

    fn neighbour(&self) -> &LinkLayerNeighbour;

    fn state(&self) -> ChannelState;

    /// Neighbours reached by a write on this channel.
    fn recipient_list(&self) -> Vec<LinkLayerNeighbour>;

    fn channel_priority(&self) -> LinkLayerPriority;

    /// Run `command` now, under the channel lock.
    async fn execute(&self, command: Command) -> Result<bool, ChannelError>;

    /// Queue `command` for the worker. False if the queue is full or the
    /// channel is going down.
    fn execute_non_blocking(&self, command: Command) -> bool;
}

struct Pending {
    connection: Box<dyn LinkLayerConnection>,
    commands: mpsc::Receiver<Command>,
}

pub struct ProtocolChannel<P: ChannelProtocol> {
    id: ChannelId,
    protocol: Arc<P>,
    kind: LinkLayerKind,
    neighbour: LinkLayerNeighbour,
    priority: LinkLayerPriority,
    pending: Mutex<Option<Pending>>,
    session: AsyncMutex<Option<Session>>,
    state: Mutex<ChannelState>,
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    events: EventSink,
}

impl<P: ChannelProtocol> ProtocolChannel<P> {
    pub fn new(
        connection: Box<dyn LinkLayerConnection>,
        protocol: Arc<P>,
        command_capacity: usize,
        events: EventSink,
    ) -> Self {
        let id = ChannelId::new(protocol.protocol_kind(), connection.connection_id());
        let (tx, rx) = mpsc::channel(command_capacity.max(1));
        Self {
            id,
            kind: connection.link_layer_kind(),
            neighbour: connection.neighbour().clone(),
            priority: connection.priority(),
            protocol,
            pending: Mutex::new(Some(Pending {
                connection,
                commands: rx,
            })),
            session: AsyncMutex::new(None),
            state: Mutex::new(ChannelState::Created),
            commands: tx,
            shutdown: watch::channel(false).0,
            events,
        }
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    async fn run(&self) -> Result<(), WorkerError> {
        {
            let mut state = self.state.lock();
            if *state != ChannelState::Created {
                return Err(WorkerError::AlreadyStarted(self.id.to_string()));
            }
            *state = ChannelState::Connecting;
        }
        let pending = self.pending.lock().take();
        let Some(Pending {
            mut connection,
            mut commands,
        }) = pending
        else {
            return Err(WorkerError::AlreadyStarted(self.id.to_string()));
        };

        if let Err(e) = connection.connect().await {
            return Err(self.fail(connection, e).await);
        }
        let (reader, writer) = match connection.take_streams() {
            Ok(streams) => streams,
            Err(e) => return Err(self.fail(connection, e).await),
        };

        let stats = ChannelStatistics {
            connection_start: now_millis(),
            ..Default::default()
        };
        *self.session.lock().await = Some(Session {
            channel: self.id.clone(),
            neighbour: self.neighbour.clone(),
            writer,
            stats,
        });
        self.set_state(ChannelState::Connected);
        info!(channel = %self.id, neighbour = %self.neighbour, "channel connected");
        self.events.emit(NetworkEvent::ChannelConnected {
            channel: self.id.clone(),
            neighbour: self.neighbour.clone(),
            priority: self.priority,
        });

        let mut shutdown = self.shutdown.subscribe();
        let error = tokio::select! {
            biased;
            _ = stop_requested(&mut shutdown) => false,
            e = self.receive_loop(reader) => {
                info!(channel = %self.id, reason = %e, "channel input ended");
                true
            }
            _ = self.command_loop(&mut commands) => false,
        };

        self.teardown(connection, commands, error).await;
        Ok(())
    }

    /// Returns the fatal error that ended the receive path.
    async fn receive_loop(&self, mut input: Box<dyn InboundStream>) -> ProtocolError {
        loop {
            let (unit, read) = match self.protocol.read_unit(input.as_mut()).await {
                Ok(unit) => unit,
                Err(e) if e.is_fatal() => return e,
                Err(e) => {
                    warn!(channel = %self.id, error = %e, "dropping malformed unit");
                    input.discard_remaining();
                    continue;
                }
            };
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return ProtocolError::Io(io::ErrorKind::NotConnected.into());
            };
            session.stats.bytes_received += read as u64;
            match self.protocol.on_unit_received(unit, session).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return e,
                Err(e) => warn!(channel = %self.id, error = %e, "inbound unit rejected"),
            }
        }
    }

    async fn command_loop(&self, commands: &mut mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            if let Err(e) = self.execute(command).await {
                debug!(channel = %self.id, error = %e, "queued command failed");
            }
        }
    }

    async fn teardown(
        &self,
        mut connection: Box<dyn LinkLayerConnection>,
        mut commands: mpsc::Receiver<Command>,
        error: bool,
    ) {
        self.set_state(ChannelState::Disconnecting);
        commands.close();
        let mut dropped = 0u64;
        while commands.try_recv().is_ok() {
            dropped += 1;
        }
        drop(commands);

        let session = self.session.lock().await.take();
        let mut statistics = session.map(|s| s.stats).unwrap_or_default();
        statistics.commands_dropped += dropped;
        if let Err(e) = connection.disconnect().await {
            debug!(channel = %self.id, error = %e, "disconnect");
        }
        statistics.connection_end = now_millis();
        self.set_state(ChannelState::Terminated);

        info!(
            channel = %self.id,
            error,
            bytes_sent = statistics.bytes_sent,
            bytes_received = statistics.bytes_received,
            dropped,
            "channel disconnected"
        );
        self.events.emit(NetworkEvent::ChannelDisconnected {
            channel: self.id.clone(),
            neighbour: self.neighbour.clone(),
            error,
            statistics,
        });
    }

    async fn fail(
        &self,
        mut connection: Box<dyn LinkLayerConnection>,
        reason: LinkLayerError,
    ) -> WorkerError {
        if let Err(e) = connection.disconnect().await {
            debug!(channel = %self.id, error = %e, "release after failed connect");
        }
        self.set_state(ChannelState::Failed);
        warn!(channel = %self.id, error = %reason, "channel connect failed");
        self.events.emit(NetworkEvent::ConnectionFailed {
            channel: self.id.clone(),
            neighbour: self.neighbour.clone(),
            reason: reason.to_string(),
        });
        WorkerError::LinkLayer(reason)
    }
}

#[async_trait]
impl<P: ChannelProtocol> Worker for ProtocolChannel<P> {
    fn worker_id(&self) -> String {
        self.id.to_string()
    }

    fn link_layer_kind(&self) -> LinkLayerKind {
        self.kind
    }

    fn protocol_kind(&self) -> ProtocolKind {
        self.id.protocol()
    }

    async fn start_worker(&self) -> Result<(), WorkerError> {
        self.run().await
    }

    fn stop_worker(&self) {
        self.shutdown.send_replace(true);
    }

    fn is_working(&self) -> bool {
        matches!(
            self.state(),
            ChannelState::Connecting | ChannelState::Connected | ChannelState::Disconnecting
        )
    }
}

#[async_trait]
impl<P: ChannelProtocol> Channel for ProtocolChannel<P> {
    fn channel_id(&self) -> &ChannelId {
        &self.id
    }

    fn neighbour(&self) -> &LinkLayerNeighbour {
        &self.neighbour
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn recipient_list(&self) -> Vec<LinkLayerNeighbour> {
        vec![self.neighbour.clone()]
    }

    fn channel_priority(&self) -> LinkLayerPriority {
        self.priority
    }

    async fn execute(&self, command: Command) -> Result<bool, ChannelError> {
        let kind = command.kind();
        let result = {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return Err(ChannelError::NotConnected(self.id.clone()));
            };
            self.protocol.on_command_received(&command, session).await
        };
        self.events.emit(NetworkEvent::CommandExecuted {
            channel: self.id.clone(),
            command: kind,
            success: matches!(result, Ok(true)),
        });
        result.map_err(|source| ChannelError::Protocol {
            channel: self.id.clone(),
            source,
        })
    }

    fn execute_non_blocking(&self, command: Command) -> bool {
        if matches!(
            self.state(),
            ChannelState::Disconnecting | ChannelState::Terminated | ChannelState::Failed
        ) {
            return false;
        }
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                debug!(channel = %self.id, error = %e, "command not queued");
                false
            }
        }
    }
}
