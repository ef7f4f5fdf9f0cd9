//! Typed lifecycle events. Components get an [`EventSink`] at construction and
//! emit into it; the coordinator routes each event and republishes it to subscribers.

use tokio::sync::mpsc;
use tracing::trace;

use crate::channel::{ChannelId, ChannelStatistics};
use crate::command::CommandKind;
use crate::link::{LinkLayerKind, LinkLayerNeighbour, LinkLayerPriority};
use crate::status::ChatMessage;

#[derive(Debug, Clone)]
pub enum NetworkEvent {
    LinkLayerStarted(LinkLayerKind),
    LinkLayerStopped(LinkLayerKind),
    ScannerStarted(LinkLayerKind),
    ScannerStopped(LinkLayerKind),
    NeighbourReachable(LinkLayerNeighbour),
    NeighbourUnreachable(LinkLayerNeighbour),
    ConnectionFailed {
        channel: ChannelId,
        neighbour: LinkLayerNeighbour,
        reason: String,
    },
    ChannelConnected {
        channel: ChannelId,
        neighbour: LinkLayerNeighbour,
        priority: LinkLayerPriority,
    },
    ChannelDisconnected {
        channel: ChannelId,
        neighbour: LinkLayerNeighbour,
        error: bool,
        statistics: ChannelStatistics,
    },
    CommandExecuted {
        channel: ChannelId,
        command: CommandKind,
        success: bool,
    },
    /// A status was durably inserted (not a duplicate).
    StatusInserted { row_id: u64 },
    ChatMessageReceived(ChatMessage),
}

/// Cloneable producer side of the coordinator's event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<NetworkEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NetworkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: NetworkEvent) {
        if self.tx.send(event).is_err() {
            trace!("event dropped: coordinator is gone");
        }
    }
}
