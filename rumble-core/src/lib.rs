//! Rumble dissemination engine.
//! Link layers carry protocol channels between neighbours; the coordinator
//! streams stored statuses to each peer in priority order.

pub mod channel;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod firechat;
pub mod identity;
pub mod link;
pub mod multicast;
pub mod protocol;
pub mod queue;
pub mod rumble;
pub mod scanner;
pub mod scoring;
pub mod status;
pub mod store;
pub mod tcp;
pub mod wifi;
pub mod wire;
pub mod worker;

#[cfg(test)]
mod testing;

pub use channel::{Channel, ChannelError, ChannelId, ChannelState, ChannelStatistics, ProtocolChannel};
pub use command::{Command, CommandKind};
pub use config::NetworkConfig;
pub use coordinator::{CoordinatorError, NetworkCoordinator};
pub use events::{EventSink, NetworkEvent};
pub use identity::{NodeId, StatusUid};
pub use link::{LinkLayerConnection, LinkLayerError, LinkLayerKind, LinkLayerNeighbour, LinkLayerPriority};
pub use protocol::{ProtocolError, ProtocolKind, PROTOCOL_VERSION};
pub use queue::MessageQueue;
pub use status::{ChatMessage, StatusMessage};
pub use store::{ChatStore, MemoryStore, StatusStore, StoreError};
pub use wifi::{LinkLayerAdapter, WifiLinkLayer};
pub use wire::{decode_frame, encode_frame, DiscoveryMessage, FrameDecodeError, FrameEncodeError};
pub use worker::{Worker, WorkerError, WorkerPool};
