//! Rumble: binary status dissemination over unicast channels.

pub mod block;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::channel::Session;
use crate::command::Command;
use crate::events::{EventSink, NetworkEvent};
use crate::link::InboundStream;
use crate::protocol::{ChannelProtocol, ProtocolError, ProtocolKind};
use crate::store::StatusStore;

pub use block::{Block, BlockHeader};

pub struct RumbleProtocol {
    store: Arc<dyn StatusStore>,
    events: EventSink,
}

impl RumbleProtocol {
    pub fn new(store: Arc<dyn StatusStore>, events: EventSink) -> Self {
        Self {
            store,
            events,
        }
    }
}

#[async_trait]
impl ChannelProtocol for RumbleProtocol {
    type Unit = Block;

    fn protocol_kind(&self) -> ProtocolKind {
        ProtocolKind::Rumble
    }

    async fn read_unit(
        &self,
        input: &mut (dyn InboundStream + '_),
    ) -> Result<(Block, usize), ProtocolError> {
        block::read_block(input).await
    }

    async fn on_unit_received(&self, unit: Block, session: &mut Session) -> Result<(), ProtocolError> {
        match unit {
            Block::Hello => {
                debug!(channel = %session.channel(), "hello received");
                Ok(())
            }
            Block::Status(mut status) => {
                status.hop_count = status.hop_count.saturating_add(1);
                status.add_forwarder(&session.neighbour().host());
                session.statistics_mut().statuses_received += 1;

                let outcome = self
                    .store
                    .insert_status(&status)
                    .map_err(|e| ProtocolError::Storage(e.to_string()))?;
                if outcome.duplicate {
                    session.statistics_mut().duplicates_received += 1;
                    debug!(channel = %session.channel(), uid = %status.uid, "duplicate status");
                } else {
                    debug!(channel = %session.channel(), uid = %status.uid, row = outcome.row_id, "status stored");
                    self.events.emit(NetworkEvent::StatusInserted {
                        row_id: outcome.row_id,
                    });
                }
                Ok(())
            }
        }
    }

    async fn on_command_received(
        &self,
        command: &Command,
        session: &mut Session,
    ) -> Result<bool, ProtocolError> {
        match command {
            Command::SendHello => {
                session.send(&block::encode_hello()).await?;
                Ok(true)
            }
            Command::SendStatus(status) => {
                let bytes = block::encode_status(status)?;
                session.send(&bytes).await?;
                session.statistics_mut().statuses_sent += 1;
                debug!(channel = %session.channel(), uid = %status.uid, "status sent");
                Ok(true)
            }
            Command::SendChatMessage(_) => Ok(false),
        }
    }
}
