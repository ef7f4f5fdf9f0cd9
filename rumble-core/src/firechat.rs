//! Firechat: JSON chat lines over UDP multicast, one object per datagram.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::channel::Session;
use crate::command::Command;
use crate::events::{EventSink, NetworkEvent};
use crate::link::InboundStream;
use crate::protocol::{ChannelProtocol, ProtocolError, ProtocolKind};
use crate::status::ChatMessage;
use crate::store::ChatStore;

pub struct FirechatProtocol {
    store: Arc<dyn ChatStore>,
    events: EventSink,
}

impl FirechatProtocol {
    pub fn new(store: Arc<dyn ChatStore>, events: EventSink) -> Self {
        Self { store, events }
    }
}

pub fn encode_chat(message: &ChatMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(|e| ProtocolError::MalformedPacket(e.to_string()))
}

pub fn decode_chat(bytes: &[u8]) -> Result<ChatMessage, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedPacket(e.to_string()))
}

#[async_trait]
impl ChannelProtocol for FirechatProtocol {
    type Unit = ChatMessage;

    fn protocol_kind(&self) -> ProtocolKind {
        ProtocolKind::Firechat
    }

    async fn read_unit(
        &self,
        input: &mut (dyn InboundStream + '_),
    ) -> Result<(ChatMessage, usize), ProtocolError> {
        let datagram = input.read_datagram().await?;
        let message = decode_chat(&datagram)?;
        Ok((message, datagram.len()))
    }

    async fn on_unit_received(
        &self,
        unit: ChatMessage,
        session: &mut Session,
    ) -> Result<(), ProtocolError> {
        let duplicate = self
            .store
            .insert_chat(&unit)
            .map_err(|e| ProtocolError::Storage(e.to_string()))?;
        if duplicate {
            session.statistics_mut().duplicates_received += 1;
            return Ok(());
        }
        debug!(channel = %session.channel(), room = %unit.room, author = %unit.author, "chat received");
        self.events.emit(NetworkEvent::ChatMessageReceived(unit));
        Ok(())
    }

    async fn on_command_received(
        &self,
        command: &Command,
        session: &mut Session,
    ) -> Result<bool, ProtocolError> {
        match command {
            Command::SendChatMessage(message) => {
                session.send(&encode_chat(message)?).await?;
                Ok(true)
            }
            Command::SendHello | Command::SendStatus(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names() {
        let msg = ChatMessage {
            id: "u-1".into(),
            room: "#Nearby".into(),
            author: "eve".into(),
            message: "hey".into(),
            timestamp: 42,
        };
        let value: serde_json::Value = serde_json::from_slice(&encode_chat(&msg).unwrap()).unwrap();
        assert_eq!(value["firechat"], "#Nearby");
        assert_eq!(value["name"], "eve");
        assert_eq!(value["msg"], "hey");
        assert_eq!(value["uuid"], "u-1");
        assert_eq!(value["t"], 42);
    }

    #[test]
    fn foreign_json_decodes() {
        let raw = br##"{"firechat":"#Nearby","name":"x","msg":"yo","uuid":"abc","t":7}"##;
        let msg = decode_chat(raw).unwrap();
        assert_eq!(msg.id, "abc");
        assert_eq!(msg.message, "yo");
    }

    #[test]
    fn garbage_is_malformed_not_fatal() {
        let err = decode_chat(b"not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPacket(_)));
        assert!(!err.is_fatal());
    }
}
