//! Commands submitted by upper layers to a channel.

use std::fmt;

use crate::status::{ChatMessage, StatusMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Rumble HELLO block, sent once a channel connects.
    SendHello,
    SendStatus(StatusMessage),
    SendChatMessage(ChatMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SendHello,
    SendStatus,
    SendChatMessage,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SendHello => CommandKind::SendHello,
            Command::SendStatus(_) => CommandKind::SendStatus,
            Command::SendChatMessage(_) => CommandKind::SendChatMessage,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::SendHello => "send-hello",
            CommandKind::SendStatus => "send-status",
            CommandKind::SendChatMessage => "send-chat-message",
        };
        f.write_str(name)
    }
}
