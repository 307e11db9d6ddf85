//! Server → Client events

use serde::{Deserialize, Serialize};

use crate::types::*;

/// One realtime event pushed by the server.
///
/// The `type` tag selects the variant; unknown tags and variants missing a
/// required field fail to deserialize and are dropped by the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    NewMessage {
        conversation_id: ConversationId,
        message: MessageRecord,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    MessageEdited {
        conversation_id: ConversationId,
        message: MessageRecord,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    MessageRead {
        conversation_id: ConversationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

/// Discriminant of an [`EventEnvelope`], for logging and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewMessage,
    MessageEdited,
    MessageDeleted,
    MessageRead,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewMessage => "new_message",
            EventKind::MessageEdited => "message_edited",
            EventKind::MessageDeleted => "message_deleted",
            EventKind::MessageRead => "message_read",
            EventKind::Error => "error",
        }
    }
}

impl EventEnvelope {
    pub fn kind(&self) -> EventKind {
        match self {
            EventEnvelope::NewMessage { .. } => EventKind::NewMessage,
            EventEnvelope::MessageEdited { .. } => EventKind::MessageEdited,
            EventEnvelope::MessageDeleted { .. } => EventKind::MessageDeleted,
            EventEnvelope::MessageRead { .. } => EventKind::MessageRead,
            EventEnvelope::Error { .. } => EventKind::Error,
        }
    }

    /// Conversation the event targets. Only `Error` may lack one.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            EventEnvelope::NewMessage {
                conversation_id, ..
            }
            | EventEnvelope::MessageEdited {
                conversation_id, ..
            }
            | EventEnvelope::MessageDeleted {
                conversation_id, ..
            }
            | EventEnvelope::MessageRead {
                conversation_id, ..
            } => Some(*conversation_id),
            EventEnvelope::Error {
                conversation_id, ..
            } => *conversation_id,
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        match self {
            EventEnvelope::NewMessage { timestamp, .. }
            | EventEnvelope::MessageEdited { timestamp, .. }
            | EventEnvelope::MessageDeleted { timestamp, .. }
            | EventEnvelope::MessageRead { timestamp, .. }
            | EventEnvelope::Error { timestamp, .. } => timestamp.as_deref(),
        }
    }
}
