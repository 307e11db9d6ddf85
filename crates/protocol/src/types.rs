//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Server-assigned conversation identifier
pub type ConversationId = i64;

/// Server-assigned message identifier, unique within a conversation
pub type MessageId = i64;

/// User identifier (coach or client)
pub type UserId = i64;

/// A chat message as carried by realtime events and REST pages.
///
/// Field aliases accept the REST serializer's names so the same record type
/// can be stored from either path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(alias = "id")]
    pub message_id: MessageId,
    /// Filled from the enclosing envelope when absent on the wire.
    #[serde(default, alias = "conversation")]
    pub conversation_id: ConversationId,
    #[serde(alias = "sender")]
    pub sender_id: UserId,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(alias = "created_at")]
    pub sent_at: String,
    #[serde(default, alias = "updated_at", skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    /// Derived client-side; never required on the wire.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_by: Vec<UserId>,
}

/// Summary of a conversation for list views
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
}

impl ConversationSummary {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            ..Default::default()
        }
    }
}

/// WebSocket close code the API uses to reject a session outright.
pub const CLOSE_POLICY_VIOLATION: u16 = 1002;
