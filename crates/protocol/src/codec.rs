//! Frame codec
//!
//! Turns raw text frames into typed events. Keepalive probes are matched
//! before any JSON parsing. Anything that does not decode into a known
//! event is dropped without an error: the server may introduce new event
//! types before clients learn about them.

use tracing::trace;

use crate::client::ClientFrame;
use crate::server::EventEnvelope;

/// Literal keepalive probe sent by the server
pub const KEEPALIVE_PROBE: &str = "ping";

/// Literal reply to [`KEEPALIVE_PROBE`]
pub const KEEPALIVE_ACK: &str = "pong";

/// Result of decoding one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The frame was a keepalive probe; reply with [`KEEPALIVE_ACK`].
    Keepalive,
    Event(EventEnvelope),
    /// Not JSON, unknown `type`, or missing fields.
    Dropped,
}

pub fn decode_frame(raw: &str) -> Decoded {
    if raw == KEEPALIVE_PROBE {
        return Decoded::Keepalive;
    }

    match serde_json::from_str::<EventEnvelope>(raw) {
        Ok(mut event) => {
            attach_conversation(&mut event);
            Decoded::Event(event)
        }
        Err(e) => {
            trace!(
                component = "codec",
                event = "codec.frame.dropped",
                error = %e,
                payload_bytes = raw.len(),
                "Dropped undecodable frame"
            );
            Decoded::Dropped
        }
    }
}

pub fn encode_frame(frame: &ClientFrame) -> &'static str {
    match frame {
        ClientFrame::Pong => KEEPALIVE_ACK,
    }
}

// The envelope's conversation is authoritative for the embedded record.
fn attach_conversation(event: &mut EventEnvelope) {
    match event {
        EventEnvelope::NewMessage {
            conversation_id,
            message,
            ..
        }
        | EventEnvelope::MessageEdited {
            conversation_id,
            message,
            ..
        } => message.conversation_id = *conversation_id,
        _ => {}
    }
}
