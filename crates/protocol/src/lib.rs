//! FitSync Protocol
//!
//! Shared types for the realtime chat channel between the FitSync API and
//! mobile clients. Inbound events are JSON over WebSocket; the only outbound
//! frame is the keepalive reply.

pub mod client;
pub mod codec;
pub mod server;
pub mod types;

pub use client::ClientFrame;
pub use codec::{decode_frame, encode_frame, Decoded, KEEPALIVE_ACK, KEEPALIVE_PROBE};
pub use server::{EventEnvelope, EventKind};
pub use types::*;
