//! Client → Server frames
//!
//! Chat writes (send, mark read) go through the REST API. The socket only
//! ever carries the keepalive reply upstream.

/// Frames a client may send over the realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    /// Reply to a `ping` keepalive probe
    Pong,
}
