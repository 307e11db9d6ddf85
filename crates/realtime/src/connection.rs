//! Pure connection state machine
//!
//! All lifecycle decisions for the realtime socket live here as a pure,
//! synchronous function: `transition(state, input, now) -> (state, effects)`.
//! No IO, no timers, no async. The connection actor executes the effects.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fitsync_protocol::{decode_frame, Decoded, EventEnvelope, CLOSE_POLICY_VIOLATION};
use serde::Serialize;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_MIN_TOKEN_LEN: usize = 10;

// ---------------------------------------------------------------------------
// ConnectionPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Open,
    Reconnecting,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Open => "open",
            ConnectionPhase::Reconnecting => "reconnecting",
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Token for the current session; cleared when the session ends.
    pub auth_token: Option<String>,
    pub retry_delay: Duration,
    pub min_token_len: usize,
    /// Connection attempts made during the current session.
    pub attempt: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn new(retry_delay: Duration, min_token_len: usize) -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            auth_token: None,
            retry_delay,
            min_token_len,
            attempt: 0,
            last_frame_at: None,
        }
    }

    /// Trimmed token, if it is long enough to be worth a handshake.
    fn plausible_token(&self, token: Option<String>) -> Option<String> {
        let token = token?.trim().to_string();
        (!token.is_empty() && token.chars().count() >= self.min_token_len).then_some(token)
    }

    fn end_session(&mut self) {
        self.phase = ConnectionPhase::Idle;
        self.auth_token = None;
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY, DEFAULT_MIN_TOKEN_LEN)
    }
}

// ---------------------------------------------------------------------------
// Input / Effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    SessionStarted { token: Option<String> },
    Opened,
    TransportError { reason: String },
    /// Remote close; `None` when the transport reported no close code.
    RemoteClosed { code: Option<u16> },
    RetryElapsed,
    SessionEnded,
    Frame { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a socket authenticated with `token`.
    Open { token: String },
    /// Close the current socket, if any.
    Close,
    ScheduleRetry { delay: Duration },
    CancelRetry,
    SendPong,
    Deliver(EventEnvelope),
}

// ---------------------------------------------------------------------------
// transition(): the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous connection transition.
///
/// Inputs that do not apply to the current phase are no-ops. That covers
/// stale callbacks from a socket that was already replaced or torn down.
pub fn transition(
    mut state: ConnectionState,
    input: Input,
    now: DateTime<Utc>,
) -> (ConnectionState, Vec<Effect>) {
    let mut effects = Vec::new();

    match (state.phase, input) {
        // -- Session lifecycle ----------------------------------------------
        (ConnectionPhase::Idle, Input::SessionStarted { token }) => {
            // A missing or implausible token is not transient: stay idle and
            // do not schedule a retry.
            if let Some(token) = state.plausible_token(token) {
                state.phase = ConnectionPhase::Connecting;
                state.attempt = 1;
                state.last_frame_at = None;
                state.auth_token = Some(token.clone());
                effects.push(Effect::Open { token });
            }
        }
        (_, Input::SessionStarted { .. }) => {}

        (ConnectionPhase::Idle, Input::SessionEnded) => {
            state.end_session();
        }
        (ConnectionPhase::Reconnecting, Input::SessionEnded) => {
            effects.push(Effect::CancelRetry);
            state.end_session();
        }
        (ConnectionPhase::Connecting | ConnectionPhase::Open, Input::SessionEnded) => {
            // Timer goes first so a retry cannot race the logout.
            effects.push(Effect::CancelRetry);
            effects.push(Effect::Close);
            state.end_session();
        }

        // -- Socket lifecycle -----------------------------------------------
        (ConnectionPhase::Connecting, Input::Opened) => {
            state.phase = ConnectionPhase::Open;
        }

        (
            ConnectionPhase::Connecting | ConnectionPhase::Open,
            Input::TransportError { .. },
        ) => {
            effects.push(Effect::Close);
            effects.push(Effect::ScheduleRetry {
                delay: state.retry_delay,
            });
            state.phase = ConnectionPhase::Reconnecting;
        }

        (
            ConnectionPhase::Connecting | ConnectionPhase::Open,
            Input::RemoteClosed { code },
        ) => {
            if code == Some(CLOSE_POLICY_VIOLATION) {
                // Server rejected the session; terminal until a new start.
                state.end_session();
            } else {
                effects.push(Effect::ScheduleRetry {
                    delay: state.retry_delay,
                });
                state.phase = ConnectionPhase::Reconnecting;
            }
        }

        (ConnectionPhase::Reconnecting, Input::RetryElapsed) => match state.auth_token.clone() {
            Some(token) => {
                state.phase = ConnectionPhase::Connecting;
                state.attempt += 1;
                effects.push(Effect::Open { token });
            }
            None => state.end_session(),
        },

        // -- Inbound frames -------------------------------------------------
        (ConnectionPhase::Open, Input::Frame { text }) => {
            state.last_frame_at = Some(now);
            match decode_frame(&text) {
                Decoded::Keepalive => effects.push(Effect::SendPong),
                Decoded::Event(event) => effects.push(Effect::Deliver(event)),
                Decoded::Dropped => {}
            }
        }

        // Everything else is a stale or out-of-phase callback.
        (_, _) => {}
    }

    (state, effects)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
