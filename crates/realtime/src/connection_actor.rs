//! Connection actor: owns one realtime socket and drives it through the
//! pure transition in `connection.rs`.
//!
//! Each actor runs as an independent tokio task. Callers talk to it through
//! `ConnectionHandle`, which sends `ConnectionCommand`s over an mpsc
//! channel. Lock-free reads of the current phase go through `ArcSwap`.

use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use fitsync_protocol::{encode_frame, ClientFrame, EventEnvelope};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::connection::{transition, ConnectionPhase, ConnectionState, Effect, Input};
use crate::endpoint::{realtime_url, redacted_url};
use crate::error::{ConfigError, RealtimeError, TransportError};
use crate::transport::{Socket, Transport, TransportEvent};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const COMMAND_CAPACITY: usize = 32;

/// Everything the actor needs to reach the server.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub api_base_url: String,
    pub realtime_path: String,
    pub retry_delay: Duration,
    pub min_token_len: usize,
}

impl ConnectionSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        redacted_url(&self.api_base_url, &self.realtime_path).map(|_| ())
    }
}

/// Lock-free view of the connection for diagnostics and tests.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub phase: ConnectionPhase,
    pub attempt: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

impl ConnectionSnapshot {
    fn of(state: &ConnectionState) -> Self {
        Self {
            phase: state.phase,
            attempt: state.attempt,
            last_frame_at: state.last_frame_at,
        }
    }
}

#[derive(Debug)]
pub enum ConnectionCommand {
    Start { token: Option<String> },
    Stop,
}

/// Handle to a running connection actor (cheap to Clone).
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: u64,
    command_tx: mpsc::Sender<ConnectionCommand>,
    snapshot: Arc<ArcSwap<ConnectionSnapshot>>,
    phase_rx: watch::Receiver<ConnectionPhase>,
}

impl ConnectionHandle {
    /// Spawn an idle connection actor. Parsed events are pushed onto
    /// `event_tx` in receipt order.
    pub fn spawn<T: Transport>(
        settings: ConnectionSettings,
        transport: T,
        event_tx: mpsc::Sender<EventEnvelope>,
    ) -> Result<ConnectionHandle, ConfigError> {
        settings.validate()?;

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let state = ConnectionState::new(settings.retry_delay, settings.min_token_len);
        let snapshot = Arc::new(ArcSwap::from_pointee(ConnectionSnapshot::of(&state)));
        let (phase_tx, phase_rx) = watch::channel(state.phase);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let actor = ConnectionActor {
            id,
            settings,
            transport,
            state,
            command_rx,
            event_tx,
            snapshot: snapshot.clone(),
            phase_tx,
            pending_open: None,
            socket: None,
            retry: None,
        };
        tokio::spawn(actor.run());

        Ok(ConnectionHandle {
            id,
            command_tx,
            snapshot,
            phase_rx,
        })
    }

    /// Begin a session. A no-op unless the connection is idle.
    pub async fn start(&self, token: Option<String>) -> Result<(), RealtimeError> {
        self.send(ConnectionCommand::Start { token }).await
    }

    /// End the session: cancel any retry, close the socket, go idle.
    pub async fn stop(&self) -> Result<(), RealtimeError> {
        self.send(ConnectionCommand::Stop).await
    }

    async fn send(&self, cmd: ConnectionCommand) -> Result<(), RealtimeError> {
        self.command_tx.send(cmd).await.map_err(|_| {
            warn!(
                component = "connection_actor",
                connection_id = self.id,
                "Actor channel closed, command dropped"
            );
            RealtimeError::ActorGone
        })
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<ConnectionSnapshot> {
        self.snapshot.load_full()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase_rx.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn phase_watch(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase_rx.clone()
    }
}

/// What woke the actor loop.
enum Wake {
    Command(Option<ConnectionCommand>),
    Opened(Result<Socket, TransportError>),
    Socket(Option<TransportEvent>),
    RetryElapsed,
}

struct ConnectionActor<T> {
    id: u64,
    settings: ConnectionSettings,
    transport: T,
    state: ConnectionState,
    command_rx: mpsc::Receiver<ConnectionCommand>,
    event_tx: mpsc::Sender<EventEnvelope>,
    snapshot: Arc<ArcSwap<ConnectionSnapshot>>,
    phase_tx: watch::Sender<ConnectionPhase>,
    /// Handshake in flight. There is no timeout: an attempt that never
    /// completes stays Connecting until the transport errors.
    pending_open: Option<BoxFuture<'static, Result<Socket, TransportError>>>,
    socket: Option<Socket>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl<T: Transport> ConnectionActor<T> {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                cmd = self.command_rx.recv() => Wake::Command(cmd),
                result = wait_open(&mut self.pending_open) => Wake::Opened(result),
                event = recv_socket(&mut self.socket) => Wake::Socket(event),
                () = wait_retry(&mut self.retry) => Wake::RetryElapsed,
            };

            let input = match wake {
                Wake::Command(Some(ConnectionCommand::Start { token })) => {
                    Input::SessionStarted { token }
                }
                Wake::Command(Some(ConnectionCommand::Stop)) => Input::SessionEnded,
                Wake::Command(None) => {
                    // Every handle is gone; tear down and exit.
                    self.feed(Input::SessionEnded).await;
                    break;
                }
                Wake::Opened(Ok(socket)) => {
                    self.pending_open = None;
                    self.socket = Some(socket);
                    Input::Opened
                }
                Wake::Opened(Err(e)) => {
                    self.pending_open = None;
                    Input::TransportError {
                        reason: e.to_string(),
                    }
                }
                Wake::Socket(Some(TransportEvent::Text(text))) => Input::Frame { text },
                Wake::Socket(Some(TransportEvent::Closed { code })) => {
                    self.socket = None;
                    Input::RemoteClosed { code }
                }
                Wake::Socket(Some(TransportEvent::Error(reason))) => {
                    Input::TransportError { reason }
                }
                Wake::Socket(None) => {
                    self.socket = None;
                    Input::RemoteClosed { code: None }
                }
                Wake::RetryElapsed => {
                    self.retry = None;
                    Input::RetryElapsed
                }
            };

            self.feed(input).await;
        }

        info!(
            component = "connection_actor",
            event = "realtime.connection.actor_stopped",
            connection_id = self.id,
            "Connection actor stopped"
        );
    }

    async fn feed(&mut self, input: Input) {
        let before = self.state.phase;
        log_input(self.id, &input);

        let state = std::mem::take(&mut self.state);
        let (state, effects) = transition(state, input, Utc::now());
        self.state = state;

        for effect in effects {
            self.execute(effect).await;
        }

        if self.state.phase != before {
            info!(
                component = "connection_actor",
                event = "realtime.connection.phase_changed",
                connection_id = self.id,
                from = before.as_str(),
                to = self.state.phase.as_str(),
                attempt = self.state.attempt,
                "Connection phase changed"
            );
        }
        self.snapshot
            .store(Arc::new(ConnectionSnapshot::of(&self.state)));
        self.phase_tx.send_if_modified(|phase| {
            let changed = *phase != self.state.phase;
            *phase = self.state.phase;
            changed
        });
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Open { token } => {
                self.socket = None;
                match realtime_url(
                    &self.settings.api_base_url,
                    &self.settings.realtime_path,
                    &token,
                ) {
                    Ok(url) => {
                        let redacted =
                            redacted_url(&self.settings.api_base_url, &self.settings.realtime_path)
                                .unwrap_or_default();
                        info!(
                            component = "connection_actor",
                            event = "realtime.connection.connecting",
                            connection_id = self.id,
                            attempt = self.state.attempt,
                            url = %redacted,
                            "Opening realtime socket"
                        );
                        self.pending_open = Some(self.transport.connect(url));
                    }
                    Err(e) => {
                        error!(
                            component = "connection_actor",
                            event = "realtime.connection.bad_url",
                            connection_id = self.id,
                            error = %e,
                            "Cannot build realtime URL"
                        );
                        let failed: BoxFuture<'static, Result<Socket, TransportError>> =
                            Box::pin(async move { Err(TransportError::Connect(e.to_string())) });
                        self.pending_open = Some(failed);
                    }
                }
            }
            Effect::Close => {
                self.pending_open = None;
                if self.socket.take().is_some() {
                    debug!(
                        component = "connection_actor",
                        event = "realtime.connection.closed_locally",
                        connection_id = self.id,
                        "Closed realtime socket"
                    );
                }
            }
            Effect::ScheduleRetry { delay } => {
                info!(
                    component = "connection_actor",
                    event = "realtime.connection.retry_scheduled",
                    connection_id = self.id,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelRetry => {
                self.retry = None;
            }
            Effect::SendPong => {
                if let Some(socket) = &self.socket {
                    if let Err(e) = socket.send_text(encode_frame(&ClientFrame::Pong)).await {
                        // The reader reports the failure as a close.
                        debug!(
                            component = "connection_actor",
                            event = "realtime.keepalive.reply_failed",
                            connection_id = self.id,
                            error = %e,
                            "Keepalive reply failed"
                        );
                    }
                }
            }
            Effect::Deliver(event) => {
                if self.event_tx.send(event).await.is_err() {
                    warn!(
                        component = "connection_actor",
                        event = "realtime.deliver.channel_closed",
                        connection_id = self.id,
                        "Synchronizer channel closed, event dropped"
                    );
                }
            }
        }
    }
}

fn log_input(connection_id: u64, input: &Input) {
    match input {
        Input::TransportError { reason } => warn!(
            component = "connection_actor",
            event = "realtime.connection.transport_error",
            connection_id,
            reason = %reason,
            "Realtime transport error"
        ),
        Input::RemoteClosed { code } => info!(
            component = "connection_actor",
            event = "realtime.connection.remote_closed",
            connection_id,
            code = ?code,
            "Realtime socket closed by server"
        ),
        Input::Opened => info!(
            component = "connection_actor",
            event = "realtime.connection.opened",
            connection_id,
            "Realtime socket opened"
        ),
        Input::SessionStarted { token } if token.is_none() => warn!(
            component = "connection_actor",
            event = "realtime.session.no_token",
            connection_id,
            "No auth token, staying idle"
        ),
        _ => {}
    }
}

async fn wait_open(
    pending_open: &mut Option<BoxFuture<'static, Result<Socket, TransportError>>>,
) -> Result<Socket, TransportError> {
    match pending_open {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

async fn recv_socket(socket: &mut Option<Socket>) -> Option<TransportEvent> {
    match socket {
        Some(socket) => socket.recv().await,
        None => pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
