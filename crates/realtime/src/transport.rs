//! Socket transport
//!
//! A connected socket is a pair of channels: inbound transport events and
//! outbound text frames. The connection actor only sees this shape, so
//! tests can script a server without a network.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::TransportError;

const INBOUND_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 16;

/// Something that happened on an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// Remote close; `code` is `None` when the stream ended without a close
    /// frame.
    Closed { code: Option<u16> },
    Error(String),
}

/// An open socket. Dropping it closes the connection.
pub struct Socket {
    inbound: mpsc::Receiver<TransportEvent>,
    outbound: mpsc::Sender<String>,
    reader: Option<JoinHandle<()>>,
}

impl Socket {
    pub fn new(inbound: mpsc::Receiver<TransportEvent>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            inbound,
            outbound,
            reader: None,
        }
    }

    fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Next inbound event. `None` means the transport went away without
    /// reporting why.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.outbound
            .send(text.to_string())
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // The writer sends a close frame once `outbound` is dropped.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

pub trait Transport: Send + Sync + 'static {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Socket, TransportError>>;
}

/// Production transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Socket, TransportError>> {
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let (mut ws_tx, mut ws_rx) = ws.split();

            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
            let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

            tokio::spawn(async move {
                while let Some(text) = outbound_rx.recv().await {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_tx.close().await;
            });

            let reader = tokio::spawn(async move {
                let terminal = loop {
                    match ws_rx.next().await {
                        Some(Ok(Message::Text(text))) => {
                            let event = TransportEvent::Text(text.as_str().to_owned());
                            if inbound_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break TransportEvent::Closed {
                                code: frame.map(|f| u16::from(f.code)),
                            };
                        }
                        // Protocol-level ping/pong is answered by tungstenite.
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break TransportEvent::Error(e.to_string()),
                        None => break TransportEvent::Closed { code: None },
                    }
                };
                debug!(
                    component = "transport",
                    event = "transport.reader.finished",
                    terminal = ?terminal,
                    "Socket reader finished"
                );
                let _ = inbound_tx.send(terminal).await;
            });

            Ok(Socket::new(inbound_rx, outbound_tx).with_reader(reader))
        })
    }
}
