//! Session binder
//!
//! The only piece the app touches. It follows the auth state: a signed-in
//! user starts the connection, sign-out or unmount stops it. Binding the
//! same state again is a no-op, so it is safe to call on every render.

use std::sync::Arc;

use fitsync_protocol::UserId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection_actor::ConnectionHandle;
use crate::token_store::TokenStore;

/// Identity of the signed-in user, as published by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: UserId,
}

pub struct SessionBinder {
    connection: ConnectionHandle,
    tokens: Arc<dyn TokenStore>,
    bound: Option<UserId>,
}

impl SessionBinder {
    pub fn new(connection: ConnectionHandle, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            connection,
            tokens,
            bound: None,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Bring the connection in line with `session`.
    pub async fn bind(&mut self, session: Option<&UserSession>) {
        match (session, self.bound) {
            (Some(session), None) => self.start(session.user_id).await,
            (Some(session), Some(bound)) if session.user_id != bound => {
                // Account switch without an explicit sign-out in between.
                self.stop().await;
                self.start(session.user_id).await;
            }
            (None, Some(_)) => self.stop().await,
            _ => {}
        }
    }

    /// Tear down, as on unmount.
    pub async fn unbind(&mut self) {
        self.bind(None).await;
    }

    async fn start(&mut self, user_id: UserId) {
        // Without a token the session stays unbound, so the next bind for
        // the same user tries again once the token has been stored.
        let Some(token) = self.tokens.token() else {
            debug!(
                component = "binder",
                event = "realtime.session.no_token",
                user_id,
                connection_id = self.connection.id,
                "No auth token yet, not binding"
            );
            return;
        };
        info!(
            component = "binder",
            event = "realtime.session.bound",
            user_id,
            connection_id = self.connection.id,
            "Binding realtime session"
        );
        // A failed send means the actor is gone; the app keeps working off
        // REST, so there is nothing to surface.
        if self.connection.start(Some(token)).await.is_ok() {
            self.bound = Some(user_id);
        }
    }

    async fn stop(&mut self) {
        if let Some(user_id) = self.bound.take() {
            info!(
                component = "binder",
                event = "realtime.session.unbound",
                user_id,
                connection_id = self.connection.id,
                "Unbinding realtime session"
            );
            let _ = self.connection.stop().await;
        }
    }
}

/// Follow an auth signal until its sender is dropped, then unbind.
pub fn watch_session(
    mut binder: SessionBinder,
    mut session_rx: watch::Receiver<Option<UserSession>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let session = session_rx.borrow_and_update().clone();
            binder.bind(session.as_ref()).await;
            if session_rx.changed().await.is_err() {
                break;
            }
        }
        debug!(
            component = "binder",
            event = "realtime.session.signal_closed",
            "Auth signal closed"
        );
        binder.unbind().await;
    })
}
