//! Wiring for one realtime core: connection actor → channel → synchronizer,
//! fronted by a session binder.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::binder::SessionBinder;
use crate::cache::QueryCacheAdapter;
use crate::config::RealtimeConfig;
use crate::connection_actor::ConnectionHandle;
use crate::error::ConfigError;
use crate::query_store::QueryStore;
use crate::synchronizer::{spawn_synchronizer, CacheSynchronizer};
use crate::token_store::TokenStore;
use crate::transport::Transport;

pub struct RealtimeRuntime {
    pub binder: SessionBinder,
    pub store: Arc<QueryStore>,
    synchronizer: JoinHandle<()>,
}

impl RealtimeRuntime {
    /// Spawn the connection actor and synchronizer over `store`. The
    /// connection stays idle until the binder sees a session.
    pub fn spawn<T: Transport>(
        config: &RealtimeConfig,
        transport: T,
        tokens: Arc<dyn TokenStore>,
        store: Arc<QueryStore>,
    ) -> Result<Self, ConfigError> {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity.max(1));
        let connection = ConnectionHandle::spawn(config.connection_settings(), transport, event_tx)?;
        let synchronizer = spawn_synchronizer(
            CacheSynchronizer::new(QueryCacheAdapter::new(store.clone())),
            event_rx,
        );

        Ok(Self {
            binder: SessionBinder::new(connection, tokens),
            store,
            synchronizer,
        })
    }

    /// Unbind and wait for the synchronizer to drain.
    pub async fn shutdown(self) {
        let RealtimeRuntime {
            mut binder,
            synchronizer,
            ..
        } = self;
        binder.unbind().await;
        // Dropping the last handle stops the actor, which closes the event
        // channel and lets the synchronizer finish.
        drop(binder);
        let _ = synchronizer.await;
    }
}
