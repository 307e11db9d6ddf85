//! FitSync Realtime
//!
//! Keeps the app's cached conversations and messages in step with the chat
//! server over a single WebSocket. The session binder is the entry point;
//! everything it sets in motion lands in the shared query cache.

pub mod binder;
pub mod cache;
pub mod config;
pub mod connection;
pub mod connection_actor;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod paths;
pub mod query_store;
pub mod runtime;
pub mod synchronizer;
pub mod token_store;
pub mod transport;

pub use binder::{watch_session, SessionBinder, UserSession};
pub use cache::{CachePort, QueryCacheAdapter};
pub use config::RealtimeConfig;
pub use connection::ConnectionPhase;
pub use connection_actor::{ConnectionHandle, ConnectionSettings, ConnectionSnapshot};
pub use error::{ConfigError, RealtimeError, TransportError};
pub use query_store::{FetchTicket, PageSet, QueryKey, QueryStore};
pub use runtime::RealtimeRuntime;
pub use synchronizer::{Applied, CacheSynchronizer};
pub use token_store::{FileTokenStore, StaticTokenStore, TokenStore};
pub use transport::{Transport, TungsteniteTransport};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
