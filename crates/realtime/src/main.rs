//! FitSync Realtime CLI
//!
//! Runs the chat sync core headless against an in-process cache, for
//! checking a realtime deployment from a terminal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fitsync_realtime::endpoint::redacted_url;
use fitsync_realtime::logging::init_logging;
use fitsync_realtime::paths;
use fitsync_realtime::{
    FileTokenStore, QueryStore, RealtimeConfig, RealtimeRuntime, StaticTokenStore, TokenStore,
    TungsteniteTransport, UserSession, VERSION,
};

#[derive(Parser)]
#[command(name = "fitsync-realtime", version = VERSION, about = "FitSync realtime chat sync")]
struct Cli {
    /// Data directory (default: $FITSYNC_DATA_DIR or ~/.fitsync)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// REST API base URL; the socket scheme follows it
    #[arg(long, global = true, env = "FITSYNC_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and keep the cache in sync until Ctrl-C
    Run {
        /// Bearer token (default: read from <data-dir>/token)
        #[arg(long, env = "FITSYNC_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Read the token from this file instead
        #[arg(long, conflicts_with = "token")]
        token_file: Option<PathBuf>,

        /// User the session belongs to (for logs)
        #[arg(long, default_value_t = 0)]
        user_id: i64,

        /// Override the fixed reconnect delay
        #[arg(long)]
        retry_delay_ms: Option<u64>,
    },
    /// Print the realtime URL derived from the API URL (token redacted)
    Url,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = paths::resolve_data_dir(cli.data_dir.as_deref());

    let mut config = RealtimeConfig::load(&paths::config_path(&data_dir))?;
    if let Some(api_url) = cli.api_url {
        config.api_base_url = api_url;
    }

    match cli.command {
        Command::Url => {
            println!("{}", redacted_url(&config.api_base_url, &config.realtime_path)?);
            Ok(())
        }
        Command::Run {
            token,
            token_file,
            user_id,
            retry_delay_ms,
        } => {
            if let Some(ms) = retry_delay_ms {
                config.retry_delay_ms = ms;
            }
            let tokens: Arc<dyn TokenStore> = match (token, token_file) {
                (Some(token), _) => Arc::new(StaticTokenStore::new(Some(token))),
                (None, Some(path)) => Arc::new(FileTokenStore::new(path)),
                (None, None) => Arc::new(FileTokenStore::new(paths::token_path(&data_dir))),
            };
            run(&data_dir, config, tokens, user_id).await
        }
    }
}

async fn run(
    data_dir: &std::path::Path,
    config: RealtimeConfig,
    tokens: Arc<dyn TokenStore>,
    user_id: i64,
) -> anyhow::Result<()> {
    let logging = init_logging(data_dir)?;
    info!(
        component = "main",
        event = "realtime.cli.starting",
        run_id = %logging.run_id,
        version = VERSION,
        api_base_url = %config.api_base_url,
        "Starting FitSync realtime"
    );

    if tokens.token().is_none() {
        warn!(
            component = "main",
            event = "realtime.cli.no_token",
            "No auth token available; the connection will stay idle"
        );
        eprintln!("No auth token found. Pass --token or write one to the token file.");
    }

    let store = Arc::new(QueryStore::new());
    let mut changes = store.subscribe();
    let mut runtime = RealtimeRuntime::spawn(&config, TungsteniteTransport, tokens, store)?;
    runtime.binder.bind(Some(&UserSession { user_id })).await;

    let mut phase_rx = runtime.binder.connection().phase_watch();
    println!("Connecting... (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                phase_rx.borrow_and_update();
                let snapshot = runtime.binder.connection().snapshot();
                println!("connection: {}", serde_json::to_string(&*snapshot)?);
            }
            change = changes.recv() => match change {
                Ok(change) => {
                    for key in runtime.store.take_stale() {
                        println!("stale: {key:?}");
                    }
                    if !change.stale {
                        println!("updated: {:?} (rev {})", change.key, change.revision);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        component = "main",
                        event = "realtime.cli.changes_lagged",
                        skipped,
                        "Change observer lagged"
                    );
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    runtime.shutdown().await;
    info!(
        component = "main",
        event = "realtime.cli.stopped",
        "FitSync realtime stopped"
    );
    Ok(())
}
