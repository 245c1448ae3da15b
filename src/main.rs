//! wallet-transport CLI

use clap::Parser;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use wallet_transport::{
    channel::{ChannelObserver, ChannelState, SessionCallbacks, TungsteniteConnector},
    config::{Args, Command},
    dispatch::{EventDispatcher, EventKind, PushStateStore},
    logging,
    storage::FileStore,
    ConnectionSupervisor, CredentialStore, RequestOptions, RequestPipeline, TieredCache,
    TransportError,
};

struct LogObserver;

impl ChannelObserver for LogObserver {
    fn on_state_change(&self, from: ChannelState, to: ChannelState) {
        info!("Push channel {} -> {}", from, to);
    }

    fn on_terminal_error(&self, error: &TransportError) {
        error!("Push channel stopped: {}", error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_json)?;

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let store = Arc::new(FileStore::open(&args.credentials_file).await?);
    let credentials = Arc::new(CredentialStore::load(store).await);

    match args.command.clone() {
        Command::Get {
            endpoint,
            query,
            cache,
        } => run_get(&args, credentials, &endpoint, &query, cache).await,
        Command::Listen => run_listen(&args, credentials).await,
    }
}

async fn run_get(
    args: &Args,
    credentials: Arc<CredentialStore>,
    endpoint: &str,
    query: &[String],
    cache: bool,
) -> anyhow::Result<()> {
    let cache_store = Arc::new(TieredCache::new(args.cache_config()));
    let pipeline = RequestPipeline::with_reqwest(args.pipeline_config(), credentials, cache_store)?;

    let mut options = RequestOptions::get();
    for pair in query {
        if let Some((key, value)) = pair.split_once('=') {
            options = options.query(key, value);
        }
    }
    if cache {
        options = options.cached(None);
    }

    let payload: Value = pipeline.request(endpoint, options).await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    info!(metrics = ?pipeline.metrics(), "Request complete");
    Ok(())
}

async fn run_listen(args: &Args, credentials: Arc<CredentialStore>) -> anyhow::Result<()> {
    let state = PushStateStore::default();
    let mut dispatcher = EventDispatcher::new();
    state.install(&mut dispatcher);
    for kind in EventKind::application() {
        dispatcher.register(kind, move |event| {
            info!(kind = %event.kind, at = %event.timestamp, payload = %event.payload, "Push event");
            Ok(())
        });
    }
    let unhandled = dispatcher.unhandled_kinds();
    if !unhandled.is_empty() {
        warn!(?unhandled, "Event kinds without handlers");
    }

    let supervisor = ConnectionSupervisor::new(Arc::new(TungsteniteConnector), credentials);
    let callbacks = SessionCallbacks::new(dispatcher).with_observer(Arc::new(LogObserver));
    supervisor.connect(args.channel_config(), callbacks).await?;
    info!("Listening for push events; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    supervisor.disconnect().await;
    Ok(())
}
