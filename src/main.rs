//! mangahub server binary
//!
//! # Usage
//!
//! ```bash
//! mangahub
//! mangahub --config mangahub.toml --port 42071
//! mangahub --host 0.0.0.0 --data-dir /srv/mangahub
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use mangahub::server::interval_from_hours;
use mangahub::{
    App, AssetCache, MangaDexClient, Preferences, PrefsWatcher, ServerConfig, SqliteStore,
};

/// Self-hosted manga library server
#[derive(Parser, Debug)]
#[command(name = "mangahub")]
#[command(version, about = "Self-hosted manga library server")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "MANGAHUB_CONFIG", default_value = "mangahub.toml")]
    config: PathBuf,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for the library database, image cache and preferences
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => {
            let mut filter = EnvFilter::new("warn");
            for directive in [format!("mangahub={}", level), format!("tower_http={}", level)] {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(e) => eprintln!("Ignoring log directive {}: {}", directive, e),
                }
            }
            filter
        }
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = Some(data_dir);
    }

    init_logging(&config.logging.level);

    let data_dir = config.storage.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    tracing::info!(data_dir = %data_dir.display(), "Starting mangahub");

    let store = Arc::new(SqliteStore::open(&config.storage.database_path())?);
    let source = Arc::new(MangaDexClient::new(&config.source)?);
    let prefs = Arc::new(Preferences::open(&config.storage.preferences_path())?);
    let assets = AssetCache::new(config.storage.cache_dir(), &config.source)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let scheduler_enabled = config.scheduler.enabled;
    let app = App::new(config, store, source, Arc::clone(&prefs), assets);

    // The tag catalog is only needed for browse filters; failure is not fatal
    let services = Arc::clone(&app.services);
    tokio::spawn(async move {
        if let Err(e) = services.sync_tags().await {
            tracing::warn!("Tag sync failed: {}", e);
        }
    });

    if scheduler_enabled {
        app.updater.start();
    }

    let updater = Arc::clone(&app.updater);
    let runtime = tokio::runtime::Handle::current();
    let _watcher = match PrefsWatcher::new(&prefs).start(Arc::clone(&prefs), move |hours| {
        let _guard = runtime.enter();
        updater.reschedule(interval_from_hours(hours));
    }) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Preference hot reload disabled: {}", e);
            None
        }
    };

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    app.serve(listener, shutdown_signal()).await?;

    Ok(())
}
