use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::info;

use flowbeat_scheduler::{FlowInvoker, FlowRegistry, HandlerRegistry, HeartbeatSweep, RunLedger};

mod app;
mod handlers;
mod http;
mod ticker;

/// Command-line overrides for the TOML / env configuration.
#[derive(Parser, Debug)]
#[command(
    name = "flowbeat-gateway",
    about = "Periodic data-flow runner with an HTTP control surface"
)]
struct Args {
    /// Path to flowbeat.toml (defaults to ~/.flowbeat/flowbeat.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "flowbeat_gateway=info,flowbeat_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let args = Args::parse();

    // load config: --config flag > FLOWBEAT_CONFIG env > ~/.flowbeat/flowbeat.toml
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("FLOWBEAT_CONFIG").ok());
    let mut config = flowbeat_core::FlowbeatConfig::load(config_path.as_deref()).unwrap_or_else(
        |e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            flowbeat_core::FlowbeatConfig::default()
        },
    );
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    // One connection shared by registry and ledger, so run bookkeeping and
    // flow bookkeeping always observe each other.
    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    flowbeat_scheduler::db::init_db(&conn)?;
    info!("database migrations complete");
    let db = Arc::new(Mutex::new(conn));

    let registry = Arc::new(FlowRegistry::new(Arc::clone(&db)));
    let ledger = Arc::new(RunLedger::new(db));

    // Built-in handlers. Deployments that need custom flows embed
    // flowbeat-scheduler directly and register their own.
    let mut handler_registry = HandlerRegistry::new();
    handler_registry.register(Arc::new(handlers::WebhookFlow::new()));
    info!(handlers = ?handler_registry.names(), "flow handlers registered");

    let mut invoker = FlowInvoker::new(handler_registry);
    if let Some(secs) = config.scheduler.invocation_timeout_secs {
        invoker = invoker.with_timeout(std::time::Duration::from_secs(secs));
    }

    let sweep = Arc::new(HeartbeatSweep::new(
        Arc::clone(&registry),
        Arc::clone(&ledger),
        Arc::new(invoker),
    ));

    // Heal schedule chains before serving: flows due right now get their
    // pending run seeded, the first tick or heartbeat will execute them.
    let seeded = sweep.ensure_scheduled(chrono::Utc::now())?;
    if seeded > 0 {
        info!(seeded, "seeded pending runs at startup");
    }

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let tick_interval_secs = config.scheduler.tick_interval_secs;

    let state = Arc::new(app::AppState::new(config, registry, ledger, Arc::clone(&sweep)));
    let router = app::build_router(state);

    // spawn the sweep ticker in the background (0 disables it: heartbeats
    // must then come from an external caller)
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if tick_interval_secs > 0 {
        tokio::spawn(ticker::run(sweep, tick_interval_secs, shutdown_rx));
    } else {
        info!("sweep ticker disabled, relying on external heartbeats");
    }

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("flowbeat gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    // signal the ticker to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
