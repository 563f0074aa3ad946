use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use txguard::application::dispatcher::Dispatcher;
use txguard::application::handle::TransactionHandle;
use txguard::application::inspector::LockInspector;
use txguard::application::lock_registry::LockRegistry;
use txguard::application::rate_limit::RateLimiter;
use txguard::config::GuardConfig;
use txguard::domain::event::Event;
use txguard::domain::ports::{StateStoreRef, WalletRef};
use txguard::infrastructure::in_memory::InMemoryStore;
use txguard::infrastructure::ledger::InMemoryWallet;
use txguard::interfaces::csv::balance_writer::BalanceWriter;
use txguard::interfaces::csv::event_reader::EventReader;
use txguard::interfaces::http::{AdminState, router};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file. Built-in defaults when omitted.
    #[arg(long, env = "TXGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, records are kept
    /// in RocksDB. The demo wallet is always in-memory, so balances start from
    /// zero on every run even when records survive.
    #[arg(long, env = "TXGUARD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Overrides `lock.timeout_ms`.
    #[arg(long, env = "TXGUARD_LOCK_TIMEOUT_MS")]
    lock_timeout_ms: Option<u64>,

    /// Overrides `lock.poll_interval_ms`.
    #[arg(long, env = "TXGUARD_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin HTTP server until ctrl-c.
    Serve {
        /// Overrides `admin.bind` from the config file.
        #[arg(long, env = "TXGUARD_BIND")]
        bind: Option<SocketAddr>,

        /// Events CSV dispatched in the background while the server runs, on
        /// the same locks the admin routes report.
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Dispatch every event of a CSV file and print the final balances.
    Replay {
        /// Input events CSV file
        input: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(env_filter);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    match format {
        LogFormat::Json => subscriber.with(layer.json()).init(),
        LogFormat::Pretty => subscriber.with(layer.pretty()).init(),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<&Path>) -> Result<StateStoreRef> {
    use txguard::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            tracing::info!(path = %path.display(), "Opened RocksDB store");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<&Path>) -> Result<StateStoreRef> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}

/// Reports records a previous process left mid-transaction. They stay locked
/// until an operator clears them through `/mutex/unlock/{id}?clear=true`.
async fn report_stale(inspector: &LockInspector) -> Result<()> {
    let stale = inspector.stale_records(None).await.into_diagnostic()?;
    for record in &stale {
        tracing::warn!(
            id = %record.transaction().id,
            kind = record.kind(),
            "Record left in transaction by a previous run"
        );
    }
    Ok(())
}

async fn serve(
    inspector: LockInspector,
    bind: SocketAddr,
    events: Option<(Dispatcher, PathBuf)>,
) -> Result<()> {
    let app = router(AdminState::new(inspector));
    let listener = tokio::net::TcpListener::bind(bind).await.into_diagnostic()?;
    tracing::info!(addr = %bind, "Admin server listening");

    if let Some((dispatcher, input)) = events {
        tokio::spawn(async move {
            match replay_events(dispatcher, &input).await {
                Ok(()) => tracing::info!(input = %input.display(), "Event replay finished"),
                Err(e) => tracing::error!(input = %input.display(), error = %e, "Event replay failed"),
            }
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Received ctrl-c, shutting down");
        })
        .await
        .into_diagnostic()?;
    Ok(())
}

/// Runs the pending batch concurrently and waits for all of it.
async fn drain(batch: &mut JoinSet<()>) {
    while let Some(joined) = batch.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Event task panicked");
        }
    }
}

/// Consecutive interaction events (taps) run concurrently, the way a chat
/// platform delivers them. Creation events wait for the taps before them and
/// complete before anything after them starts.
async fn replay_events(dispatcher: Dispatcher, input: &Path) -> Result<()> {
    let file = File::open(input).into_diagnostic()?;
    let reader = EventReader::new(file);
    let mut batch = JoinSet::new();

    for event_result in reader.events() {
        let event: Event = match event_result {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Error reading event");
                continue;
            }
        };

        if event.is_creation() {
            drain(&mut batch).await;
            if let Err(e) = dispatcher.dispatch(&event).await {
                tracing::error!(id = %event.id, user = %event.user, error = %e, "Error processing event");
            }
        } else {
            let dispatcher = dispatcher.clone();
            batch.spawn(async move {
                match dispatcher.dispatch(&event).await {
                    Ok(moved) => {
                        tracing::debug!(id = %event.id, user = %event.user, ?moved, "Event processed")
                    }
                    Err(e) => {
                        tracing::error!(id = %event.id, user = %event.user, error = %e, "Error processing event")
                    }
                }
            });
        }
    }
    drain(&mut batch).await;
    Ok(())
}

async fn print_balances(wallet: &WalletRef) -> Result<()> {
    let accounts = wallet.accounts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let mut config = GuardConfig::load(cli.config.as_deref()).into_diagnostic()?;
    if let Some(ms) = cli.lock_timeout_ms {
        config.lock.timeout_ms = ms;
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.lock.poll_interval_ms = ms;
    }
    let db_path = cli.db_path.or(config.db_path.clone());
    let store = open_store(db_path.as_deref())?;

    let registry = Arc::new(LockRegistry::new());
    let inspector = LockInspector::new(registry.clone(), store.clone());
    report_stale(&inspector).await?;

    let wallet: WalletRef = Arc::new(InMemoryWallet::with_latency(config.wallet.latency()));
    let handle = TransactionHandle::new(store, registry, config.lock);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit));
    let dispatcher = Dispatcher::new(handle, limiter, wallet.clone());

    match cli.command {
        Command::Serve { bind, events } => {
            let bind = bind.unwrap_or(config.admin.bind);
            serve(inspector, bind, events.map(|input| (dispatcher, input))).await
        }
        Command::Replay { input } => {
            replay_events(dispatcher, &input).await?;
            print_balances(&wallet).await
        }
    }
}
