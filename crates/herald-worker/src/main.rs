//! `herald`, the notification engine binary.
//!
//! Reads `herald.toml` (or the path given with `--config`), opens the SQLite
//! store, and either runs both jobs until Ctrl-C or performs a single pass:
//!
//! ```text
//! herald run          # reconcile + dispatch on their cadences (default)
//! herald reconcile    # one reconcile pass, report printed as JSON
//! herald dispatch     # one dispatch pass, report printed as JSON
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use herald_engine::{Dispatcher, Reconciler, Runner};
use herald_store_sqlite::SqliteStore;
use herald_worker::{HeraldConfig, Transport, config::ApiConfig};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Herald notification engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "herald.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
  /// Run reconcile and dispatch until interrupted.
  Run,
  /// Run one reconcile pass and exit.
  Reconcile,
  /// Send everything due now and exit.
  Dispatch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = HeraldConfig::load(&cli.config)?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  let transport = Arc::new(Transport::from_config(&cfg.transport)?);
  let reconciler = Reconciler::new(store.clone(), cfg.engine.clone());
  let dispatcher = Dispatcher::new(store.clone(), transport, cfg.engine.clone());

  match cli.command.unwrap_or(Command::Run) {
    Command::Reconcile => {
      let report = reconciler.reconcile(Utc::now()).await;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Dispatch => {
      let report = dispatcher.dispatch_due(Utc::now()).await;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Run => {
      let (cancel_tx, cancel_rx) = watch::channel(false);
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          tracing::info!("Ctrl-C received, shutting down");
        }
        let _ = cancel_tx.send(true);
      });

      let api = if cfg.api.enabled {
        Some(serve_api(&cfg.api, store.clone(), cancel_rx.clone()).await?)
      } else {
        None
      };

      Runner::new(reconciler, dispatcher, cfg.schedule.clone())
        .run(cancel_rx)
        .await;

      if let Some(api) = api {
        api.await.context("API task panicked")??;
      }
    }
  }

  Ok(())
}

/// Bind the operator API and serve it in the background until shutdown.
async fn serve_api(
  cfg: &ApiConfig,
  store: Arc<SqliteStore>,
  mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<anyhow::Result<()>>> {
  let app = axum::Router::new()
    .nest("/api", herald_api::api_router(store))
    .layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", cfg.host, cfg.port);

  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;
  tracing::info!("Operator API listening on http://{address}/api");

  Ok(tokio::spawn(async move {
    axum::serve(listener, app)
      .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
      })
      .await
      .context("server error")
  }))
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
