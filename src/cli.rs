//! Command-line entry point (§10): `serve` runs the whole service, `init`
//! prepares a fresh storage root. Every flag doubles as an environment
//! variable (`clap`'s `env` feature) so the same binary runs unchanged
//! under a process supervisor or a container orchestrator.

use std::path::PathBuf;

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Result, WrapErr as _};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::Config;
use crate::server;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Parser)]
#[command(name = "tlog-sequencer", about = "Tile-based tamper-evident log sequencer")]
pub struct Options {
    /// TOML configuration file; environment variables (`SEQ__*`) layer on top.
    #[arg(long, env = "SEQ_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "SEQ_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// `tracing_subscriber::EnvFilter` directive string, e.g. `tlog_sequencer=debug,info`.
    #[arg(long, env = "SEQ_LOG_FILTER", default_value = "info")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the sequencer, integrator, checkpoint publisher, antispam
    /// follower, and HTTP server as one process until shut down.
    Serve,
    /// Writes the compatibility row and an empty tree state to a fresh
    /// storage root; run once before the first `serve`.
    Init,
}

impl Options {
    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_new(&self.log_filter).wrap_err("parsing --log-filter")?;
        let subscriber = tracing_subscriber::registry().with(filter);
        match self.log_format {
            LogFormat::Json => subscriber.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => subscriber.with(fmt::layer().pretty()).try_init(),
        }
        .map_err(|e| eyre::eyre!("installing tracing subscriber: {e}"))
    }
}

/// Runs the parsed CLI to completion.
pub async fn run(options: Options) -> Result<()> {
    let config = Config::load(options.config.as_deref()).wrap_err("loading configuration")?;

    match options.command {
        Command::Init => {
            App::init_storage(&config.storage_root)
                .await
                .wrap_err("initializing storage root")?;
            tracing::info!(storage_root = %config.storage_root.display(), "storage root initialized");
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let listen_addr = config.listen_addr;
    let app = App::bootstrap(config).await.wrap_err("bootstrapping application")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .wrap_err_with(|| format!("binding {listen_addr}"))?;
    tracing::info!(%listen_addr, "listening");

    let router = server::router(Arc::clone(&app));
    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(app))
        .await
        .wrap_err("serving HTTP")?;

    tracing::info!("shut down cleanly");
    Ok(())
}

async fn wait_for_shutdown(app: Arc<App>) {
    let mut signal = app.shutdown.signal();
    tokio::select! {
        () = signal.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to install ctrl-c handler");
            }
            app.shutdown.trigger();
        }
    }
}
