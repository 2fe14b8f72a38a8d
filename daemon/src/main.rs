//! syncherd: declarative Bucardo replication daemon.
//!
//! Loads the desired-state document, converges the engine onto it, restarts
//! the engine and then either waits for run-once syncs to finish or keeps
//! supervising it. An admin HTTP surface runs alongside.
//!
//! Usage:
//!   syncherd --config /media/bucardo/bucardo.json --http-port 8080

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use syncherd::{EngineDatabase, Orchestrator, ServiceConfig, build_router};
use syncherd_engine::{BucardoCli, CliConfig, EngineAdapter, PgpassFile};
use syncherd_monitor::{HubLayer, LogHub, MonitorOutcome};
use syncherd_store::JsonFileStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "syncherd")]
#[command(about = "Declarative Bucardo replication daemon")]
struct Args {
    /// Desired-state JSON document
    #[arg(short, long, env = "SYNCHERD_CONFIG", default_value = "/media/bucardo/bucardo.json")]
    config: PathBuf,

    /// Engine log file followed for completion markers
    #[arg(long, env = "BUCARDO_LOG_PATH", default_value = "/var/log/bucardo/log.bucardo")]
    log_path: PathBuf,

    /// Password file provisioned for the engine during each cycle
    #[arg(long, env = "PGPASS_PATH", default_value = "/var/lib/postgresql/.pgpass")]
    pgpass_path: PathBuf,

    /// OS user the engine CLI runs as; empty runs it directly
    #[arg(long, env = "BUCARDO_USER", default_value = "postgres")]
    engine_user: String,

    /// Engine CLI executable
    #[arg(long, env = "BUCARDO_CMD", default_value = "bucardo")]
    engine_command: String,

    /// Engine pid file, checked while stopping
    #[arg(long, env = "BUCARDO_PID_FILE", default_value = "/var/run/bucardo/bucardo.mcp.pid")]
    pid_file: PathBuf,

    /// Admin HTTP port
    #[arg(long, env = "HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// Engine state database name (also the engine role)
    #[arg(long, env = "BUCARDO_DB_NAME", default_value = "bucardo")]
    db_name: String,

    #[arg(long, env = "BUCARDO_DB_HOST", default_value = "postgres")]
    db_host: String,

    /// Superuser for the engine state database
    #[arg(long, env = "BUCARDO_DB_USER", default_value = "postgres")]
    db_user: String,

    #[arg(long, env = "BUCARDO_DB_PASS", default_value = "changeme", hide_env_values = true)]
    db_pass: String,

    #[arg(long, env = "BUCARDO_DB_PORT", default_value = "5432")]
    db_port: u16,

    /// Disable the direct state-table deletion fallback
    #[arg(long)]
    no_fallback_deletion: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Compact,
}

impl Args {
    fn engine_db(&self) -> EngineDatabase {
        EngineDatabase {
            name: self.db_name.clone(),
            host: self.db_host.clone(),
            user: self.db_user.clone(),
            password: self.db_pass.clone(),
            port: self.db_port,
        }
    }

    fn engine_os_user(&self) -> Option<String> {
        Some(self.engine_user.clone()).filter(|u| !u.is_empty())
    }
}

fn init_tracing(args: &Args, hub: &LogHub) {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (json, compact) = match args.log_format {
        LogFormat::Json => (Some(fmt::layer().json().with_target(false)), None),
        LogFormat::Compact => (None, Some(fmt::layer().compact().with_target(false))),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(HubLayer::new(hub.clone()))
        .with(json)
        .with(compact)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let hub = LogHub::default();
    init_tracing(&args, &hub);

    match run(args, hub).await {
        Ok(MonitorOutcome::TimedOut { .. }) => ExitCode::FAILURE,
        Ok(outcome) => {
            info!(component = "main", ?outcome, "syncherd finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(component = "main", error = %format!("{e:#}"), "syncherd failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, hub: LogHub) -> Result<MonitorOutcome> {
    info!(component = "main", config = %args.config.display(), "syncherd starting");

    let cli_config = CliConfig::default()
        .with_user(args.engine_os_user())
        .with_command(&args.engine_command)
        .with_pid_file(&args.pid_file);
    let engine: Arc<dyn EngineAdapter> =
        Arc::new(BucardoCli::new(cli_config).context("Failed to set up engine adapter")?);
    let store = Arc::new(JsonFileStore::new(&args.config));
    let credentials = Arc::new(PgpassFile::new(&args.pgpass_path).with_owner(args.engine_os_user()));
    let config = ServiceConfig::default()
        .with_engine_db(args.engine_db())
        .with_log_path(&args.log_path)
        .with_fallback_deletion(!args.no_fallback_deletion);

    let service = Arc::new(Orchestrator::new(
        store,
        engine.clone(),
        credentials,
        hub,
        config,
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.http_port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", args.http_port))?;
    info!(component = "http", port = args.http_port, "Admin API listening");
    let app = build_router(service.clone(), shutdown.clone());
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            error!(component = "http", error = %e, "HTTP server failed");
        }
    });

    let result = service.run(&shutdown).await;
    shutdown.cancel();
    if let Err(e) = server.await {
        warn!(component = "http", error = %e, "HTTP server task ended abnormally");
    }

    if result.is_err() {
        if let Err(e) = engine.stop_engine().await {
            warn!(component = "main", error = %e, "Failed to stop engine after error");
        }
    }
    result.context("Service run failed")
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(component = "main", error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(component = "main", error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(component = "main", "Received interrupt"),
        _ = terminate => info!(component = "main", "Received terminate"),
    }
    shutdown.cancel();
}
