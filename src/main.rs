use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use truthd::config::CoordinatorConfig;
use truthd::ipc::event::EventBroadcaster;
use truthd::session::identity::HttpIdentityBroker;
use truthd::{ipc, liveness, AppContext};

#[derive(Parser)]
#[command(
    name = "truthd",
    about = "TruthScope Host — background coordinator daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// WebSocket server port
    #[arg(long, env = "TRUTHD_PORT")]
    port: Option<u16>,

    /// Data directory for config and logs
    #[arg(long, env = "TRUTHD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TRUTHD_LOG")]
    log: Option<String>,

    /// Bind address for the WebSocket server (default: 127.0.0.1)
    #[arg(long, env = "TRUTHD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "TRUTHD_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the coordinator (default when no subcommand given).
    Serve,
    /// Probe a running coordinator's health endpoint and print the report.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = CoordinatorConfig::new(args.port, args.data_dir, args.log, args.bind_address);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let _guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);
            serve(config).await
        }
        Command::Status => status(&config).await,
    }
}

async fn serve(config: CoordinatorConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "truthd starting");

    let broadcaster = Arc::new(EventBroadcaster::new());
    let broker = Arc::new(HttpIdentityBroker::new(
        config.identity.clone(),
        broadcaster.clone(),
    ));
    let ctx = Arc::new(AppContext::build(config, broadcaster, broker));

    // Startup credential restoration runs alongside the server; a context
    // that asks before it completes receives a sessionChanged follow-up.
    let session = ctx.session.clone();
    tokio::spawn(async move { session.bootstrap().await });

    ipc::run(ctx).await
}

async fn status(config: &CoordinatorConfig) -> Result<()> {
    let addr = format!("{}:{}", config.bind_address, config.port);
    match liveness::probe(&addr).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("coordinator not reachable at {addr}: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Initialise tracing. When `log_file` is set, logs go to stdout *and* a
/// daily-rotated file; the returned guard must stay alive for the file
/// writer to flush.
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("truthd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
