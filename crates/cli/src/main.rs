//! CLI entrypoint and subcommand orchestration.

mod bootstrap;
mod config;
mod daemon;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};

#[cfg(not(test))]
use std::sync::Arc;

#[cfg(not(test))]
use config::Config;
#[cfg(not(test))]
use gateway::{ChannelAdapter, Dispatcher, StdinAdapter};
#[cfg(not(test))]
use proto::{AgentResponse, ChannelEvent, SessionKey};
#[cfg(not(test))]
use tracing::{error, info, warn};
#[cfg(not(test))]
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Top-level command-line arguments.
#[derive(Parser)]
#[command(name = "clerk")]
#[command(about = "Personal assistant agent: expenses, tasks, weather, search, screenshots", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Also write debug logs to daily-rotated files in this directory
    #[arg(long)]
    log_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon reading messages from stdin (default)
    Start {
        /// Session key for this conversation
        #[arg(short = 's', long)]
        session: Option<String>,
    },

    /// Run a single message and exit
    Run {
        /// Message to send to the agent
        #[arg(short = 'e', long)]
        exec: String,

        /// Session key for this conversation
        #[arg(short = 's', long)]
        session: Option<String>,
    },
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Start { .. } => "start",
            Commands::Run { .. } => "run",
        }
    }
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Start { session: None });

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // Keeps buffered file writes alive until main returns.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let appender = tracing_appender::rolling::daily(dir, "clerk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            _file_guard = Some(guard);
            let console = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter);
            let file = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new(
                    "debug,hyper_util=info,rustls=info,reqwest=info,chromiumoxide=warn",
                ));
            tracing_subscriber::registry()
                .with(console)
                .with(file)
                .init();
        }
        None => {
            _file_guard = None;
            fmt()
                .with_env_filter(console_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = command.label(),
        log_level = %cli.log_level,
        "clerk starting"
    );

    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Failed to load config ({e}), using defaults");
        Config::default()
    });

    match command {
        Commands::Start { session } => cmd_start(config, session).await,
        Commands::Run { exec, session } => cmd_run(config, exec, session).await,
    }
}

/// Session key from the flag, or a fresh random one.
fn session_key(session: Option<String>) -> proto::SessionKey {
    session
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(proto::SessionKey::from)
        .unwrap_or_default()
}

#[cfg(not(test))]
async fn cmd_start(config: Config, session: Option<String>) -> anyhow::Result<()> {
    info!("Starting clerk daemon");
    let runtime = bootstrap::build_runtime(&config).await?;

    // In-process event bus
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<ChannelEvent>(128);
    let (resp_tx, mut resp_rx) = tokio::sync::mpsc::channel::<AgentResponse>(128);

    let session: SessionKey = session_key(session);
    let adapter = StdinAdapter::with_session(session.clone());
    let responder = StdinAdapter::with_session(session);
    tokio::spawn(async move {
        if let Err(e) = adapter.run(event_tx).await {
            error!("Stdin adapter error: {e}");
        }
    });

    let forwarder = tokio::spawn(async move {
        while let Some(resp) = resp_rx.recv().await {
            if let Err(e) = responder.send_response(resp).await {
                error!("Failed to send response: {e}");
            }
        }
    });

    let pid_file = daemon::PidFile::new(daemon::PidFile::default_path());
    pid_file.write().await?;

    let dispatcher = Dispatcher::new(Arc::clone(&runtime), resp_tx);
    let handled = dispatcher
        .run_until(event_rx, daemon::wait_for_shutdown())
        .await;
    info!(messages = handled, "Dispatcher stopped");

    if let Err(e) = forwarder.await {
        warn!("Response forwarder aborted: {e}");
    }
    if let Err(e) = runtime.shutdown().await {
        warn!("Memory flush failed during shutdown: {e}");
    }
    pid_file.remove().await;
    info!("clerk stopped");
    Ok(())
}

#[cfg(not(test))]
async fn cmd_run(config: Config, exec: String, session: Option<String>) -> anyhow::Result<()> {
    let runtime = bootstrap::build_runtime(&config).await?;
    let session = session_key(session);

    println!("{}", format_run_header(&exec));
    let report = runtime.run_cycle(&session, &exec, None).await;
    println!("{}", report.reply);
    for path in &report.image_paths {
        println!("[image] {path}");
    }

    runtime.shutdown().await?;
    if report.state == agent::CycleState::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn format_run_header(exec: &str) -> String {
    format!("> {exec}")
}
