//! CLI for fancast
//!
//! Subcommands:
//! - `server`: run the WebSocket broadcast server
//! - `client`: run the load-generating client simulator
//!
//! Exit codes: 0 on clean shutdown, 2 on argument/configuration errors
//! (clap reports usage errors with 2 on its own), 1 on bind or fatal
//! runtime errors.

mod sim;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use fancast_config::{load_config, Mode, PartialSettings};
use fancast_transport::Server;

#[derive(Parser)]
#[command(name = "fancast", version, about = "WebSocket fan-out broadcaster")]
enum Command {
    /// Start the broadcast server
    Server(ServerArgs),
    /// Run the client simulator against a running server
    Client(sim::ClientArgs),
}

#[derive(clap::Args)]
struct ServerArgs {
    /// Fan-out strategy [default: queue]
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    host: Option<String>,
    /// Bind port [default: 8765]
    #[arg(long)]
    port: Option<u16>,
    /// Messages per second [default: 100]
    #[arg(long)]
    rate: Option<f64>,
    /// Payload size in bytes [default: 64]
    #[arg(long)]
    payload_bytes: Option<u32>,
    /// Per-session queue capacity [default: 100]
    #[arg(long)]
    maxsize: Option<u32>,
    /// Drops tolerated inside the drop window before disconnect [default: 50]
    #[arg(long)]
    drop_limit: Option<u32>,
    /// Window for the drop limit, seconds [default: 10]
    #[arg(long)]
    drop_window_secs: Option<f64>,
    /// Max continuous queue-full duration, seconds [default: 5]
    #[arg(long)]
    full_timeout: Option<f64>,
    /// WebSocket ping period, seconds [default: 20]
    #[arg(long)]
    ping_interval: Option<f64>,
    /// WebSocket ping timeout, seconds [default: 20]
    #[arg(long)]
    ping_timeout: Option<f64>,
    /// Structured JSON log output
    #[arg(long)]
    log_json: bool,
    /// Optional config file with the same keys
    #[arg(long)]
    config: Option<PathBuf>,
}

impl ServerArgs {
    fn overrides(&self) -> PartialSettings {
        PartialSettings {
            mode: self.mode,
            host: self.host.clone(),
            port: self.port,
            rate: self.rate,
            payload_bytes: self.payload_bytes,
            maxsize: self.maxsize,
            drop_limit: self.drop_limit,
            drop_window_secs: self.drop_window_secs,
            full_timeout: self.full_timeout,
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            log_json: self.log_json.then_some(true),
            ..PartialSettings::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match Command::parse() {
        Command::Server(args) => run_server(args).await,
        Command::Client(args) => sim::run(args).await,
    }
}

async fn run_server(args: ServerArgs) -> ExitCode {
    let settings = match load_config(args.config.as_deref(), args.overrides()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("fancast: configuration error: {e}");
            return ExitCode::from(2);
        }
    };
    fancast_utils::logging::init(&settings.logging.level, settings.logging.json);

    let listener = match Server::bind(&settings).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let server = Server::start(listener, settings);
    wait_for_signal().await;
    info!("shutdown signal received");
    server.shutdown().await;
    ExitCode::SUCCESS
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
