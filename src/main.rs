use clap::Parser;
use depot::error::{ErrorKind, Result};
use depot::state::AppState;
use depot_config::{Config, Overrides};
use exn::ResultExt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

/// Galaxy-compatible collection registry over a generic content store.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file, merged over the default locations.
    #[arg(short, long, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    listen_addr: Option<IpAddr>,
    #[arg(long)]
    listen_port: Option<u16>,
    /// `tracing` filter directive, e.g. `info` or `depot=debug`.
    #[arg(long)]
    log_level: Option<String>,
    /// Upstream Galaxy server to federate reads to.
    #[arg(long)]
    upstream_url: Option<String>,
}

impl From<Args> for Overrides {
    fn from(args: Args) -> Self {
        Self {
            config: args.config,
            listen_addr: args.listen_addr,
            listen_port: args.listen_port,
            log_level: args.log_level,
            upstream_url: args.upstream_url,
        }
    }
}

async fn shutdown() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {},
        () = terminate => {},
    }
    tracing::info!("Shutting down");
}

async fn serve(config: Config) -> Result<()> {
    let addr = config.listen.socket_addr();
    let state = AppState::from_config(config)?;
    let listener = tokio::net::TcpListener::bind(addr).await.or_raise(|| ErrorKind::Serve)?;
    tracing::info!(%addr, "Listening");
    axum::serve(listener, depot::app(state))
        .with_graceful_shutdown(shutdown())
        .await
        .or_raise(|| ErrorKind::Serve)
}

#[tokio::main]
async fn main() -> ExitCode {
    let overrides = Overrides::from(Args::parse());
    let config = match Config::discover(&overrides).or_raise(|| ErrorKind::Config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:?}");
            return ExitCode::FAILURE;
        },
    };
    if let Err(e) = depot::logging::init(&config.log) {
        eprintln!("{e:?}");
        return ExitCode::FAILURE;
    }
    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "Server failed");
            ExitCode::FAILURE
        },
    }
}
