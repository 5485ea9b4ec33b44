//! Claude usage rotor
//!
//! Single-binary service that:
//! 1. Polls a usage adapter for every stored Claude profile
//! 2. Scores each profile's remaining capacity
//! 3. Swaps the active profile when it runs out and a better one exists
//! 4. Re-primes idle sessions for profiles that opted in
//! 5. Serves a local admin API for inspection and manual control

mod admin;
mod config;
mod metrics;
mod view;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use claude_profiles::{ProfileId, ProfileStore, now_millis};
use profile_rotation::{
    AutoStartService, CommandPrimer, HttpUsageFetcher, RotationService, Rotor, StoreActivation,
    spawn_refresh_task,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Grace period for in-flight admin requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(
    name = "claude-usage-rotor",
    version,
    about = "Rotate the active Claude profile by remaining usage capacity"
)]
struct Cli {
    /// Config file (default: $CONFIG_PATH, then ./claude-usage-rotor.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run the refresh loop and admin API (default)
    Run,
    /// Print every profile with its usage and capacity
    Status,
    /// Dry-run a rotation evaluation over stored usage
    Evaluate,
    /// Print a one-line summary of the active profile
    Statusline,
    /// Make a profile active now, without starting the rotation cooldown
    Activate {
        /// Profile id
        id: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();
}

/// Wire the store, fetcher, activation sink and optional primer into a rotor.
async fn build_rotor(config: &Config) -> Result<Rotor> {
    let store = ProfileStore::load(config.store.profiles_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load profile store {}",
                config.store.profiles_path.display()
            )
        })?;
    let store = Arc::new(store);

    let activation = Arc::new(StoreActivation::new(
        store.clone(),
        config.store.active_credentials_path.clone(),
    ));
    let rotation = RotationService::new(config.rotation.to_rotation_config());

    let rotor = match config.usage {
        Some(ref usage) => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(usage.timeout_secs))
                .build()
                .context("failed to build HTTP client")?;
            let fetcher = HttpUsageFetcher::new(client, usage.endpoint.clone());
            Rotor::new(store, Arc::new(fetcher), activation, rotation)
        }
        None => Rotor::push_only(store, activation, rotation),
    };
    let mut rotor = rotor.with_rotation_enabled(config.rotation.enabled);

    if config.auto_start.enabled {
        let primer = CommandPrimer::new(
            config.auto_start.command.clone(),
            config.auto_start.args.clone(),
            Duration::from_secs(config.auto_start.timeout_secs),
        );
        rotor = rotor.with_auto_start(
            Arc::new(primer),
            AutoStartService::new(config.auto_start.to_auto_start_config()),
        );
    }

    Ok(rotor)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Status => {
            let rotor = build_rotor(&config).await?;
            let document = rotor.store().snapshot().await;
            let point = rotor.weekly_exhaustion_point().await;
            print!("{}", view::status_table(&document, point));
            Ok(())
        }
        Command::Evaluate => {
            let rotor = build_rotor(&config).await?;
            let decision = rotor.evaluate_now().await;
            println!("{}", serde_json::to_string_pretty(&decision.to_json())?);
            Ok(())
        }
        Command::Statusline => {
            let rotor = build_rotor(&config).await?;
            let document = rotor.store().snapshot().await;
            let point = rotor.weekly_exhaustion_point().await;
            println!("{}", view::statusline(&document, point, now_millis()));
            Ok(())
        }
        Command::Activate { id } => {
            let id = ProfileId::from(id);
            let rotor = build_rotor(&config).await?;
            rotor
                .activate(&id)
                .await
                .with_context(|| format!("failed to activate {id}"))?;
            println!("activated {id}");
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!("starting claude-usage-rotor");

    // Install before the first cycle emits anything
    let prometheus = metrics::install_recorder()?;

    let rotor = Arc::new(build_rotor(&config).await?);
    let profiles = rotor.store().len().await;
    info!(
        profiles,
        endpoint = config.usage.as_ref().map(|u| u.endpoint.as_str()),
        push_only = rotor.is_push_only(),
        refresh_interval_secs = config.refresh.interval_secs,
        rotation_enabled = config.rotation.enabled,
        auto_start_enabled = config.auto_start.enabled,
        "configuration loaded"
    );
    if config.admin.token.is_none() && !config.admin.listen_addr.ip().is_loopback() {
        warn!(
            addr = %config.admin.listen_addr,
            "admin API bound to a non-loopback address without a token"
        );
    }

    let refresh = spawn_refresh_task(
        rotor.clone(),
        Duration::from_secs(config.refresh.interval_secs),
    );

    let state = admin::AdminState::new(rotor, prometheus, config.admin.token.clone());
    let app = admin::build_router(state, config.admin.max_connections);

    let listen_addr = config.admin.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "admin API listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    refresh.abort();
    let _ = shutdown_tx.send(());

    // The drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("admin requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
