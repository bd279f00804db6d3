//! Lease cascade worker entry point.
//!
//! Wires a session controller, a key controller, and a worker controller
//! into a parent-child observer chain, starts them in dependency order, and
//! tears them down in reverse order on `SIGINT`/`SIGTERM`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cascade_clients::{GcsClientFactory, VaultBrokerClient};
use cascade_core::Controller;

use cascade_worker::config::{CliArgs, Config};
use cascade_worker::refreshers::{KeyRefresher, SessionRefresher, WorkerRefresher};

/// Ceiling on the exponential backoff applied to every controller's retry
/// loop, independent of its healthy period.
const MAX_BACKOFF: Duration = Duration::from_secs(64);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    let mut config = Config::from_file(cli.config.as_deref())
        .with_context(|| "failed to load configuration file")?;
    config.apply_cli(&cli);
    config
        .validate_tls_paths()
        .with_context(|| "TLS path validation failed")?;

    init_logging(&config);

    info!(
        vault_address = %config.vault.address,
        vault_role = %config.vault.role_name,
        project_id = %config.project_id,
        "cascade worker starting",
    );

    let broker = VaultBrokerClient::new(
        &config.vault.address,
        &config.vault.role_id,
        &config.vault.secret_id,
    )
    .context("failed to build secrets broker client")?;

    let cloud_factory: Arc<dyn cascade_clients::CloudClientFactory> =
        Arc::new(GcsClientFactory::new().context("failed to build cloud client factory")?);

    let session_controller = Controller::new(
        "session",
        SessionRefresher::new(Arc::clone(&broker) as Arc<dyn cascade_clients::SecretsBrokerClient>),
        MAX_BACKOFF,
    );

    let key_controller = Controller::new(
        "key",
        KeyRefresher::new(
            Arc::clone(&broker) as Arc<dyn cascade_clients::SecretsBrokerClient>,
            config.secrets_path.clone(),
            config.early_renewal(),
        ),
        MAX_BACKOFF,
    );

    let worker_controller = Controller::new(
        "worker",
        WorkerRefresher::new(
            Arc::clone(&key_controller),
            Arc::clone(&cloud_factory),
            config.project_id.clone(),
            config.interval(),
        ),
        MAX_BACKOFF,
    );

    // Register children only after each parent exists, so a notification
    // fired during the parent's own warm start never reaches an
    // as-yet-unregistered child.
    session_controller
        .register(Arc::clone(&key_controller) as Arc<dyn cascade_core::LeaseObserver>)
        .await;
    key_controller
        .register(Arc::clone(&worker_controller) as Arc<dyn cascade_core::LeaseObserver>)
        .await;

    session_controller
        .start()
        .await
        .context("session controller already started")?;
    if session_controller.credential().await.is_empty() {
        anyhow::bail!("secrets broker unreachable on initial warm, refusing to start");
    }

    key_controller
        .start()
        .await
        .context("key controller already started")?;
    worker_controller
        .start()
        .await
        .context("worker controller already started")?;

    shutdown_signal().await;
    info!("shutdown signal received, stopping controllers");

    worker_controller.stop().await;
    key_controller
        .deregister(worker_controller.controller_id())
        .await;
    key_controller.stop().await;
    session_controller
        .deregister(key_controller.controller_id())
        .await;
    session_controller.stop().await;

    info!("cascade worker stopped");
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for `SIGINT` or (on unix) `SIGTERM`.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
