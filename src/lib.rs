use std::sync::Arc;

use kube::{Client, config::KubeConfigOptions};
use tracing::info;

pub mod annotations;
pub mod cascade;
pub mod config;
pub mod controller;
pub mod error;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod subscription;

use config::ControllerConfig;
use controller::DockercfgDeletedController;
use reconciler::Reconciler;
use store::KubeStore;
use subscription::KubeDeletionSource;

pub async fn connect() -> anyhow::Result<Client> {
    let options = KubeConfigOptions::default();

    // Load kubeconfig if it's present otherwise fall back to cluster config
    let config = kube::Config::from_kubeconfig(&options)
        .await
        .or_else(|_| kube::Config::incluster())?;
    Ok(Client::try_from(config)?)
}

/// Runs the controller until Ctrl-C.
pub async fn run(config: ControllerConfig) -> anyhow::Result<()> {
    let retry = config.retry_policy()?;
    let resync = config.resync()?;
    let client = connect().await?;

    let store = Arc::new(KubeStore::new(client.clone()));
    let source = Arc::new(KubeDeletionSource::new(client, resync));
    let mut controller = DockercfgDeletedController::new(source, Reconciler::new(store, retry));

    info!(
        max_update_attempts = retry.max_attempts(),
        conflict_jitter = ?retry.max_jitter(),
        resync = ?resync,
        "Watching for deleted dockercfg secrets"
    );
    controller.start();

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    controller.stop().await;

    Ok(())
}
