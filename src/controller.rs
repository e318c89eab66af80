use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{reconciler::Reconciler, subscription::DeletionSource};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Watches for deleted dockercfg secrets and removes what they leave behind:
/// references on their service account and the token secret that backed them.
pub struct DockercfgDeletedController {
    source: Arc<dyn DeletionSource>,
    reconciler: Arc<Reconciler>,
    running: Option<Running>,
}

impl DockercfgDeletedController {
    pub fn new(source: Arc<dyn DeletionSource>, reconciler: Reconciler) -> Self {
        Self {
            source,
            reconciler: Arc::new(reconciler),
            running: None,
        }
    }

    /// Spawns the watch loop and returns immediately. Does nothing if the
    /// controller is already running; a loop that ended on its own is replaced.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("Controller already running");
            return;
        }

        let cancel = CancellationToken::new();
        let deletions = self.source.deletions();
        let handle = tokio::spawn(process_deletions(
            deletions,
            self.reconciler.clone(),
            cancel.clone(),
        ));
        info!("Started dockercfg secret controller");

        self.running = Some(Running { cancel, handle });
    }

    /// Stops the watch loop, interrupting any retry in progress, and waits for
    /// it to exit. Safe to call when already stopped.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!("Controller task failed: {}", e);
        }
        info!("Stopped dockercfg secret controller");
    }

    /// Whether the watch loop is alive. Turns false once stopped, or once the
    /// deletion stream has ended.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl Drop for DockercfgDeletedController {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

async fn process_deletions(
    mut deletions: BoxStream<'static, Secret>,
    reconciler: Arc<Reconciler>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,

            next = deletions.next() => match next {
                Some(secret) => {
                    debug!(secret = %secret.name_any(), "Secret deleted");
                    reconciler.secret_deleted(&secret, &cancel).await;
                }
                None => {
                    info!("Deletion stream closed");
                    break;
                }
            },
        }
    }
}
