use std::sync::Arc;

use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::ResourceExt;
use tokio_retry2::{Retry, RetryError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    annotations::{BackReference, token_secret_name},
    cascade::{TokenCleanup, TokenSecretDeleter},
    error::{Error, StoreError},
    retry::RetryPolicy,
    store::ResourceStore,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The secret doesn't name a service account.
    NoBackReference,
    ServiceAccountGone,
    /// A service account with the same name but a different UID owns the
    /// name now; it is left alone.
    UidMismatch,
    /// Nothing referenced the secret.
    Unchanged,
    Updated,
}

/// Strips `secret_name` from both reference lists, keeping everything else in
/// its original order. Returns whether anything was removed.
pub fn remove_secret_references(sa: &mut ServiceAccount, secret_name: &str) -> bool {
    let mut changed = false;

    if let Some(secrets) = sa.secrets.as_mut() {
        let before = secrets.len();
        secrets.retain(|r| r.name.as_deref() != Some(secret_name));
        changed |= secrets.len() != before;
    }

    if let Some(pull_secrets) = sa.image_pull_secrets.as_mut() {
        let before = pull_secrets.len();
        pull_secrets.retain(|r| r.name != secret_name);
        changed |= pull_secrets.len() != before;
    }

    changed
}

/// Repairs service accounts after their dockercfg secrets are deleted.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    tokens: TokenSecretDeleter,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ResourceStore>, retry: RetryPolicy) -> Self {
        Self {
            tokens: TokenSecretDeleter::new(store.clone()),
            store,
            retry,
        }
    }

    /// Handles one deleted dockercfg secret. Failures are logged, never
    /// returned, so one bad event can't stall the ones behind it.
    pub async fn secret_deleted(&self, secret: &Secret, cancel: &CancellationToken) {
        let Some(token_name) = token_secret_name(secret) else {
            debug!(secret = %secret.name_any(), "Ignoring secret without a token annotation");
            return;
        };
        let name = secret.name_any();
        let namespace = secret.namespace().unwrap_or_default();

        match self.remove_references(secret, cancel).await {
            Ok(RepairOutcome::Updated) => info!(
                secret = %name,
                namespace = %namespace,
                "Removed references to deleted dockercfg secret"
            ),
            Ok(outcome) => debug!(
                secret = %name,
                namespace = %namespace,
                ?outcome,
                "No service account references to remove"
            ),
            Err(Error::Cancelled) => {
                warn!(
                    secret = %name,
                    namespace = %namespace,
                    "Shutting down, abandoning reference cleanup"
                );
                return;
            }
            Err(e) => error!(
                secret = %name,
                namespace = %namespace,
                error = %e,
                "Failed to remove references to deleted dockercfg secret"
            ),
        }

        match self.tokens.delete(&namespace, token_name).await {
            Ok(TokenCleanup::Deleted) => info!(
                token = %token_name,
                namespace = %namespace,
                "Deleted token secret"
            ),
            Ok(TokenCleanup::AlreadyAbsent) => debug!(
                token = %token_name,
                namespace = %namespace,
                "Token secret already gone"
            ),
            Err(e) => error!(
                token = %token_name,
                namespace = %namespace,
                error = %e,
                "Failed to delete token secret"
            ),
        }
    }

    /// Removes the secret from its owning service account, retrying on
    /// conflicts. Each attempt starts from a fresh read.
    pub async fn remove_references(
        &self,
        secret: &Secret,
        cancel: &CancellationToken,
    ) -> Result<RepairOutcome, Error> {
        let Some(owner) = BackReference::from_secret(secret) else {
            return Ok(RepairOutcome::NoBackReference);
        };
        let owner = &owner;
        let mut attempt = 0;
        let action = move || {
            attempt += 1;
            self.try_remove_references(secret, owner, attempt)
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = Retry::spawn(self.retry.delays(), action) => result,
        };

        result.map_err(|e| match e {
            Error::Store(source) if source.is_conflict() => Error::ConflictRetriesExhausted {
                attempts: self.retry.max_attempts(),
                source,
            },
            e => e,
        })
    }

    async fn try_remove_references(
        &self,
        secret: &Secret,
        owner: &BackReference,
        attempt: u32,
    ) -> Result<RepairOutcome, RetryError<Error>> {
        let namespace = secret.namespace().unwrap_or_default();
        let secret_name = secret.name_any();

        let mut sa = match self.store.get_service_account(&namespace, &owner.name).await {
            Ok(sa) => sa,
            Err(e) if e.is_not_found() => return Ok(RepairOutcome::ServiceAccountGone),
            Err(e) => return Err(RetryError::permanent(e.into())),
        };

        if sa.metadata.uid.as_deref() != Some(owner.uid.as_str()) {
            info!(
                secret = %secret_name,
                service_account = %owner.name,
                expected_uid = %owner.uid,
                actual_uid = ?sa.metadata.uid,
                "Service account was recreated, leaving its references alone"
            );
            return Ok(RepairOutcome::UidMismatch);
        }

        if !remove_secret_references(&mut sa, &secret_name) {
            return Ok(RepairOutcome::Unchanged);
        }

        match self.store.replace_service_account(&sa).await {
            Ok(_) => Ok(RepairOutcome::Updated),
            Err(e @ StoreError::Conflict { .. }) => {
                debug!(
                    service_account = %owner.name,
                    attempt,
                    max_attempts = self.retry.max_attempts(),
                    "Conflict updating service account"
                );
                Err(RetryError::transient(e.into()))
            }
            Err(e) => Err(RetryError::permanent(e.into())),
        }
    }
}
