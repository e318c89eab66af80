use std::sync::Arc;

use crate::{error::StoreError, store::ResourceStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenCleanup {
    Deleted,
    AlreadyAbsent,
}

/// Removes the token secret that backed a deleted dockercfg secret.
#[derive(Clone)]
pub struct TokenSecretDeleter {
    store: Arc<dyn ResourceStore>,
}

impl TokenSecretDeleter {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Result<TokenCleanup, StoreError> {
        match self.store.delete_secret(namespace, name).await {
            Ok(()) => Ok(TokenCleanup::Deleted),
            Err(e) if e.is_not_found() => Ok(TokenCleanup::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }
}
