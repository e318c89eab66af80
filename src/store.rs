use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, PostParams},
};

use crate::error::StoreError;

/// The reads and writes the controller performs against the cluster.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, StoreError>;

    /// Writes `sa` back, guarded by its `metadata.resourceVersion`. A stale
    /// version fails with [`StoreError::Conflict`].
    async fn replace_service_account(
        &self,
        sa: &ServiceAccount,
    ) -> Result<ServiceAccount, StoreError>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, StoreError> {
        Api::<ServiceAccount>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube("ServiceAccount", namespace, name, e))
    }

    async fn replace_service_account(
        &self,
        sa: &ServiceAccount,
    ) -> Result<ServiceAccount, StoreError> {
        let namespace = sa.namespace().unwrap_or_default();
        let name = sa.name_any();
        Api::<ServiceAccount>::namespaced(self.client.clone(), &namespace)
            .replace(&name, &PostParams::default(), sa)
            .await
            .map_err(|e| StoreError::from_kube("ServiceAccount", &namespace, &name, e))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube("Secret", namespace, name, e))
    }
}
