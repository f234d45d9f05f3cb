// src/cluster/store.rs
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::{Api, Client, Config};
use thiserror::Error;
use tracing::debug;

use super::CredentialRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to list secrets in namespace {namespace}: {source}")]
    List {
        namespace: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Error)]
pub enum StoreInitError {
    #[error("failed to get in-cluster config: {0}")]
    InClusterConfig(#[from] kube::config::InClusterError),

    #[error("failed to create client: {0}")]
    Client(#[from] kube::Error),
}

/// Lists the credential secrets registered in the control plane.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<CredentialRecord>, StoreError>;
}

/// Secret store backed by the API server this process runs in.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn in_cluster() -> Result<Self, StoreInitError> {
        let config = Config::incluster()?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = secrets
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| StoreError::List {
                namespace: namespace.to_string(),
                source: Box::new(e),
            })?;

        debug!(
            namespace,
            label_selector,
            count = list.items.len(),
            "listed cluster secrets"
        );

        Ok(list.items.into_iter().map(record_from_secret).collect())
    }
}

fn record_from_secret(secret: Secret) -> CredentialRecord {
    CredentialRecord {
        name: secret.metadata.name.unwrap_or_default(),
        data: secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn secret_data_is_copied_verbatim() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("cluster-a".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                ("server".to_string(), ByteString(b"https://a.example".to_vec())),
                ("name".to_string(), ByteString(b"a".to_vec())),
            ])),
            ..Default::default()
        };

        let record = record_from_secret(secret);
        assert_eq!(record.name, "cluster-a");
        assert_eq!(record.field("server"), Some(&b"https://a.example"[..]));
        assert_eq!(record.field_str("name").as_deref(), Some("a"));
    }

    #[test]
    fn secret_without_data_yields_empty_record() {
        let record = record_from_secret(Secret::default());
        assert!(record.name.is_empty());
        assert!(record.data.is_empty());
    }
}
