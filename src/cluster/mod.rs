// src/cluster/mod.rs
mod resolver;
mod store;
mod types;

pub use resolver::{is_in_cluster_target, CredentialResolver, ResolveError};
pub use store::{KubeSecretStore, SecretStore, StoreError};
pub use types::{ClusterDescriptor, CredentialRecord, RemoteCluster};
