// src/kubeconfig/ephemeral.rs
use base64::{engine::general_purpose, Engine as _};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{
    ClusterConfig, ContextConfig, KubeConfig, NamedCluster, NamedContext, NamedUser, UserConfig,
};
use crate::cluster::{ClusterDescriptor, RemoteCluster};

const CLUSTER_NAME: &str = "target-cluster";
const USER_NAME: &str = "target-user";
const CONTEXT_NAME: &str = "target-context";

/// Builds the single-context kubeconfig document for a remote cluster.
pub fn kubeconfig_for(cluster: &RemoteCluster) -> KubeConfig {
    let (certificate_authority_data, insecure_skip_tls_verify) = match cluster.ca_data() {
        Some(ca) => (Some(general_purpose::STANDARD.encode(ca)), None),
        None => (None, Some(true)),
    };

    KubeConfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: CLUSTER_NAME.to_string(),
            cluster: ClusterConfig {
                server: cluster.server().to_string(),
                certificate_authority_data,
                insecure_skip_tls_verify,
            },
        }],
        contexts: vec![NamedContext {
            name: CONTEXT_NAME.to_string(),
            context: ContextConfig {
                cluster: CLUSTER_NAME.to_string(),
                user: USER_NAME.to_string(),
            },
        }],
        current_context: CONTEXT_NAME.to_string(),
        users: vec![NamedUser {
            name: USER_NAME.to_string(),
            user: UserConfig {
                token: cluster.bearer_token().to_string(),
            },
        }],
    }
}

/// Writes throwaway kubeconfig files into one directory.
#[derive(Clone, Debug)]
pub struct KubeconfigWriter {
    dir: PathBuf,
}

impl Default for KubeconfigWriter {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl KubeconfigWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns `None` for in-cluster targets, which run with the ambient
    /// service account instead of a file.
    pub fn materialize(
        &self,
        descriptor: &ClusterDescriptor,
    ) -> io::Result<Option<EphemeralKubeconfig>> {
        match descriptor.remote() {
            None => Ok(None),
            Some(cluster) => self.write(cluster).map(Some),
        }
    }

    fn write(&self, cluster: &RemoteCluster) -> io::Result<EphemeralKubeconfig> {
        let yaml = serde_yaml::to_string(&kubeconfig_for(cluster))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let path = self
            .dir
            .join(format!("kubeconfig-{}.yaml", Uuid::new_v4()));

        let mut file = owner_only_options().open(&path)?;
        // The guard exists before the first byte is written so a failed
        // write still removes the file.
        let guard = EphemeralKubeconfig { path };
        file.write_all(yaml.as_bytes())?;
        file.sync_all()?;

        debug!(path = %guard.path.display(), server = cluster.server(), "wrote kubeconfig");
        Ok(guard)
    }
}

#[cfg(unix)]
fn owner_only_options() -> OpenOptions {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true).mode(0o600);
    options
}

#[cfg(not(unix))]
fn owner_only_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    options
}

/// A kubeconfig on disk holding a live token. Removed on drop.
#[derive(Debug)]
pub struct EphemeralKubeconfig {
    path: PathBuf,
}

impl EphemeralKubeconfig {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EphemeralKubeconfig {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "failed to remove kubeconfig: {}", e),
        }
    }
}
