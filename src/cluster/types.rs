// src/cluster/types.rs
use std::collections::BTreeMap;
use std::fmt;

/// Resolved connection target for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterDescriptor {
    /// Use the process's own service account.
    InCluster,
    Remote(RemoteCluster),
}

impl ClusterDescriptor {
    pub fn is_in_cluster(&self) -> bool {
        matches!(self, ClusterDescriptor::InCluster)
    }

    pub fn remote(&self) -> Option<&RemoteCluster> {
        match self {
            ClusterDescriptor::InCluster => None,
            ClusterDescriptor::Remote(cluster) => Some(cluster),
        }
    }
}

/// A registered cluster reached with a bearer token.
///
/// Only built by the resolver, which guarantees `server` and `bearer_token`
/// are non-empty. A missing `ca_data` means TLS verification is skipped.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCluster {
    server: String,
    bearer_token: String,
    ca_data: Option<Vec<u8>>,
}

impl RemoteCluster {
    pub(crate) fn new(server: String, bearer_token: String, ca_data: Option<Vec<u8>>) -> Self {
        Self {
            server,
            bearer_token,
            ca_data,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }

    pub fn ca_data(&self) -> Option<&[u8]> {
        self.ca_data.as_deref()
    }
}

impl fmt::Debug for RemoteCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCluster")
            .field("server", &self.server)
            .field("bearer_token", &"<redacted>")
            .field("ca_data", &self.ca_data.as_ref().map(|ca| ca.len()))
            .finish()
    }
}

/// One labeled secret as returned by the store, reduced to its name and data.
#[derive(Clone, Debug, Default)]
pub struct CredentialRecord {
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl CredentialRecord {
    #[cfg(test)]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_field(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    pub fn field_str(&self, key: &str) -> Option<String> {
        self.field(key)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }
}
