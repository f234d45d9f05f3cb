// src/cluster/resolver.rs
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::{ClusterDescriptor, CredentialRecord, RemoteCluster, SecretStore, StoreError};

pub const CLUSTER_SECRET_SELECTOR: &str = "argocd.argoproj.io/secret-type=cluster";
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cluster secret missing 'server' field")]
    MissingServer,

    #[error("cluster secret missing authentication credentials")]
    MissingCredentials,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cluster not found: {identifier}")]
    NotFound { identifier: String },

    #[error("cluster secret {secret} is unusable: {source}")]
    Decode {
        secret: String,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Upstream(#[from] StoreError),
}

/// True when the request targets the cluster this process runs in.
pub fn is_in_cluster_target(cluster_url: &str, cluster_name: &str) -> bool {
    (cluster_url.is_empty() && cluster_name.is_empty())
        || trim_slash(cluster_url) == IN_CLUSTER_SERVER
}

fn trim_slash(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}

/// Finds the credential secret for a cluster and turns it into a descriptor.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn SecretStore>,
    namespace: String,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn SecretStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    #[tracing::instrument(name = "cluster::resolve", level = "debug", skip(self), err(Display))]
    pub async fn resolve(
        &self,
        cluster_url: &str,
        cluster_name: &str,
    ) -> Result<ClusterDescriptor, ResolveError> {
        if is_in_cluster_target(cluster_url, cluster_name) {
            return Ok(ClusterDescriptor::InCluster);
        }

        let records = self
            .store
            .list(&self.namespace, CLUSTER_SECRET_SELECTOR)
            .await?;

        let mut matches = records
            .iter()
            .filter(|record| matches_record(record, cluster_url, cluster_name));

        let Some(record) = matches.next() else {
            let identifier = if cluster_url.is_empty() {
                cluster_name
            } else {
                cluster_url
            };
            return Err(ResolveError::NotFound {
                identifier: identifier.to_string(),
            });
        };

        let others: Vec<&str> = matches.map(|other| other.name.as_str()).collect();
        if !others.is_empty() {
            warn!(
                namespace = %self.namespace,
                chosen = %record.name,
                ignored = ?others,
                "several cluster secrets match, using the first one listed"
            );
        }

        debug!(secret = %record.name, "matched cluster secret");
        decode_record(record)
            .map(ClusterDescriptor::Remote)
            .map_err(|source| ResolveError::Decode {
                secret: record.name.clone(),
                source,
            })
    }
}

fn matches_record(record: &CredentialRecord, cluster_url: &str, cluster_name: &str) -> bool {
    if !cluster_url.is_empty() {
        if let Some(server) = record.field_str("server") {
            if trim_slash(&server) == trim_slash(cluster_url) {
                return true;
            }
        }
    }
    if !cluster_name.is_empty() {
        if let Some(name) = record.field("name") {
            return name == cluster_name.as_bytes();
        }
    }
    false
}

/// Reads the bearer token and CA bundle out of the record.
///
/// The `config` entry is the JSON document Argo CD stores for a cluster
/// (`bearerToken`, `tlsClientConfig.caData`, ...). It is parsed leniently: a
/// document that does not parse, or a CA bundle that is not valid base64,
/// is ignored rather than rejected. Only a missing server or a missing token
/// is fatal.
pub fn decode_record(record: &CredentialRecord) -> Result<RemoteCluster, DecodeError> {
    let server = record
        .field_str("server")
        .filter(|server| !server.is_empty())
        .ok_or(DecodeError::MissingServer)?;

    let embedded = record.field("config").and_then(|raw| parse_embedded(raw, &record.name));

    let bearer_token = embedded
        .as_ref()
        .and_then(|config| config.get("bearerToken"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .or_else(|| record.field_str("token"))
        .filter(|token| !token.is_empty())
        .ok_or(DecodeError::MissingCredentials)?;

    let ca_data = embedded
        .as_ref()
        .and_then(|config| config.get("tlsClientConfig"))
        .and_then(|tls| tls.get("caData"))
        .and_then(Value::as_str)
        .and_then(|encoded| match general_purpose::STANDARD.decode(encoded.trim()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(secret = %record.name, "ignoring undecodable caData: {}", e);
                None
            }
        })
        .filter(|bytes| !bytes.is_empty());

    Ok(RemoteCluster::new(server, bearer_token, ca_data))
}

fn parse_embedded(raw: &[u8], secret: &str) -> Option<Value> {
    // JSON is what Argo CD writes; YAML is accepted for hand-made secrets.
    match serde_json::from_slice::<Value>(raw) {
        Ok(value) => Some(value),
        Err(json_err) => match serde_yaml::from_slice::<Value>(raw) {
            Ok(value) => Some(value),
            Err(_) => {
                debug!(secret, "config entry is not a structured document: {}", json_err);
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeStore {
        records: Vec<CredentialRecord>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeStore {
        fn with(records: Vec<CredentialRecord>) -> Arc<Self> {
            Arc::new(Self {
                records,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                records: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl SecretStore for FakeStore {
        async fn list(
            &self,
            namespace: &str,
            label_selector: &str,
        ) -> Result<Vec<CredentialRecord>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(label_selector, CLUSTER_SECRET_SELECTOR);
            if self.fail {
                return Err(StoreError::List {
                    namespace: namespace.to_string(),
                    source: "forbidden".into(),
                });
            }
            Ok(self.records.clone())
        }
    }

    fn resolver(store: Arc<FakeStore>) -> CredentialResolver {
        CredentialResolver::new(store, "argocd")
    }

    fn remote(descriptor: ClusterDescriptor) -> RemoteCluster {
        match descriptor {
            ClusterDescriptor::Remote(cluster) => cluster,
            ClusterDescriptor::InCluster => panic!("expected a remote cluster"),
        }
    }

    #[tokio::test]
    async fn in_cluster_targets_skip_the_store() {
        let store = FakeStore::failing();
        let resolver = resolver(store.clone());

        for (url, name) in [
            ("", ""),
            ("https://kubernetes.default.svc", ""),
            ("https://kubernetes.default.svc/", "ignored"),
        ] {
            let descriptor = resolver.resolve(url, name).await.unwrap();
            assert_eq!(descriptor, ClusterDescriptor::InCluster);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trailing_slash_is_ignored_when_matching_urls() {
        let store = FakeStore::with(vec![CredentialRecord::new("a")
            .with_field("server", "https://a.example/")
            .with_field("token", "t0k")]);

        let cluster = remote(resolver(store).resolve("https://a.example", "").await.unwrap());
        assert_eq!(trim_slash(cluster.server()), "https://a.example");
        assert_eq!(cluster.bearer_token(), "t0k");
    }

    #[tokio::test]
    async fn matches_by_exact_name() {
        let store = FakeStore::with(vec![
            CredentialRecord::new("a")
                .with_field("server", "https://a.example")
                .with_field("name", "prod")
                .with_field("token", "a"),
            CredentialRecord::new("b")
                .with_field("server", "https://b.example")
                .with_field("name", "staging")
                .with_field("token", "b"),
        ]);
        let resolver = resolver(store);

        let cluster = remote(resolver.resolve("", "staging").await.unwrap());
        assert_eq!(cluster.server(), "https://b.example");

        let err = resolver.resolve("", "Staging").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { ref identifier } if identifier == "Staging"));
    }

    #[tokio::test]
    async fn bearer_token_from_embedded_config() {
        let store = FakeStore::with(vec![CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field("config", r#"{"bearerToken":"abc123","tlsClientConfig":{"insecure":false}}"#)]);

        let cluster = remote(resolver(store).resolve("https://a.example", "").await.unwrap());
        assert_eq!(cluster.bearer_token(), "abc123");
        assert_eq!(cluster.ca_data(), None);
    }

    #[tokio::test]
    async fn embedded_token_wins_over_top_level_token() {
        let store = FakeStore::with(vec![CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field("token", "fallback")
            .with_field("config", r#"{"bearerToken":"embedded"}"#)]);

        let cluster = remote(resolver(store).resolve("https://a.example", "").await.unwrap());
        assert_eq!(cluster.bearer_token(), "embedded");
    }

    #[tokio::test]
    async fn missing_credentials_is_a_decode_error() {
        let store = FakeStore::with(vec![CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field("config", r#"{"tlsClientConfig":{"insecure":true}}"#)]);

        let err = resolver(store).resolve("https://a.example", "").await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Decode {
                source: DecodeError::MissingCredentials,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_server_is_a_decode_error() {
        let store = FakeStore::with(vec![CredentialRecord::new("a")
            .with_field("name", "prod")
            .with_field("token", "t")]);

        let err = resolver(store).resolve("", "prod").await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Decode {
                source: DecodeError::MissingServer,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn store_failure_is_upstream_not_not_found() {
        let err = resolver(FakeStore::failing())
            .resolve("https://a.example", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Upstream(_)));
    }

    #[tokio::test]
    async fn unknown_url_reports_the_url() {
        let store = FakeStore::with(vec![]);
        let err = resolver(store)
            .resolve("https://nowhere.example", "also-nowhere")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cluster not found: https://nowhere.example");
    }

    #[tokio::test]
    async fn first_listed_match_wins() {
        let store = FakeStore::with(vec![
            CredentialRecord::new("first")
                .with_field("server", "https://a.example")
                .with_field("token", "one"),
            CredentialRecord::new("second")
                .with_field("server", "https://a.example/")
                .with_field("token", "two"),
        ]);

        let cluster = remote(resolver(store).resolve("https://a.example/", "").await.unwrap());
        assert_eq!(cluster.bearer_token(), "one");
    }

    #[test]
    fn ca_data_is_base64_decoded() {
        let record = CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field(
                "config",
                r#"{"bearerToken":"t","tlsClientConfig":{"caData":"LS0tQ0EtLS0="}}"#,
            );

        let cluster = decode_record(&record).unwrap();
        assert_eq!(cluster.ca_data(), Some(&b"---CA---"[..]));
    }

    #[test]
    fn malformed_ca_data_is_dropped_not_fatal() {
        let record = CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field(
                "config",
                r#"{"bearerToken":"t","tlsClientConfig":{"caData":"***not base64***"}}"#,
            );

        let cluster = decode_record(&record).unwrap();
        assert_eq!(cluster.bearer_token(), "t");
        assert_eq!(cluster.ca_data(), None);
    }

    #[test]
    fn unparseable_config_falls_back_to_token() {
        let record = CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field("token", "plain")
            .with_field("config", "{not json: [");

        let cluster = decode_record(&record).unwrap();
        assert_eq!(cluster.bearer_token(), "plain");
    }

    #[test]
    fn escaped_quotes_in_token_survive() {
        let record = CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field("config", r#"{"bearerToken":"ab\"cd"}"#);

        assert_eq!(decode_record(&record).unwrap().bearer_token(), "ab\"cd");
    }

    #[test]
    fn yaml_config_is_accepted() {
        let record = CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field("config", "bearerToken: from-yaml\ntlsClientConfig:\n  caData: Q0E=\n");

        let cluster = decode_record(&record).unwrap();
        assert_eq!(cluster.bearer_token(), "from-yaml");
        assert_eq!(cluster.ca_data(), Some(&b"CA"[..]));
    }

    #[test]
    fn empty_token_field_counts_as_missing() {
        let record = CredentialRecord::new("a")
            .with_field("server", "https://a.example")
            .with_field("token", "")
            .with_field("config", r#"{"bearerToken":""}"#);

        assert_eq!(decode_record(&record), Err(DecodeError::MissingCredentials));
    }
}
