// src/transfer/service.rs
use serde::Deserialize;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tracing::{info, warn};
use utoipa::IntoParams;

use super::executor::CommandOutput;
use super::staging::StagingLocation;
use super::{StagingArea, TransferError, TransferExecutor};
use crate::cluster::{is_in_cluster_target, ClusterDescriptor, CredentialResolver, ResolveError};

/// Query parameters shared by download and upload.
#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[serde(default, rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct FileRequest {
    /// Namespace of the pod
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// Container name; empty means the pod's default container
    pub container: String,
    /// Path of the file inside the container
    pub path: String,
    /// API server URL of a cluster registered in Argo CD
    pub cluster_url: String,
    /// Name of a cluster registered in Argo CD
    pub cluster_name: String,
}

impl FileRequest {
    /// Checks the required fields and returns the staged file name.
    pub fn validate(&self) -> Result<String, TransferFailure> {
        for (field, value) in [
            ("namespace", &self.namespace),
            ("pod", &self.pod),
            ("path", &self.path),
        ] {
            if value.trim().is_empty() {
                return Err(TransferFailure::InvalidRequest(format!(
                    "missing required parameter '{}'",
                    field
                )));
            }
        }

        Path::new(&self.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferFailure::InvalidRequest(format!(
                    "path '{}' does not name a file",
                    self.path
                ))
            })
    }

    /// `namespace/pod:path`, the in-pod side of `kubectl cp`.
    pub fn pod_ref(&self) -> String {
        format!("{}/{}:{}", self.namespace, self.pod, self.path)
    }

    fn cluster_identifier(&self) -> &str {
        if self.cluster_url.is_empty() {
            &self.cluster_name
        } else {
            &self.cluster_url
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferFailure {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("multi-cluster support is disabled, cannot reach cluster {identifier}")]
    MultiClusterDisabled { identifier: String },

    #[error("failed to get cluster config: {0}")]
    Resolve(#[from] ResolveError),

    #[error("failed to stage file: {0}")]
    Staging(#[source] io::Error),

    #[error("failed to generate kubeconfig: {0}")]
    Kubeconfig(#[source] io::Error),

    #[error("kubectl cp exec error: {0}")]
    Exec(#[source] TransferError),

    #[error("kubectl cp exec error: {}", exit_status(.exit_code))]
    CopyFailed {
        output: String,
        exit_code: Option<i32>,
    },

    /// kubectl exited cleanly but left nothing readable in staging.
    #[error("kubectl cp exec error: no file was copied: {source}")]
    NothingCopied {
        output: String,
        #[source]
        source: io::Error,
    },
}

impl From<TransferError> for TransferFailure {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Kubeconfig(source) => TransferFailure::Kubeconfig(source),
            other => TransferFailure::Exec(other),
        }
    }
}

fn exit_status(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// A copied-out file, read straight from staging.
///
/// The staging directory lives as long as this value, so a response body
/// built from it cleans up once it has been sent or dropped.
#[derive(Debug)]
pub struct DownloadedFile {
    pub file_name: String,
    pub len: u64,
    file: File,
    _location: StagingLocation,
}

impl AsyncRead for DownloadedFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

/// An upload body being written into staging, chunk by chunk.
#[derive(Debug)]
pub struct StagedUpload {
    file: File,
    bytes: u64,
    location: StagingLocation,
}

impl StagedUpload {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), TransferFailure> {
        self.file
            .write_all(chunk)
            .await
            .map_err(TransferFailure::Staging)?;
        self.bytes += chunk.len() as u64;
        Ok(())
    }
}

/// Download and upload flows: resolve credentials, stage, copy, clean up.
pub struct FileTransferService {
    resolver: Option<CredentialResolver>,
    staging: StagingArea,
    executor: TransferExecutor,
}

impl FileTransferService {
    pub fn new(
        resolver: Option<CredentialResolver>,
        staging: StagingArea,
        executor: TransferExecutor,
    ) -> Self {
        Self {
            resolver,
            staging,
            executor,
        }
    }

    pub fn multi_cluster_enabled(&self) -> bool {
        self.resolver.is_some()
    }

    pub async fn resolve(&self, request: &FileRequest) -> Result<ClusterDescriptor, TransferFailure> {
        match &self.resolver {
            Some(resolver) => resolver
                .resolve(&request.cluster_url, &request.cluster_name)
                .await
                .map_err(TransferFailure::from),
            None if is_in_cluster_target(&request.cluster_url, &request.cluster_name) => {
                Ok(ClusterDescriptor::InCluster)
            }
            None => Err(TransferFailure::MultiClusterDisabled {
                identifier: request.cluster_identifier().to_string(),
            }),
        }
    }

    #[tracing::instrument(
        name = "transfer::download",
        skip_all,
        fields(namespace = %request.namespace, pod = %request.pod, path = %request.path)
    )]
    pub async fn download(&self, request: &FileRequest) -> Result<DownloadedFile, TransferFailure> {
        let file_name = request.validate()?;
        let descriptor = self.resolve(request).await?;

        let location = self
            .staging
            .allocate(&file_name)
            .map_err(TransferFailure::Staging)?;
        let destination = location.file().display().to_string();

        let output = self
            .executor
            .run_copy(
                Some(&descriptor),
                &request.pod_ref(),
                &destination,
                &request.container,
            )
            .await?;
        let output = ensure_success(output)?;

        let (file, len) = match open_staged(location.file()).await {
            Ok(opened) => opened,
            Err(source) => {
                warn!("kubectl cp succeeded but no file was staged: {}", source);
                return Err(TransferFailure::NothingCopied {
                    output: output.output,
                    source,
                });
            }
        };
        info!(bytes = len, "downloaded file");

        Ok(DownloadedFile {
            file_name,
            len,
            file,
            _location: location,
        })
    }

    /// Allocates the staging file an upload body is written into.
    pub async fn stage_upload(&self, request: &FileRequest) -> Result<StagedUpload, TransferFailure> {
        let file_name = request.validate()?;
        let location = self
            .staging
            .allocate(&file_name)
            .map_err(TransferFailure::Staging)?;
        let file = File::create(location.file())
            .await
            .map_err(TransferFailure::Staging)?;
        Ok(StagedUpload {
            file,
            bytes: 0,
            location,
        })
    }

    /// Copies a fully received upload into the pod. Credentials are resolved
    /// by the caller, so an unknown cluster is rejected before the body is read.
    #[tracing::instrument(
        name = "transfer::upload",
        skip_all,
        fields(namespace = %request.namespace, pod = %request.pod, path = %request.path)
    )]
    pub async fn upload_staged(
        &self,
        request: &FileRequest,
        descriptor: &ClusterDescriptor,
        staged: StagedUpload,
    ) -> Result<(), TransferFailure> {
        let StagedUpload {
            mut file,
            bytes,
            location,
        } = staged;
        file.flush().await.map_err(TransferFailure::Staging)?;
        drop(file);
        let source = location.file().display().to_string();

        let output = self
            .executor
            .run_copy(
                Some(descriptor),
                &source,
                &request.pod_ref(),
                &request.container,
            )
            .await?;
        ensure_success(output)?;

        info!(bytes, "uploaded file");
        Ok(())
    }
}

async fn open_staged(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    Ok((file, metadata.len()))
}

fn ensure_success(output: CommandOutput) -> Result<CommandOutput, TransferFailure> {
    if output.success {
        return Ok(output);
    }
    warn!(exit_code = ?output.exit_code, "kubectl cp failed");
    Err(TransferFailure::CopyFailed {
        output: output.output,
        exit_code: output.exit_code,
    })
}
