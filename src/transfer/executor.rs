// src/transfer/executor.rs
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::cluster::ClusterDescriptor;
use crate::kubeconfig::KubeconfigWriter;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to generate kubeconfig: {0}")]
    Kubeconfig(#[source] io::Error),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// What an external command printed and whether it exited cleanly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout followed by stderr
    pub output: String,
    pub success: bool,
    pub exit_code: Option<i32>,
}

/// Runs one external command to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<CommandOutput, TransferError>;
}

/// Runs `kubectl` as a child process.
#[derive(Clone, Debug)]
pub struct KubectlRunner {
    program: String,
}

impl KubectlRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for KubectlRunner {
    async fn run(
        &self,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<CommandOutput, TransferError> {
        let output = Command::new(&self.program)
            .args(args)
            .envs(env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransferError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            output: combined,
            success: output.status.success(),
            exit_code: output.status.code(),
        })
    }
}

/// Builds `kubectl cp` invocations against the selected cluster.
#[derive(Clone)]
pub struct TransferExecutor {
    runner: Arc<dyn CommandRunner>,
    kubeconfigs: KubeconfigWriter,
}

impl TransferExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, kubeconfigs: KubeconfigWriter) -> Self {
        Self {
            runner,
            kubeconfigs,
        }
    }

    /// Copies `source` to `destination`; one side is `namespace/pod:path`.
    ///
    /// A nonzero exit is returned as `Ok` with `success == false` so the
    /// caller still gets the output.
    pub async fn run_copy(
        &self,
        descriptor: Option<&ClusterDescriptor>,
        source: &str,
        destination: &str,
        container: &str,
    ) -> Result<CommandOutput, TransferError> {
        let args = copy_args(source, destination, container);

        // Held until the command returns; dropping it deletes the file.
        let kubeconfig = match descriptor {
            Some(descriptor) => self
                .kubeconfigs
                .materialize(descriptor)
                .map_err(TransferError::Kubeconfig)?,
            None => None,
        };

        let env: Vec<(String, String)> = kubeconfig
            .iter()
            .map(|file| ("KUBECONFIG".to_string(), file.path().display().to_string()))
            .collect();

        debug!(
            ?args,
            in_cluster = descriptor.map_or(true, ClusterDescriptor::is_in_cluster),
            "running kubectl"
        );
        let result = self.runner.run(&args, &env).await;
        drop(kubeconfig);

        if let Ok(output) = &result {
            info!(
                source,
                destination,
                success = output.success,
                exit_code = ?output.exit_code,
                "kubectl cp finished"
            );
        }
        result
    }
}

fn copy_args(source: &str, destination: &str, container: &str) -> Vec<String> {
    let mut args = vec!["cp".to_string(), source.to_string(), destination.to_string()];
    if !container.is_empty() {
        args.push("-c".to_string());
        args.push(container.to_string());
    }
    args
}
