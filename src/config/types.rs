// config/types.rs
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_ARGOCD_NAMESPACE: &str = "argocd";
pub const DEFAULT_STAGING_DIR: &str = "argocd-extension-pod-files";

#[derive(Clone, Debug, Parser)]
#[command(name = "pod-files", about = "Copy files in and out of pods across registered clusters")]
pub struct ServiceConfig {
    /// Namespace holding the cluster credential secrets
    #[arg(long, env = "ARGOCD_NAMESPACE", default_value = DEFAULT_ARGOCD_NAMESPACE)]
    pub argocd_namespace: String,

    /// Staging directory name, created under the OS temp dir
    #[arg(long, env = "TMP_FILE_PATH", default_value = DEFAULT_STAGING_DIR)]
    pub staging_dir: String,

    #[arg(long, env = "KUBECTL_PATH", default_value = "kubectl")]
    pub kubectl: String,

    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "UI_DIR", default_value = "ui")]
    pub ui_dir: String,

    /// Upper bound for multipart uploads, in MiB
    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 512)]
    pub max_upload_mb: usize,

    #[arg(short, long, env = "DEBUG")]
    pub debug: bool,

    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<String>,
}

impl ServiceConfig {
    /// Root shared by every request's staging directory.
    pub fn staging_root(&self) -> PathBuf {
        // Empty values fall back the same way an unset variable does.
        let name = if self.staging_dir.trim().is_empty() {
            DEFAULT_STAGING_DIR
        } else {
            self.staging_dir.as_str()
        };
        std::env::temp_dir().join(name)
    }

    pub fn argocd_namespace(&self) -> &str {
        if self.argocd_namespace.trim().is_empty() {
            DEFAULT_ARGOCD_NAMESPACE
        } else {
            &self.argocd_namespace
        }
    }

    pub fn ui_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.ui_dir).to_string())
    }

    pub fn log_file(&self) -> Option<String> {
        self.log_file
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(|path| shellexpand::tilde(path).to_string())
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
