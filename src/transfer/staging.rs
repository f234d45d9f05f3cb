// src/transfer/staging.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Shared root under which each request gets its own directory.
#[derive(Clone, Debug)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates `<root>/<uuid>/` and names the file inside after `file_name`.
    pub fn allocate(&self, file_name: &str) -> io::Result<StagingLocation> {
        let dir = self.root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&dir)?;
        Ok(StagingLocation {
            file: dir.join(file_name),
            dir,
        })
    }
}

/// A request-owned staging directory holding one file. Removed on drop.
#[derive(Debug)]
pub struct StagingLocation {
    dir: PathBuf,
    file: PathBuf,
}

impl StagingLocation {
    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl Drop for StagingLocation {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), "failed to remove staging directory: {}", e),
        }
    }
}
