// src/transfer/mod.rs
mod executor;
mod service;
mod staging;

pub use executor::{KubectlRunner, TransferError, TransferExecutor};
pub use service::{FileRequest, FileTransferService, StagedUpload, TransferFailure};
pub use staging::StagingArea;

#[cfg(test)]
pub(crate) use service::tests as test_support;
