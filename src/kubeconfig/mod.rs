// src/kubeconfig/mod.rs
mod ephemeral;
mod types;

pub use ephemeral::KubeconfigWriter;
