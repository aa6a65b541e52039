// ABOUTME: Container runtime trait and implementations for sandbox execution backends
// ABOUTME: Defines the minimal lifecycle interface the sandbox driver depends on

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Provider not available: {0}")]
    NotAvailable(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Container configuration for one sandbox run
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub env_vars: HashMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub command: Vec<String>,
    pub working_dir: String,
    /// "uid:gid" the payload runs as
    pub user: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

/// Stream output from container logs
pub struct OutputStream {
    pub receiver: tokio::sync::mpsc::UnboundedReceiver<OutputChunk>,
}

impl OutputStream {
    /// Build a stream from chunks that are already known
    pub fn from_chunks(chunks: Vec<OutputChunk>) -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        for chunk in chunks {
            let _ = tx.send(chunk);
        }
        Self { receiver: rx }
    }
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stream: StreamType,
    pub data: Vec<u8>,
}

impl OutputChunk {
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            stream: StreamType::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            stream: StreamType::Stderr,
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

/// Container runtime backing the sandbox driver
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime daemon answers
    async fn is_available(&self) -> Result<bool>;

    /// Use the image if present locally, otherwise pull it
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Follow combined stdout/stderr until the container stops
    async fn stream_logs(&self, container_id: &str) -> Result<OutputStream>;

    /// Block until the container stops and return its exit code
    async fn wait_container(&self, container_id: &str) -> Result<i64>;

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Force-remove a container together with its writable layer and anonymous volumes
    async fn remove_container(&self, container_id: &str) -> Result<()>;
}
