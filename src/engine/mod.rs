//! Engine Adapter: a thin, typed wrapper over the container engine.
//!
//! Everything the rest of the core knows about the engine goes through
//! [`EngineAdapter`]. This is the only component allowed to catch raw
//! transport/engine exceptions; every other component only ever sees
//! [`crate::error::CoreError`].

#[cfg(feature = "containers")]
pub mod docker;
pub mod shell;

#[cfg(feature = "containers")]
mod archive;

use crate::error::Result;
use crate::state::{ContainerRecord, NetworkMode, ResourceLimits};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;

/// Either a shell string (wrapped per §4.1) or a direct argv invocation.
#[derive(Debug, Clone)]
pub enum Cmd {
    Shell(String),
    Argv(Vec<String>),
}

/// One frame of a streamed exec. Exactly one `Exit` terminates the sequence.
#[derive(Debug, Clone)]
pub enum Event {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit { code: i64, elapsed_ms: u64 },
}

/// Result of a batch (non-streaming) exec.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
    pub elapsed_ms: u64,
}

/// One member of a tar archive pulled from a container path.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
    pub last_modified: DateTime<Utc>,
}

/// One-shot resource usage snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub cpu_total_ns: u64,
    pub memory_bytes: u64,
    pub memory_peak_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
}

/// The engine contract consumed by the Pool Manager, Command Router, and
/// Reconciler (§4.1 / §6 Engine contract).
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Idempotent; pulls if inspect reports the image absent.
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Creates with a long-running keepalive command, applies resource
    /// limits and network mode, starts the container, then ensures the
    /// working directory (and an `artifacts` subdirectory) exist.
    async fn create_container(
        &self,
        image: &str,
        limits: &ResourceLimits,
        network: NetworkMode,
        labels: HashMap<String, String>,
        workdir: &str,
        keepalive_cmd: &[String],
    ) -> Result<ContainerRecord>;

    /// All containers bearing the managed label.
    async fn list_managed(&self) -> Result<Vec<ContainerRecord>>;

    /// `None` on not-found, never an error.
    async fn inspect(&self, id: &str) -> Result<Option<ContainerRecord>>;

    /// Stop (2s grace) then force-remove; swallows not-found.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn exec(
        &self,
        id: &str,
        cmd: &Cmd,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecResult>;

    /// Lazy event sequence; cancelling the consumer closes the underlying
    /// exec stream.
    async fn exec_stream(
        &self,
        id: &str,
        cmd: &Cmd,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<BoxStream<'static, Event>>;

    /// Overwrites the file at `path` with `bytes`.
    async fn upload(&self, id: &str, path: &str, bytes: Vec<u8>) -> Result<()>;

    /// One entry per archive member under `path`; `path` itself is filtered
    /// out.
    async fn list(&self, id: &str, path: &str) -> Result<Vec<Entry>>;

    /// Fails if `path` resolves to a directory only.
    async fn download(&self, id: &str, path: &str) -> Result<Vec<u8>>;

    async fn stats(&self, id: &str) -> Result<Option<Usage>>;
}
