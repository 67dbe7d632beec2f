//! Bollard-backed [`EngineAdapter`] implementation.
//!
//! Grounded on the connection/fallback probe in `container/client.rs`, the
//! create/start/stop/remove and image-ensure calls in
//! `container/orchestrator.rs`, the batch-exec loop in
//! `container/executor.rs`, and the stats read in `container/monitor.rs`.

use super::{Cmd, EngineAdapter, Entry, Event, ExecResult, Usage};
use super::{archive, shell};
use crate::error::{CoreError, Result};
use crate::state::{ContainerRecord, ContainerStatus, NetworkMode, ResourceLimits};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as BollardConfig, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StatsOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerStatsResponse, HostConfig};
use bollard::query_parameters::InspectContainerOptions;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Bollard-backed adapter over a Docker- or Podman-compatible engine.
pub struct DockerEngine {
    docker: Arc<Docker>,
    label_prefix: String,
    windows_container: bool,
}

impl DockerEngine {
    /// Connect using the default discovery strategy.
    pub async fn connect(label_prefix: impl Into<String>, windows_container: bool) -> Result<Self> {
        let docker = connect_docker().await?;
        let engine = Self {
            docker: Arc::new(docker),
            label_prefix: label_prefix.into(),
            windows_container,
        };
        engine
            .docker
            .ping()
            .await
            .map_err(|e| CoreError::EngineUnreachable(e.to_string()))?;
        Ok(engine)
    }

    /// Wrap an already-connected client (used by tests/demos that need to
    /// share a connection).
    pub fn with_docker(docker: Arc<Docker>, label_prefix: impl Into<String>, windows_container: bool) -> Self {
        Self {
            docker,
            label_prefix: label_prefix.into(),
            windows_container,
        }
    }

    fn managed_label(&self) -> String {
        format!("{}.managed", self.label_prefix)
    }
}

async fn connect_docker() -> Result<Docker> {
    debug!("attempting to connect to container runtime");

    if let Ok(docker) = Docker::connect_with_local_defaults() {
        info!("connected to container runtime via local defaults");
        return Ok(docker);
    }

    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            let socket = format!("unix://{home}/run/podman/podman.sock");
            if let Ok(docker) = Docker::connect_with_socket(&socket, 120, bollard::API_DEFAULT_VERSION) {
                info!("connected to podman via rootless socket");
                return Ok(docker);
            }
        }

        let system_socket = "unix:///run/podman/podman.sock";
        if let Ok(docker) =
            Docker::connect_with_socket(system_socket, 120, bollard::API_DEFAULT_VERSION)
        {
            info!("connected to podman via system socket");
            return Ok(docker);
        }
    }

    Err(CoreError::EngineUnreachable(
        "failed to connect to Docker or Podman".to_string(),
    ))
}

fn map_engine_err(op: &str, e: bollard::errors::Error) -> CoreError {
    match e {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
            CoreError::ContainerNotFound(op.to_string())
        }
        other => CoreError::EngineOperationFailed {
            op: op.to_string(),
            cause: other.to_string(),
        },
    }
}

fn summary_to_record(c: bollard::models::ContainerSummary) -> ContainerRecord {
    let labels = c.labels.unwrap_or_default();
    let docker_status = c.state.map(|s| s.to_string()).unwrap_or_default();
    let created_at = c
        .created
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(chrono::Utc::now);
    let status = if docker_status == "running" {
        ContainerStatus::Idle
    } else {
        ContainerStatus::Destroying
    };
    ContainerRecord {
        container_id: c.id.unwrap_or_default(),
        name: c
            .names
            .and_then(|mut n| n.pop())
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image: c.image.unwrap_or_default(),
        docker_status,
        status,
        created_at,
        started_at: None,
        labels,
    }
}

#[async_trait]
impl EngineAdapter for DockerEngine {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
            Err(e) => return Err(map_engine_err("inspect_image", e)),
        }

        info!("pulling image: {}", image);
        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(result) = stream.next().await {
            result.map_err(|e| map_engine_err("pull_image", e))?;
        }
        Ok(())
    }

    async fn create_container(
        &self,
        image: &str,
        limits: &ResourceLimits,
        network: NetworkMode,
        labels: HashMap<String, String>,
        workdir: &str,
        keepalive_cmd: &[String],
    ) -> Result<ContainerRecord> {
        self.ensure_image(image).await?;

        let name = format!("{}-{}", self.label_prefix, uuid::Uuid::new_v4());

        let host_config = HostConfig {
            memory: Some(limits.memory_bytes as i64),
            nano_cpus: Some(limits.nano_cpus()),
            pids_limit: if self.windows_container {
                None
            } else {
                Some(limits.max_processes as i64)
            },
            network_mode: Some(network.as_engine_str().to_string()),
            ..Default::default()
        };

        let bollard_config = BollardConfig {
            image: Some(image.to_string()),
            cmd: Some(keepalive_cmd.to_vec()),
            labels: Some(labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.as_str(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), bollard_config)
            .await
            .map_err(|e| map_engine_err("create_container", e))?;
        let container_id = response.id;

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_engine_err("start_container", e))?;

        let mkdir_cmd = if self.windows_container {
            Cmd::Shell(format!(
                "New-Item -ItemType Directory -Force -Path '{workdir}', '{workdir}/artifacts' | Out-Null"
            ))
        } else {
            Cmd::Argv(vec![
                "mkdir".to_string(),
                "-p".to_string(),
                workdir.to_string(),
                format!("{workdir}/artifacts"),
            ])
        };
        self.exec(&container_id, &mkdir_cmd, None, Duration::from_secs(10))
            .await?;

        let inspect = self
            .docker
            .inspect_container(&container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_engine_err("inspect_container", e))?;
        let state = inspect.state.unwrap_or_default();
        let docker_status = if state.running.unwrap_or(false) {
            "running".to_string()
        } else {
            "created".to_string()
        };
        let started_at = state
            .started_at
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        Ok(ContainerRecord {
            container_id,
            name,
            image: image.to_string(),
            docker_status,
            status: ContainerStatus::Idle,
            created_at: chrono::Utc::now(),
            started_at,
            labels,
        })
    }

    async fn list_managed(&self) -> Result<Vec<ContainerRecord>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", self.managed_label())],
        );

        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| map_engine_err("list_containers", e))?;

        Ok(containers.into_iter().map(summary_to_record).collect())
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerRecord>> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                let state = inspect.state.unwrap_or_default();
                let docker_status = if state.running.unwrap_or(false) {
                    "running".to_string()
                } else {
                    "exited".to_string()
                };
                let status = if state.running.unwrap_or(false) {
                    ContainerStatus::Idle
                } else {
                    ContainerStatus::Destroying
                };
                let labels = inspect
                    .config
                    .and_then(|c| c.labels)
                    .unwrap_or_default();
                Ok(Some(ContainerRecord {
                    container_id: inspect.id.unwrap_or_else(|| id.to_string()),
                    name: inspect.name.unwrap_or_default().trim_start_matches('/').to_string(),
                    image: inspect.image.unwrap_or_default(),
                    docker_status,
                    status,
                    created_at: inspect
                        .created
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(chrono::Utc::now),
                    started_at: state
                        .started_at
                        .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                        .map(|dt| dt.with_timezone(&chrono::Utc)),
                    labels,
                }))
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(None)
            }
            Err(e) => Err(map_engine_err("inspect_container", e)),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if let Err(e) = self
            .docker
            .stop_container(id, Some(StopContainerOptions { t: 2 }))
            .await
        {
            match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {}
                e => warn!("failed to stop container {id} before delete: {e}"),
            }
        }

        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(())
            }
            Err(e) => Err(map_engine_err("remove_container", e)),
        }
    }

    async fn exec(
        &self,
        id: &str,
        cmd: &Cmd,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecResult> {
        let argv = shell::wrap(cmd, self.windows_container);
        let start = Instant::now();

        let exec_options = CreateExecOptions {
            cmd: Some(argv),
            working_dir: cwd.map(|s| s.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| map_engine_err("create_exec", e))?;

        let start_results = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_engine_err("start_exec", e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        if let StartExecResults::Attached { mut output, .. } = start_results {
            let deadline = start + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, output.next()).await {
                    Ok(Some(Ok(LogOutput::StdOut { message }))) => stdout.extend_from_slice(&message),
                    Ok(Some(Ok(LogOutput::StdErr { message }))) => stderr.extend_from_slice(&message),
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        return Err(CoreError::EngineOperationFailed {
                            op: "exec".to_string(),
                            cause: e.to_string(),
                        });
                    }
                    Ok(None) => break,
                    Err(_elapsed) => break,
                }
            }
        }

        let exit_code = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .ok()
            .and_then(|i| i.exit_code)
            .unwrap_or(-1);

        Ok(ExecResult {
            stdout,
            stderr,
            exit_code,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn exec_stream(
        &self,
        id: &str,
        cmd: &Cmd,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<BoxStream<'static, Event>> {
        let argv = shell::wrap(cmd, self.windows_container);

        let exec_options = CreateExecOptions {
            cmd: Some(argv),
            working_dir: cwd.map(|s| s.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| map_engine_err("create_exec", e))?;

        let start_results = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_engine_err("start_exec", e))?;

        let output = match start_results {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(CoreError::EngineOperationFailed {
                    op: "exec_stream".to_string(),
                    cause: "unexpected detached execution".to_string(),
                });
            }
        };

        let docker = self.docker.clone();
        let exec_id = exec.id.clone();
        let start = Instant::now();
        let deadline = start + timeout;

        enum State {
            Streaming {
                inner: std::pin::Pin<
                    Box<dyn futures::Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Send>,
                >,
                docker: Arc<Docker>,
                exec_id: String,
                start: Instant,
                deadline: Instant,
            },
            Done,
        }

        let initial = State::Streaming {
            inner: Box::pin(output),
            docker,
            exec_id,
            start,
            deadline,
        };

        let stream = futures::stream::unfold(initial, |state| async move {
            match state {
                State::Done => None,
                State::Streaming {
                    mut inner,
                    docker,
                    exec_id,
                    start,
                    deadline,
                } => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        return Some((Event::Exit { code: -1, elapsed_ms }, State::Done));
                    }

                    match tokio::time::timeout(remaining, inner.next()).await {
                        Ok(Some(Ok(LogOutput::StdOut { message }))) => Some((
                            Event::Stdout(message.to_vec()),
                            State::Streaming { inner, docker, exec_id, start, deadline },
                        )),
                        Ok(Some(Ok(LogOutput::StdErr { message }))) => Some((
                            Event::Stderr(message.to_vec()),
                            State::Streaming { inner, docker, exec_id, start, deadline },
                        )),
                        Ok(Some(Ok(_))) => Some((
                            Event::Stdout(Vec::new()),
                            State::Streaming { inner, docker, exec_id, start, deadline },
                        )),
                        Ok(Some(Err(_))) | Err(_) => {
                            let elapsed_ms = start.elapsed().as_millis() as u64;
                            Some((Event::Exit { code: -1, elapsed_ms }, State::Done))
                        }
                        Ok(None) => {
                            let elapsed_ms = start.elapsed().as_millis() as u64;
                            let code = docker
                                .inspect_exec(&exec_id)
                                .await
                                .ok()
                                .and_then(|i| i.exit_code)
                                .unwrap_or(-1);
                            Some((Event::Exit { code, elapsed_ms }, State::Done))
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn upload(&self, id: &str, path: &str, bytes: Vec<u8>) -> Result<()> {
        let archive_bytes = archive::build_upload_archive(path, &bytes)?;
        self.docker
            .upload_to_container(
                id,
                Some(UploadToContainerOptions {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                archive_bytes.into(),
            )
            .await
            .map_err(|e| map_engine_err("upload_to_container", e))
    }

    async fn list(&self, id: &str, path: &str) -> Result<Vec<Entry>> {
        let mut stream = self.docker.download_from_container(
            id,
            Some(DownloadFromContainerOptions { path: path.to_string() }),
        );
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.map_err(|e| map_engine_err("download_from_container", e))?);
        }
        archive::parse_archive_entries(bytes, path)
    }

    async fn download(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let mut stream = self.docker.download_from_container(
            id,
            Some(DownloadFromContainerOptions { path: path.to_string() }),
        );
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.map_err(|e| map_engine_err("download_from_container", e))?);
        }
        archive::first_file_bytes(bytes)
    }

    async fn stats(&self, id: &str) -> Result<Option<Usage>> {
        let mut stream = self.docker.stats(id, None::<StatsOptions>);
        match stream.next().await {
            Some(Ok(stats)) => Ok(Some(usage_from_stats(&stats))),
            Some(Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. })) => {
                Ok(None)
            }
            Some(Err(e)) => Err(map_engine_err("stats", e)),
            None => Ok(None),
        }
    }
}

fn usage_from_stats(stats: &ContainerStatsResponse) -> Usage {
    let cpu_total_ns = stats
        .cpu_stats
        .as_ref()
        .and_then(|s| s.cpu_usage.as_ref())
        .and_then(|u| u.total_usage)
        .unwrap_or(0);

    let (memory_bytes, memory_peak_bytes) = stats
        .memory_stats
        .as_ref()
        .map(|m| (m.usage.unwrap_or(0), m.max_usage.unwrap_or(0)))
        .unwrap_or((0, 0));

    let (net_rx_bytes, net_tx_bytes) = stats
        .networks
        .as_ref()
        .map(|nets| {
            nets.values().fold((0u64, 0u64), |(rx, tx), n| {
                (rx + n.rx_bytes.unwrap_or(0), tx + n.tx_bytes.unwrap_or(0))
            })
        })
        .unwrap_or((0, 0));

    Usage {
        cpu_total_ns,
        memory_bytes,
        memory_peak_bytes,
        net_rx_bytes,
        net_tx_bytes,
    }
}
