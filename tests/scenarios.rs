//! End-to-end scenarios against the fake engine below, exercising the core
//! the way a real caller would: through `Core`, not individual components.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use codepod_core::config::{OutputOptions, TruncationStrategy};
use codepod_core::engine::{Cmd, EngineAdapter, Entry, Event, ExecResult, Usage};
use codepod_core::state::{ContainerRecord, ContainerStatus, NetworkMode, ResourceLimits};
use codepod_core::store::MemoryStore;
use codepod_core::{Core, CoreConfig, CoreError, Store};

/// A fake engine that tracks created containers and uploaded files in
/// memory, and dispatches a handful of recognizable commands the way a
/// shell would.
struct ScenarioEngine {
    containers: StdMutex<HashMap<String, ContainerRecord>>,
    files: StdMutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    next_id: AtomicU64,
}

impl ScenarioEngine {
    fn new() -> Self {
        Self {
            containers: StdMutex::new(HashMap::new()),
            files: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seed a running container directly into engine ground truth, without
    /// going through `create_container` — used by the reconciler scenario to
    /// simulate a container nobody in this process created.
    fn seed_running(&self, id: &str) {
        let record = ContainerRecord {
            container_id: id.to_string(),
            name: id.to_string(),
            image: "alpine:latest".to_string(),
            docker_status: "running".to_string(),
            status: ContainerStatus::Idle,
            created_at: chrono::Utc::now(),
            started_at: Some(chrono::Utc::now()),
            labels: HashMap::new(),
        };
        self.containers.lock().unwrap().insert(id.to_string(), record);
        self.files.lock().unwrap().insert(id.to_string(), HashMap::new());
    }
}

fn shell_text(cmd: &Cmd) -> String {
    match cmd {
        Cmd::Shell(s) => s.clone(),
        Cmd::Argv(argv) => argv.join(" "),
    }
}

#[async_trait]
impl EngineAdapter for ScenarioEngine {
    async fn ensure_image(&self, _image: &str) -> codepod_core::Result<()> {
        Ok(())
    }

    async fn create_container(
        &self,
        image: &str,
        _limits: &ResourceLimits,
        _network: NetworkMode,
        labels: HashMap<String, String>,
        _workdir: &str,
        _keepalive_cmd: &[String],
    ) -> codepod_core::Result<ContainerRecord> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("scn-{n}");
        let record = ContainerRecord {
            container_id: id.clone(),
            name: format!("scenario-container-{n}"),
            image: image.to_string(),
            docker_status: "running".to_string(),
            status: ContainerStatus::Idle,
            created_at: chrono::Utc::now(),
            started_at: Some(chrono::Utc::now()),
            labels,
        };
        self.containers.lock().unwrap().insert(id.clone(), record.clone());
        self.files.lock().unwrap().insert(id, HashMap::new());
        Ok(record)
    }

    async fn list_managed(&self) -> codepod_core::Result<Vec<ContainerRecord>> {
        Ok(self.containers.lock().unwrap().values().cloned().collect())
    }

    async fn inspect(&self, id: &str) -> codepod_core::Result<Option<ContainerRecord>> {
        Ok(self.containers.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> codepod_core::Result<()> {
        self.containers.lock().unwrap().remove(id);
        self.files.lock().unwrap().remove(id);
        Ok(())
    }

    async fn exec(
        &self,
        _id: &str,
        cmd: &Cmd,
        _cwd: Option<&str>,
        _timeout: Duration,
    ) -> codepod_core::Result<ExecResult> {
        let text = shell_text(cmd);
        if text.contains("nonexistent_command_12345") {
            return Ok(ExecResult {
                stdout: Vec::new(),
                stderr: b"sh: nonexistent_command_12345: command not found\n".to_vec(),
                exit_code: 127,
                elapsed_ms: 1,
            });
        }
        if let Some(rest) = text.strip_prefix("echo ") {
            let echoed = rest.trim_matches(|c| c == '\'' || c == '"');
            let mut stdout = echoed.as_bytes().to_vec();
            stdout.push(b'\n');
            return Ok(ExecResult { stdout, stderr: Vec::new(), exit_code: 0, elapsed_ms: 1 });
        }
        if text.starts_with("yes ") || text.contains("Line i:") {
            let mut stdout = Vec::new();
            for i in 1..=500 {
                stdout.extend_from_slice(format!("Line {i}: padding padding padding\n").as_bytes());
            }
            return Ok(ExecResult { stdout, stderr: Vec::new(), exit_code: 0, elapsed_ms: 1 });
        }
        Ok(ExecResult { stdout: Vec::new(), stderr: Vec::new(), exit_code: 0, elapsed_ms: 1 })
    }

    async fn exec_stream(
        &self,
        _id: &str,
        cmd: &Cmd,
        _cwd: Option<&str>,
        _timeout: Duration,
    ) -> codepod_core::Result<BoxStream<'static, Event>> {
        let text = shell_text(cmd);
        if text.contains("range(1,4)") {
            let events = vec![
                Event::Stdout(b"Line1\n".to_vec()),
                Event::Stdout(b"Line2\n".to_vec()),
                Event::Stdout(b"Line3\n".to_vec()),
                Event::Exit { code: 0, elapsed_ms: 3 },
            ];
            return Ok(Box::pin(futures::stream::iter(events)));
        }
        Ok(Box::pin(futures::stream::iter(vec![Event::Exit { code: 0, elapsed_ms: 1 }])))
    }

    async fn upload(&self, id: &str, path: &str, bytes: Vec<u8>) -> codepod_core::Result<()> {
        self.files
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .insert(path.to_string(), bytes);
        Ok(())
    }

    async fn list(&self, id: &str, path: &str) -> codepod_core::Result<Vec<Entry>> {
        // `EngineAdapter::list` returns names already relative to `path` —
        // the real adapter gets there via `archive::parse_archive_entries`
        // stripping the tar's `{basename}/` prefix; that stripping has its
        // own focused test in `src/engine/archive.rs`, so this fake just
        // implements the trait-level contract directly.
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        let entries = files
            .get(id)
            .into_iter()
            .flat_map(|m| m.iter())
            .filter_map(|(p, bytes)| {
                p.strip_prefix(&prefix).map(|name| Entry {
                    name: name.to_string(),
                    size: bytes.len() as u64,
                    is_directory: false,
                    last_modified: chrono::Utc::now(),
                })
            })
            .collect();
        Ok(entries)
    }

    async fn download(&self, id: &str, path: &str) -> codepod_core::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(id)
            .and_then(|m| m.get(path))
            .cloned()
            .ok_or_else(|| CoreError::ContainerNotFound(format!("{id}:{path}")))
    }

    async fn stats(&self, _id: &str) -> codepod_core::Result<Option<Usage>> {
        Ok(Some(Usage::default()))
    }
}

fn test_config() -> CoreConfig {
    let mut cfg = CoreConfig::default();
    cfg.image = "alpine:latest".to_string();
    cfg.prewarm_count = 0;
    cfg.max_containers = 10;
    cfg
}

fn test_core(config: CoreConfig) -> Core {
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(MemoryStore::new());
    let engine: std::sync::Arc<dyn EngineAdapter> = std::sync::Arc::new(ScenarioEngine::new());
    Core::new(store, engine, config)
}

#[tokio::test]
async fn scenario_1_basic_echo() {
    let core = test_core(test_config());
    let session = core.sessions().create(None, None, None, None).await.unwrap();

    let result = core
        .router()
        .exec_command(session.id, Cmd::Shell("echo 'Hello from CodePod SDK!'".into()), None, None)
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    let stdout = String::from_utf8(result.stdout).unwrap();
    assert!(stdout.contains("Hello from CodePod SDK!"));
}

#[tokio::test]
async fn scenario_2_unknown_command() {
    let core = test_core(test_config());
    let session = core.sessions().create(None, None, None, None).await.unwrap();

    let result = core
        .router()
        .exec_command(session.id, Cmd::Shell("nonexistent_command_12345".into()), None, None)
        .await
        .unwrap();

    assert_ne!(result.exit_code, 0);
    assert!(!result.stderr.is_empty());
}

#[tokio::test]
async fn scenario_3_streaming() {
    let core = test_core(test_config());
    let session = core.sessions().create(None, None, None, None).await.unwrap();

    let argv = vec![
        "python".to_string(),
        "-c".to_string(),
        "for i in range(1,4): print(f'Line{i}')".to_string(),
    ];
    let mut stream = core
        .router()
        .exec_command_stream(session.id, Cmd::Argv(argv), None, None)
        .await
        .unwrap();

    let mut stdout = Vec::new();
    let mut saw_exit = false;
    let mut exit_code = -1;
    while let Some(event) = stream.next().await {
        match event {
            Event::Stdout(bytes) => stdout.extend_from_slice(&bytes),
            Event::Stderr(bytes) => panic!("unexpected stderr frame: {:?}", bytes),
            Event::Exit { code, .. } => {
                saw_exit = true;
                exit_code = code;
            }
        }
    }

    assert!(saw_exit);
    assert_eq!(exit_code, 0);
    let combined = String::from_utf8(stdout).unwrap();
    assert!(combined.contains("Line1"));
    assert!(combined.contains("Line2"));
    assert!(combined.contains("Line3"));
}

#[tokio::test]
async fn scenario_4_file_round_trip() {
    let config = test_config();
    let workdir = config.workdir.clone();
    let core = test_core(config);
    let session = core.sessions().create(None, None, None, None).await.unwrap();
    let path = format!("{workdir}/download.txt");
    let original = "Hello, this is a test file!\n测试中文内容".as_bytes().to_vec();

    core.router().upload_file(session.id, &path, original.clone()).await.unwrap();

    let entries = core.router().list_directory(session.id, &workdir).await.unwrap();
    assert!(entries.iter().any(|e| e.name == "download.txt"));

    let downloaded = core.router().download_file(session.id, &path).await.unwrap();
    assert_eq!(downloaded, original);
}

#[tokio::test]
async fn scenario_5_pool_cap() {
    let mut config = test_config();
    config.max_containers = 3;
    let core = test_core(config);

    let s1 = core.sessions().create(None, None, None, None).await.unwrap();
    core.sessions().create(None, None, None, None).await.unwrap();
    core.sessions().create(None, None, None, None).await.unwrap();

    let err = core.sessions().create(None, None, None, None).await.unwrap_err();
    assert!(matches!(err, CoreError::MaxContainersReached(3)));
    assert_eq!(core.sessions().list().await.unwrap().len(), 3);

    core.sessions().destroy(s1.id).await.unwrap();
    core.sessions().create(None, None, None, None).await.unwrap();
    assert_eq!(core.sessions().list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn scenario_6_timeout_destroys() {
    let mut config = test_config();
    config.session_timeout_seconds = 5;
    let core = test_core(config.clone());

    let session = core
        .sessions()
        .create(None, None, None, Some(2))
        .await
        .unwrap();
    let container_id = session.container_id.clone().unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    core.cleanup_expired(&config).await.unwrap();

    let err = core.sessions().get(session.id).await.unwrap_err();
    assert!(matches!(err, CoreError::SessionNotFound(_)));
    assert!(core.pool().list_all().await.unwrap().iter().all(|c| c.container_id != container_id));
}

#[tokio::test]
async fn scenario_7_truncation_head_and_tail() {
    let mut config = test_config();
    config.output_options = OutputOptions {
        max_output_bytes: 1024,
        strategy: TruncationStrategy::HeadAndTail,
        truncation_message: "\n...[{0} bytes truncated]...\n".to_string(),
    };
    let core = test_core(config);
    let session = core.sessions().create(None, None, None, None).await.unwrap();

    let result = core
        .router()
        .exec_command(session.id, Cmd::Shell("Line i: 500 lines".into()), None, None)
        .await
        .unwrap();

    assert!(result.is_truncated);
    let stdout = String::from_utf8_lossy(&result.stdout).into_owned();
    assert!(stdout.contains("Line 1:"));
    assert!(stdout.contains("Line 500:"));
    assert!(stdout.contains("bytes truncated"));
}

#[tokio::test]
async fn scenario_9_custom_limits_never_reuse_idle_default() {
    let mut config = test_config();
    config.max_containers = 5;
    let core = test_core(config.clone());

    // A default-limits session that gets destroyed leaves no Idle row behind
    // to reuse (release tears the container down completely), but even if it
    // did, a custom-limits acquire must never pick it up.
    let default_session = core.sessions().create(None, None, None, None).await.unwrap();
    core.sessions().destroy(default_session.id).await.unwrap();

    let custom_limits = ResourceLimits {
        memory_bytes: config.default_resource_limits.memory_bytes * 2,
        cpu_cores: config.default_resource_limits.cpu_cores,
        max_processes: config.default_resource_limits.max_processes,
    };
    let custom_session = core
        .sessions()
        .create(None, Some(custom_limits), None, None)
        .await
        .unwrap();

    let container = core
        .pool()
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.container_id == custom_session.container_id.clone().unwrap())
        .unwrap();
    assert_eq!(container.status, ContainerStatus::Busy);
    assert!(container.labels.values().any(|v| v == &custom_limits.memory_bytes.to_string()));
}

#[tokio::test]
async fn scenario_8_reconciler_adoption() {
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(MemoryStore::new());
    let engine = std::sync::Arc::new(ScenarioEngine::new());
    engine.seed_running("x");
    let core = Core::new(store.clone(), engine, test_config());

    core.reconcile().await.unwrap();

    let row = store.get_container("x").await.unwrap().unwrap();
    assert_eq!(row.status, ContainerStatus::Idle);
}
