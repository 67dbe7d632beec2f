//! Session Manager (§4.3): session rows layered over Pool Manager-owned
//! containers. One Active session per container (Invariant 1); destroying a
//! session releases its container back to the pool rather than deleting it.

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::notify::{Notifier, Subscription};
use crate::pool::PoolManager;
use crate::state::{NetworkMode, ResourceLimits, SessionRecord, SessionStatus};
use crate::store::Store;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SessionManager {
    store: Arc<dyn Store>,
    pool: Arc<PoolManager>,
    config: CoreConfig,
    notifier: Notifier,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, pool: Arc<PoolManager>, config: CoreConfig) -> Self {
        let (notifier, _) = Notifier::new();
        Self { store, pool, config, notifier }
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn store_for_test(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Create a new session, acquiring a container from the pool. A caller
    /// supplying no override inherits the system defaults; an override is
    /// validated against `max_resource_limits` before the acquire.
    pub async fn create(
        &self,
        name: Option<String>,
        resource_limits: Option<ResourceLimits>,
        network_mode: Option<NetworkMode>,
        timeout_seconds: Option<u64>,
    ) -> Result<SessionRecord> {
        let limits = resource_limits.unwrap_or(self.config.default_resource_limits);
        limits.validate(&self.config.max_resource_limits)?;

        if let Some(requested) = timeout_seconds {
            if requested > self.config.session_timeout_seconds {
                return Err(CoreError::TimeoutExceedsLimit {
                    requested,
                    max: self.config.session_timeout_seconds,
                });
            }
        }

        let network = network_mode.unwrap_or(self.config.default_network_mode);
        let container = self.pool.acquire(&limits, network).await?;

        let id = self.store.next_session_id().await?;
        let now = chrono::Utc::now();
        let record = SessionRecord {
            id,
            name: name.unwrap_or_else(|| SessionRecord::default_name(id)),
            created_at: now,
            last_activity_at: now,
            status: SessionStatus::Active,
            timeout_seconds,
            resource_limits: limits,
            network_mode: network,
            container_id: Some(container.container_id.clone()),
            command_count: 0,
            is_executing_command: false,
        };
        if let Err(err) = self.store.insert_session(record.clone()).await {
            if let Err(release_err) = self.pool.release(&container.container_id).await {
                warn!(
                    "failed to release container {} after insert failure: {}",
                    container.container_id, release_err
                );
            }
            return Err(err);
        }
        self.notifier.notify();
        info!("session {} created on container {}", id, container.container_id);
        Ok(record)
    }

    pub async fn get(&self, id: u64) -> Result<SessionRecord> {
        self.store
            .get_active_session(id)
            .await?
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<SessionRecord>> {
        self.store.list_active_sessions().await
    }

    /// Mark Destroyed and release the container back to the pool. Idempotent:
    /// destroying an already-Destroyed session is a no-op, not an error.
    pub async fn destroy(&self, id: u64) -> Result<()> {
        let Some(mut record) = self.store.get_session(id).await? else {
            return Err(CoreError::SessionNotFound(id.to_string()));
        };
        if record.status == SessionStatus::Destroyed {
            return Ok(());
        }

        if let Some(container_id) = record.container_id.take() {
            self.pool.release(&container_id).await?;
        }
        record.status = SessionStatus::Destroyed;
        self.store.update_session(record).await?;
        self.notifier.notify();
        info!("session {} destroyed", id);
        Ok(())
    }

    pub async fn bump_activity(&self, id: u64) -> Result<()> {
        let mut record = self.get(id).await?;
        record.bump_activity();
        self.store.update_session(record).await
    }

    pub async fn increment_command_count(&self, id: u64) -> Result<()> {
        let mut record = self.get(id).await?;
        record.command_count += 1;
        self.store.update_session(record).await
    }

    pub async fn set_executing(&self, id: u64, executing: bool) -> Result<()> {
        let mut record = self.get(id).await?;
        record.is_executing_command = executing;
        self.store.update_session(record).await
    }

    /// Called when the Reconciler observes a container has disappeared out
    /// from under an Active session. Marks the session Destroyed without
    /// touching the pool — the container is already gone.
    pub async fn on_container_deleted(&self, container_id: &str) -> Result<()> {
        let Some(mut record) = self.store.session_by_container(container_id).await? else {
            return Ok(());
        };
        record.status = SessionStatus::Destroyed;
        record.container_id = None;
        let id = record.id;
        self.store.update_session(record).await?;
        self.notifier.notify();
        info!("session {} destroyed after its container disappeared", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Cmd, Entry, EngineAdapter, Event, ExecResult, Usage};
    use crate::state::ContainerRecord;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use std::collections::HashMap;
    use std::time::Duration;

    struct ImmediateEngine;

    #[async_trait]
    impl EngineAdapter for ImmediateEngine {
        async fn ensure_image(&self, _image: &str) -> Result<()> {
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
        ) -> Result<ContainerRecord> {
            Ok(ContainerRecord {
                container_id: format!("c-{}", uuid::Uuid::new_v4()),
                name: "session-test".to_string(),
                image: image.to_string(),
                docker_status: "running".to_string(),
                status: crate::state::ContainerStatus::Idle,
                created_at: chrono::Utc::now(),
                started_at: Some(chrono::Utc::now()),
                labels,
            })
        }

        async fn list_managed(&self) -> Result<Vec<ContainerRecord>> {
            Ok(Vec::new())
        }

        async fn inspect(&self, id: &str) -> Result<Option<ContainerRecord>> {
            Ok(Some(ContainerRecord {
                container_id: id.to_string(),
                name: id.to_string(),
                image: "alpine:latest".to_string(),
                docker_status: "running".to_string(),
                status: crate::state::ContainerStatus::Idle,
                created_at: chrono::Utc::now(),
                started_at: Some(chrono::Utc::now()),
                labels: HashMap::new(),
            }))
        }

        async fn delete(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn exec(
            &self,
            _id: &str,
            _cmd: &Cmd,
            _cwd: Option<&str>,
            _timeout: Duration,
        ) -> Result<ExecResult> {
            Ok(ExecResult { stdout: Vec::new(), stderr: Vec::new(), exit_code: 0, elapsed_ms: 1 })
        }

        async fn exec_stream(
            &self,
            _id: &str,
            _cmd: &Cmd,
            _cwd: Option<&str>,
            _timeout: Duration,
        ) -> Result<BoxStream<'static, Event>> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn upload(&self, _id: &str, _path: &str, _bytes: Vec<u8>) -> Result<()> {
            Ok(())
        }

        async fn list(&self, _id: &str, _path: &str) -> Result<Vec<Entry>> {
            Ok(Vec::new())
        }

        async fn download(&self, _id: &str, _path: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn stats(&self, _id: &str) -> Result<Option<Usage>> {
            Ok(Some(Usage::default()))
        }
    }

    fn test_session_manager() -> SessionManager {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pool = Arc::new(PoolManager::new(
            store.clone(),
            Arc::new(ImmediateEngine),
            CoreConfig::default(),
        ));
        SessionManager::new(store, pool, CoreConfig::default())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let manager = test_session_manager();
        let created = manager.create(None, None, None, None).await.unwrap();
        let fetched = manager.get(created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_releases_container() {
        let manager = test_session_manager();
        let created = manager.create(None, None, None, None).await.unwrap();

        manager.destroy(created.id).await.unwrap();
        manager.destroy(created.id).await.unwrap();

        let err = manager.get(created.id).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn timeout_override_exceeding_system_max_is_rejected() {
        let manager = test_session_manager();
        let max = CoreConfig::default().session_timeout_seconds;
        let err = manager
            .create(None, None, None, Some(max + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TimeoutExceedsLimit { .. }));
    }

    #[tokio::test]
    async fn on_container_deleted_destroys_the_owning_session() {
        let manager = test_session_manager();
        let created = manager.create(None, None, None, None).await.unwrap();
        let container_id = created.container_id.clone().unwrap();

        manager.on_container_deleted(&container_id).await.unwrap();

        let err = manager.get(created.id).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
    }
}
