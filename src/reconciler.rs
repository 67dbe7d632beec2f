//! Reconciler (§4.4): diffs engine-managed containers against store rows and
//! converges to Invariant 6 — store rows exactly bijective to
//! engine-managed running containers, with status derived from whether an
//! Active session currently references each one.
//!
//! Runs once at startup after `EnsureImage`, and on demand, under the Pool
//! Manager's single mutex.

use crate::engine::EngineAdapter;
use crate::error::Result;
use crate::pool::PoolManager;
use crate::state::{ContainerRecord, ContainerStatus, SessionStatus};
use crate::store::Store;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Reconciler {
    store: Arc<dyn Store>,
    engine: Arc<dyn EngineAdapter>,
    pool: Arc<PoolManager>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, engine: Arc<dyn EngineAdapter>, pool: Arc<PoolManager>) -> Self {
        Self { store, engine, pool }
    }

    pub async fn reconcile(&self) -> Result<()> {
        let _guard = self.pool.lock().await;

        let managed: HashMap<String, ContainerRecord> = self
            .engine
            .list_managed()
            .await?
            .into_iter()
            .map(|c| (c.container_id.clone(), c))
            .collect();
        let stored: HashMap<String, ContainerRecord> = self
            .store
            .list_containers()
            .await?
            .into_iter()
            .map(|c| (c.container_id.clone(), c))
            .collect();
        let busy_set: HashSet<String> = self
            .store
            .list_active_sessions()
            .await?
            .into_iter()
            .filter_map(|s| s.container_id)
            .collect();

        // 3. store-only rows: their container is simply gone.
        for id in stored.keys() {
            if !managed.contains_key(id) {
                self.orphan_session_for(id).await?;
                self.store.delete_container(id).await?;
            }
        }

        // 4. engine-only containers: adopt if running, otherwise reap.
        for (id, engine_record) in &managed {
            if stored.contains_key(id) {
                continue;
            }
            if engine_record.is_running() {
                let mut row = engine_record.clone();
                row.status = expected_status(id, &busy_set);
                self.store.insert_container(row).await?;
                info!("reconciler adopted unknown running container {id}");
            } else if let Err(e) = self.engine.delete(id).await {
                warn!("failed to delete stopped leftover container {id}: {e}");
            }
        }

        // 5. rows present in both: reap stopped, else recompute status.
        for (id, engine_record) in &managed {
            let Some(stored_record) = stored.get(id) else {
                continue;
            };
            if !engine_record.is_running() {
                self.orphan_session_for(id).await?;
                self.store.delete_container(id).await?;
                let _ = self.engine.delete(id).await;
                continue;
            }
            let expected = expected_status(id, &busy_set);
            if stored_record.status != expected || stored_record.status.is_unsettled() {
                let mut row = engine_record.clone();
                row.status = expected;
                self.store.update_container(row).await?;
            }
        }

        // 6. unsettled rows whose engine container has vanished entirely.
        for (id, stored_record) in &stored {
            if stored_record.status.is_unsettled() && !managed.contains_key(id) {
                self.store.delete_container(id).await?;
            }
        }

        // 7. Active sessions whose container no longer exists in the engine.
        for session in self.store.list_active_sessions().await? {
            let gone = match &session.container_id {
                Some(id) => !managed.contains_key(id),
                None => true,
            };
            if gone {
                let mut s = session.clone();
                s.status = SessionStatus::Destroyed;
                s.container_id = None;
                self.store.update_session(s).await?;
                continue;
            }

            // is_executing cannot have survived a restart; a fresh process
            // holds no in-flight exec for any session it didn't create.
            if session.is_executing_command {
                let mut s = session.clone();
                s.is_executing_command = false;
                self.store.update_session(s).await?;
            }
        }

        Ok(())
    }

    async fn orphan_session_for(&self, container_id: &str) -> Result<()> {
        if let Some(mut session) = self.store.session_by_container(container_id).await? {
            session.status = SessionStatus::Destroyed;
            session.container_id = None;
            self.store.update_session(session).await?;
        }
        Ok(())
    }
}

fn expected_status(container_id: &str, busy_set: &HashSet<String>) -> ContainerStatus {
    if busy_set.contains(container_id) {
        ContainerStatus::Busy
    } else {
        ContainerStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::engine::{Cmd, Entry, Event, ExecResult, Usage};
    use crate::state::{NetworkMode, ResourceLimits, SessionRecord, SessionStatus};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct ScriptedEngine {
        managed: StdMutex<Vec<ContainerRecord>>,
    }

    #[async_trait]
    impl EngineAdapter for ScriptedEngine {
        async fn ensure_image(&self, _image: &str) -> Result<()> {
            Ok(())
        }

        async fn create_container(
            &self,
            _image: &str,
            _limits: &ResourceLimits,
            _network: NetworkMode,
            _labels: std::collections::HashMap<String, String>,
            _workdir: &str,
            _keepalive_cmd: &[String],
        ) -> Result<ContainerRecord> {
            unimplemented!("reconciler tests never create containers")
        }

        async fn list_managed(&self) -> Result<Vec<ContainerRecord>> {
            Ok(self.managed.lock().unwrap().clone())
        }

        async fn inspect(&self, id: &str) -> Result<Option<ContainerRecord>> {
            Ok(self.managed.lock().unwrap().iter().find(|c| c.container_id == id).cloned())
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.managed.lock().unwrap().retain(|c| c.container_id != id);
            Ok(())
        }

        async fn exec(
            &self,
            _id: &str,
            _cmd: &Cmd,
            _cwd: Option<&str>,
            _timeout: Duration,
        ) -> Result<ExecResult> {
            unimplemented!()
        }

        async fn exec_stream(
            &self,
            _id: &str,
            _cmd: &Cmd,
            _cwd: Option<&str>,
            _timeout: Duration,
        ) -> Result<BoxStream<'static, Event>> {
            unimplemented!()
        }

        async fn upload(&self, _id: &str, _path: &str, _bytes: Vec<u8>) -> Result<()> {
            unimplemented!()
        }

        async fn list(&self, _id: &str, _path: &str) -> Result<Vec<Entry>> {
            unimplemented!()
        }

        async fn download(&self, _id: &str, _path: &str) -> Result<Vec<u8>> {
            unimplemented!()
        }

        async fn stats(&self, _id: &str) -> Result<Option<Usage>> {
            unimplemented!()
        }
    }

    fn running(id: &str) -> ContainerRecord {
        ContainerRecord {
            container_id: id.to_string(),
            name: id.to_string(),
            image: "alpine:latest".to_string(),
            docker_status: "running".to_string(),
            status: ContainerStatus::Idle,
            created_at: chrono::Utc::now(),
            started_at: Some(chrono::Utc::now()),
            labels: std::collections::HashMap::new(),
        }
    }

    fn sample_session(id: u64, container_id: &str, is_executing: bool) -> SessionRecord {
        SessionRecord {
            id,
            name: SessionRecord::default_name(id),
            created_at: chrono::Utc::now(),
            last_activity_at: chrono::Utc::now(),
            status: SessionStatus::Active,
            timeout_seconds: None,
            resource_limits: ResourceLimits { memory_bytes: 1, cpu_cores: 1.0, max_processes: 1 },
            network_mode: NetworkMode::None,
            container_id: Some(container_id.to_string()),
            command_count: 0,
            is_executing_command: is_executing,
        }
    }

    fn harness(
        managed: Vec<ContainerRecord>,
    ) -> (Arc<dyn Store>, Arc<ScriptedEngine>, Reconciler) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let engine = Arc::new(ScriptedEngine { managed: StdMutex::new(managed) });
        let pool = Arc::new(PoolManager::new(store.clone(), engine.clone(), CoreConfig::default()));
        let reconciler = Reconciler::new(store.clone(), engine.clone(), pool);
        (store, engine, reconciler)
    }

    #[tokio::test]
    async fn adopts_unknown_running_container_as_idle() {
        let (store, _engine, reconciler) = harness(vec![running("x")]);
        reconciler.reconcile().await.unwrap();

        let row = store.get_container("x").await.unwrap().unwrap();
        assert_eq!(row.status, ContainerStatus::Idle);
    }

    #[tokio::test]
    async fn adopts_as_busy_when_session_references_it() {
        let (store, _engine, reconciler) = harness(vec![running("x")]);
        store.insert_session(sample_session(1, "x", false)).await.unwrap();
        reconciler.reconcile().await.unwrap();

        let row = store.get_container("x").await.unwrap().unwrap();
        assert_eq!(row.status, ContainerStatus::Busy);
    }

    #[tokio::test]
    async fn drops_store_row_whose_container_vanished_and_orphans_session() {
        let (store, _engine, reconciler) = harness(vec![]);
        let mut ghost = running("ghost");
        ghost.status = ContainerStatus::Busy;
        store.insert_container(ghost).await.unwrap();
        store.insert_session(sample_session(1, "ghost", false)).await.unwrap();

        reconciler.reconcile().await.unwrap();

        assert!(store.get_container("ghost").await.unwrap().is_none());
        let session = store.get_session(1).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Destroyed);
    }

    #[tokio::test]
    async fn resets_is_executing_on_live_session() {
        let (store, _engine, reconciler) = harness(vec![running("x")]);
        store.insert_session(sample_session(1, "x", true)).await.unwrap();

        reconciler.reconcile().await.unwrap();

        let session = store.get_session(1).await.unwrap().unwrap();
        assert!(!session.is_executing_command);
        assert_eq!(session.status, SessionStatus::Active);
    }
}
