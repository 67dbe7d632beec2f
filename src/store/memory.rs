use super::Store;
use crate::error::Result;
use crate::state::{ContainerRecord, ContainerStatus, SessionRecord, SessionStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory `Store` implementation. The default backing for tests and demos;
/// a real deployment swaps in its own transactional store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: DashMap<String, ContainerRecord>,
    sessions: DashMap<u64, SessionRecord>,
    next_session_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            containers: DashMap::new(),
            sessions: DashMap::new(),
            next_session_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_container(&self, record: ContainerRecord) -> Result<()> {
        self.containers.insert(record.container_id.clone(), record);
        Ok(())
    }

    async fn update_container(&self, record: ContainerRecord) -> Result<()> {
        self.containers.insert(record.container_id.clone(), record);
        Ok(())
    }

    async fn get_container(&self, id: &str) -> Result<Option<ContainerRecord>> {
        Ok(self.containers.get(id).map(|r| r.clone()))
    }

    async fn delete_container(&self, id: &str) -> Result<()> {
        self.containers.remove(id);
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.containers.iter().map(|r| r.clone()).collect())
    }

    async fn first_idle_container(&self) -> Result<Option<ContainerRecord>> {
        Ok(self
            .containers
            .iter()
            .find(|r| r.status == ContainerStatus::Idle)
            .map(|r| r.clone()))
    }

    async fn count_by_status(&self) -> Result<HashMap<ContainerStatus, u32>> {
        let mut counts = HashMap::new();
        for r in self.containers.iter() {
            *counts.entry(r.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn next_session_id(&self) -> Result<u64> {
        Ok(self.next_session_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn insert_session(&self, record: SessionRecord) -> Result<()> {
        self.sessions.insert(record.id, record);
        Ok(())
    }

    async fn update_session(&self, record: SessionRecord) -> Result<()> {
        self.sessions.insert(record.id, record);
        Ok(())
    }

    async fn get_session(&self, id: u64) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.get(&id).map(|r| r.clone()))
    }

    async fn get_active_session(&self, id: u64) -> Result<Option<SessionRecord>> {
        Ok(self
            .sessions
            .get(&id)
            .filter(|r| r.status == SessionStatus::Active)
            .map(|r| r.clone()))
    }

    async fn list_active_sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self
            .sessions
            .iter()
            .filter(|r| r.status == SessionStatus::Active)
            .map(|r| r.clone())
            .collect())
    }

    async fn session_by_container(&self, container_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self
            .sessions
            .iter()
            .find(|r| {
                r.status == SessionStatus::Active
                    && r.container_id.as_deref() == Some(container_id)
            })
            .map(|r| r.clone()))
    }
}
