//! The persistence contract the core consumes (§6 Store contract).
//!
//! Indexed CRUD on two tables: sessions (pk = monotonic integer) and
//! containers (pk = container id). Implementations must support per-call
//! transactions; no cross-call locking is required — the Pool Manager's
//! single mutex is the only synchronization the core relies on.

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::state::{ContainerRecord, ContainerStatus, SessionRecord};
use async_trait::async_trait;
use std::collections::HashMap;

/// Store contract consumed by the Pool Manager, Session Manager, and
/// Reconciler.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_container(&self, record: ContainerRecord) -> Result<()>;
    async fn update_container(&self, record: ContainerRecord) -> Result<()>;
    async fn get_container(&self, id: &str) -> Result<Option<ContainerRecord>>;
    async fn delete_container(&self, id: &str) -> Result<()>;
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>>;

    /// First container row with `status == Idle`, if any.
    async fn first_idle_container(&self) -> Result<Option<ContainerRecord>>;

    /// Count of container rows grouped by status.
    async fn count_by_status(&self) -> Result<HashMap<ContainerStatus, u32>>;

    /// Allocate the next monotonic session id.
    async fn next_session_id(&self) -> Result<u64>;
    async fn insert_session(&self, record: SessionRecord) -> Result<()>;
    async fn update_session(&self, record: SessionRecord) -> Result<()>;

    /// The row regardless of status (used by `Destroy`, which must be able
    /// to observe an already-Destroyed row to stay idempotent).
    async fn get_session(&self, id: u64) -> Result<Option<SessionRecord>>;

    /// The row only if `status == Active`.
    async fn get_active_session(&self, id: u64) -> Result<Option<SessionRecord>>;

    /// All rows with `status == Active`.
    async fn list_active_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// The Active session referencing `container_id`, if any (Invariant 1
    /// guarantees at most one).
    async fn session_by_container(&self, container_id: &str) -> Result<Option<SessionRecord>>;
}
