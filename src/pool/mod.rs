//! Pool Manager (§4.2): owns container lifecycle and the single logical
//! mutex the whole core relies on for correctness (§5). Engine I/O —
//! create/start/inspect/exec — never runs while that mutex is held; it only
//! ever guards the capacity check plus the store mutation that reserves or
//! releases a slot.

mod labels;

use crate::config::CoreConfig;
use crate::engine::{Cmd, EngineAdapter};
use crate::error::{CoreError, Result};
use crate::notify::{Notifier, Subscription};
use crate::state::{ContainerRecord, ContainerStatus, NetworkMode, ResourceLimits};
use crate::store::Store;
use futures::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Aggregate container counts by status, for the admin status snapshot
/// named in the public API surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatusCounts {
    pub max_containers: u32,
    pub idle: u32,
    pub busy: u32,
    pub warming: u32,
    pub destroying: u32,
}

pub struct PoolManager {
    store: Arc<dyn Store>,
    engine: Arc<dyn EngineAdapter>,
    config: CoreConfig,
    /// The one logical mutex referenced throughout §5. Held in an `Arc` so
    /// the fire-and-forget `TryPrewarmOne` background task (spawned by
    /// `acquire`/`release`) synchronizes through the same critical section
    /// rather than one of its own.
    slot_lock: Arc<Mutex<()>>,
    notifier: Notifier,
}

impl PoolManager {
    pub fn new(store: Arc<dyn Store>, engine: Arc<dyn EngineAdapter>, config: CoreConfig) -> Self {
        let (notifier, _) = Notifier::new();
        Self {
            store,
            engine,
            config,
            slot_lock: Arc::new(Mutex::new(())),
            notifier,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    /// Exposes the pool's single logical mutex to the Reconciler, which must
    /// run its diff-and-converge pass under it (§4.4).
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.slot_lock.lock().await
    }

    /// Top up the pool to `prewarm_count`, respecting `max_containers`.
    /// Reserves every needed slot up front under one critical section, then
    /// warms them all concurrently, emitting a single status-changed signal
    /// on completion rather than one per placeholder or per warm.
    pub async fn ensure_prewarm(&self) -> Result<()> {
        let placeholder_ids = self.reserve_prewarm_slots().await?;
        if placeholder_ids.is_empty() {
            return Ok(());
        }

        let warms = placeholder_ids.into_iter().map(|placeholder_id| {
            run_warm_sequence(
                &self.store,
                &self.engine,
                &self.config,
                placeholder_id,
                &self.config.image,
                &self.config.default_resource_limits,
                self.config.default_network_mode,
            )
        });
        let results = future::join_all(warms).await;
        self.notifier.notify();

        for result in results {
            if let Err(e) = result {
                warn!("prewarm attempt failed: {e}");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Compute `to_warm` once against the live count and reserve that many
    /// placeholder rows in one locked pass, without notifying per-row — the
    /// caller emits a single signal once every warm sequence has resolved.
    async fn reserve_prewarm_slots(&self) -> Result<Vec<String>> {
        let _guard = self.slot_lock.lock().await;
        let counts = self.store.count_by_status().await?;
        let total: u32 = counts
            .iter()
            .filter(|(status, _)| status.counts_against_cap())
            .map(|(_, n)| *n)
            .sum();
        let target = self.config.prewarm_count.min(self.config.max_containers);
        let to_warm = target.saturating_sub(total);

        let mut placeholder_ids = Vec::with_capacity(to_warm as usize);
        for _ in 0..to_warm {
            let synthetic_id = format!("pending-{}", uuid::Uuid::new_v4());
            let placeholder = ContainerRecord::placeholder(synthetic_id.clone(), self.config.image.clone());
            self.store.insert_container(placeholder).await?;
            placeholder_ids.push(synthetic_id);
        }
        Ok(placeholder_ids)
    }

    /// Reserve a capacity slot for a new container iff the live total is
    /// below `target` and below `max_containers`. Returns the placeholder's
    /// synthetic id on success.
    async fn reserve_slot_if_under(&self, target: u32) -> Result<Option<String>> {
        reserve_slot_if_under(
            &self.store,
            &self.slot_lock,
            &self.notifier,
            target,
            self.config.max_containers,
            &self.config.image,
        )
        .await
    }

    /// If `(limits, network)` match the configured defaults, reuse the
    /// first Idle container; otherwise (or if none is Idle), warm a fresh
    /// one at the pool's capacity cap. Either way, fires a background
    /// `TryPrewarmOne` on success.
    pub async fn acquire(
        &self,
        limits: &ResourceLimits,
        network: NetworkMode,
    ) -> Result<ContainerRecord> {
        let matches_default = limits.exactly_matches(&self.config.default_resource_limits)
            && network == self.config.default_network_mode;

        if matches_default {
            let _guard = self.slot_lock.lock().await;
            if let Some(mut record) = self.store.first_idle_container().await? {
                record.status = ContainerStatus::Busy;
                self.store.update_container(record.clone()).await?;
                drop(_guard);
                self.notifier.notify();
                self.spawn_try_prewarm_one();
                return Ok(record);
            }
        }

        let synthetic_id = self
            .reserve_slot()
            .await?
            .ok_or(CoreError::MaxContainersReached(self.config.max_containers))?;

        let mut record = self
            .run_warm_sequence(synthetic_id, &self.config.image, limits, network)
            .await?;
        record.status = ContainerStatus::Busy;
        self.store.update_container(record.clone()).await?;
        self.notifier.notify();
        self.spawn_try_prewarm_one();
        Ok(record)
    }

    async fn reserve_slot(&self) -> Result<Option<String>> {
        self.reserve_slot_if_under(self.config.max_containers).await
    }

    /// Manually provision a container outside the pool's prewarm accounting,
    /// still subject to `max_containers`.
    pub async fn create_manual(
        &self,
        image: &str,
        limits: &ResourceLimits,
        network: NetworkMode,
    ) -> Result<ContainerRecord> {
        let synthetic_id = self
            .reserve_slot()
            .await?
            .ok_or(CoreError::MaxContainersReached(self.config.max_containers))?;
        let record = self
            .run_warm_sequence(synthetic_id, image, limits, network)
            .await?;
        self.notifier.notify();
        Ok(record)
    }

    /// Tear a Busy container down entirely: flip to Destroying, delete the
    /// engine container, delete the row. Sessions never reclaim the same
    /// container across `Destroy`/`Create` — a fresh `Acquire` either reuses
    /// a different Idle container or warms a new one.
    pub async fn release(&self, container_id: &str) -> Result<()> {
        {
            let _guard = self.slot_lock.lock().await;
            if let Some(mut record) = self.store.get_container(container_id).await? {
                record.status = ContainerStatus::Destroying;
                self.store.update_container(record.clone()).await?;
            } else {
                return Ok(());
            }
        }
        self.engine.delete(container_id).await?;
        self.store.delete_container(container_id).await?;
        self.notifier.notify();
        self.spawn_try_prewarm_one();
        Ok(())
    }

    /// Fire-and-forget a single additional warm attempt if the pool is
    /// still under `prewarm_count`. Grounded on the source's unawaited
    /// post-acquire/release refill, re-modeled per §9 as an explicit spawn
    /// over cloned handles — sharing this pool's actual `slot_lock` Arc, not
    /// a detached mutex of its own, so the background attempt still
    /// serializes through the one critical section §5 requires.
    fn spawn_try_prewarm_one(&self) {
        let store = self.store.clone();
        let engine = self.engine.clone();
        let config = self.config.clone();
        let slot_lock = self.slot_lock.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let reserved = reserve_slot_if_under(
                &store,
                &slot_lock,
                &notifier,
                config.prewarm_count,
                config.max_containers,
                &config.image,
            )
            .await;
            match reserved {
                Ok(Some(placeholder_id)) => {
                    if let Err(e) = run_warm_sequence(
                        &store,
                        &engine,
                        &config,
                        placeholder_id,
                        &config.image,
                        &config.default_resource_limits,
                        config.default_network_mode,
                    )
                    .await
                    {
                        warn!("background prewarm-one attempt failed: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("background prewarm-one slot check failed: {e}"),
            }
        });
    }

    pub async fn list_all(&self) -> Result<Vec<ContainerRecord>> {
        self.store.list_containers().await
    }

    /// Destroy a single managed container regardless of status, store row
    /// included. Unlike `release`, this never returns the container to Idle.
    pub async fn force_delete(&self, container_id: &str) -> Result<()> {
        let _guard = self.slot_lock.lock().await;
        if let Some(mut record) = self.store.get_container(container_id).await? {
            record.status = ContainerStatus::Destroying;
            self.store.update_container(record).await?;
        }
        drop(_guard);
        self.engine.delete(container_id).await?;
        self.store.delete_container(container_id).await?;
        self.notifier.notify();
        Ok(())
    }

    /// Destroy every managed container, store row included.
    pub async fn delete_all(&self) -> Result<()> {
        for mut record in self.store.list_containers().await? {
            record.status = ContainerStatus::Destroying;
            self.store.update_container(record.clone()).await?;
            self.engine.delete(&record.container_id).await?;
            self.store.delete_container(&record.container_id).await?;
        }
        self.notifier.notify();
        Ok(())
    }

    /// Aggregate counts by status plus the pool's configured cap, for the
    /// admin status snapshot. Active-session count is layered on by `Core`.
    pub async fn status_counts(&self) -> Result<PoolStatusCounts> {
        let counts = self.store.count_by_status().await?;
        let mut snapshot = PoolStatusCounts { max_containers: self.config.max_containers, ..Default::default() };
        for (status, n) in counts {
            match status {
                ContainerStatus::Idle => snapshot.idle = n,
                ContainerStatus::Busy => snapshot.busy = n,
                ContainerStatus::Warming => snapshot.warming = n,
                ContainerStatus::Destroying => snapshot.destroying = n,
            }
        }
        Ok(snapshot)
    }

    /// Create-start-poll-probe. The placeholder row at `synthetic_id` is
    /// always resolved (either replaced by the real row or removed) before
    /// this returns.
    async fn run_warm_sequence(
        &self,
        synthetic_id: String,
        image: &str,
        limits: &ResourceLimits,
        network: NetworkMode,
    ) -> Result<ContainerRecord> {
        run_warm_sequence(&self.store, &self.engine, &self.config, synthetic_id, image, limits, network).await
    }
}

/// Reserve a capacity slot for a new container iff the live total is below
/// `target` and below `max_containers`. Free function so the background
/// `TryPrewarmOne` task can call it over cloned handles without owning a
/// `PoolManager`.
async fn reserve_slot_if_under(
    store: &Arc<dyn Store>,
    slot_lock: &Mutex<()>,
    notifier: &Notifier,
    target: u32,
    max_containers: u32,
    image: &str,
) -> Result<Option<String>> {
    let _guard = slot_lock.lock().await;
    let counts = store.count_by_status().await?;
    let total: u32 = counts
        .iter()
        .filter(|(status, _)| status.counts_against_cap())
        .map(|(_, n)| *n)
        .sum();
    if total >= target || total >= max_containers {
        return Ok(None);
    }
    let synthetic_id = format!("pending-{}", uuid::Uuid::new_v4());
    let placeholder = ContainerRecord::placeholder(synthetic_id.clone(), image.to_string());
    store.insert_container(placeholder).await?;
    drop(_guard);
    notifier.notify();
    Ok(Some(synthetic_id))
}

/// Create-start-poll-probe. The placeholder row at `synthetic_id` is always
/// resolved (either replaced by the real row or removed) before this
/// returns.
async fn run_warm_sequence(
    store: &Arc<dyn Store>,
    engine: &Arc<dyn EngineAdapter>,
    config: &CoreConfig,
    synthetic_id: String,
    image: &str,
    limits: &ResourceLimits,
    network: NetworkMode,
) -> Result<ContainerRecord> {
    let built_labels = labels::build(&config.label_prefix, limits, network);
    let created = engine
        .create_container(image, limits, network, built_labels, &config.workdir, &config.keepalive_cmd())
        .await;

    let mut record = match created {
        Ok(record) => record,
        Err(e) => {
            store.delete_container(&synthetic_id).await.ok();
            return Err(e);
        }
    };

    if let Err(e) = poll_until_running(engine, &mut record).await {
        store.delete_container(&synthetic_id).await.ok();
        let _ = engine.delete(&record.container_id).await;
        return Err(e);
    }

    if let Err(e) = readiness_probe(engine, &record.container_id).await {
        store.delete_container(&synthetic_id).await.ok();
        let _ = engine.delete(&record.container_id).await;
        return Err(e);
    }

    record.status = ContainerStatus::Idle;
    store.delete_container(&synthetic_id).await?;
    store.insert_container(record.clone()).await?;
    info!("container {} warmed and ready", record.container_id);
    Ok(record)
}

async fn poll_until_running(engine: &Arc<dyn EngineAdapter>, record: &mut ContainerRecord) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !record.is_running() {
        if Instant::now() >= deadline {
            return Err(CoreError::EngineOperationFailed {
                op: "warm".to_string(),
                cause: "container did not reach running state within 30s".to_string(),
            });
        }
        sleep(Duration::from_millis(500)).await;
        *record = engine
            .inspect(&record.container_id)
            .await?
            .ok_or_else(|| CoreError::ContainerNotFound(record.container_id.clone()))?;
    }
    Ok(())
}

async fn readiness_probe(engine: &Arc<dyn EngineAdapter>, container_id: &str) -> Result<()> {
    let result = engine
        .exec(container_id, &Cmd::Shell("echo ready".to_string()), None, Duration::from_secs(30))
        .await?;
    if result.exit_code != 0 {
        return Err(CoreError::EngineOperationFailed {
            op: "warm".to_string(),
            cause: format!("readiness probe exited with code {}", result.exit_code),
        });
    }
    Ok(())
}
