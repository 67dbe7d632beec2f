//! # CodePod Core
//!
//! A pooled, session-oriented command execution layer over a
//! Docker-compatible container engine. Sessions acquire containers from a
//! warm pool, run shell or argv commands against them with bounded output,
//! and release them back on teardown; a background reconciler keeps the
//! store honest against engine ground truth and a sweeper retires idle
//! sessions.
//!
//! ## Architecture
//!
//! - [`pool`]: owns container lifecycle and the single mutex the rest of
//!   the core relies on for correctness.
//! - [`session`]: session rows layered over pool-owned containers.
//! - [`router`]: the session-facing command surface (exec, upload, list,
//!   download, delete, stats).
//! - [`reconciler`]: startup and on-demand convergence between engine state
//!   and the store.
//! - [`sweeper`]: periodic idle-session teardown.
//! - [`engine`]: the thin typed wrapper over the container engine itself.
//! - [`store`]: the persistence contract, with an in-memory default.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use codepod_core::{Core, CoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let core = Core::connect(CoreConfig::default()).await?;
//!     core.reconcile().await?;
//!     core.ensure_prewarm().await?;
//!
//!     let session = core.sessions().create(None, None, None, None).await?;
//!     let result = core
//!         .router()
//!         .exec_command(session.id, codepod_core::engine::Cmd::Shell("echo hi".into()), None, None)
//!         .await?;
//!     println!("{}", String::from_utf8_lossy(&result.stdout));
//!
//!     core.sessions().destroy(session.id).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod env;
pub mod notify;
pub mod pool;
pub mod reconciler;
pub mod router;
pub mod session;
pub mod state;
pub mod store;
pub mod sweeper;

mod error;
mod truncate;

pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use pool::{PoolManager, PoolStatusCounts};
pub use reconciler::Reconciler;
pub use router::{CommandResult, CommandRouter};
pub use session::SessionManager;
pub use state::{
    ContainerRecord, ContainerStatus, NetworkMode, ResourceLimits, SessionRecord, SessionStatus,
};
pub use store::{MemoryStore, Store};
pub use sweeper::Sweeper;

use std::sync::Arc;

/// The pool-admin status snapshot named in the public API surface:
/// container counts by status plus the number of Active sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreStatus {
    pub max_containers: u32,
    pub idle: u32,
    pub busy: u32,
    pub warming: u32,
    pub destroying: u32,
    pub active_sessions: u32,
}

/// Ties the Pool Manager, Session Manager, Command Router, Reconciler, and
/// Sweeper together behind the default in-memory store and, when the
/// `containers` feature is enabled, the bollard-backed engine adapter.
pub struct Core {
    pool: Arc<PoolManager>,
    sessions: Arc<SessionManager>,
    router: Arc<CommandRouter>,
    reconciler: Arc<Reconciler>,
}

impl Core {
    /// Assemble a `Core` over an already-constructed store and engine. Used
    /// by tests and by callers supplying their own `Store` implementation.
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn engine::EngineAdapter>,
        config: CoreConfig,
    ) -> Self {
        let pool = Arc::new(PoolManager::new(store.clone(), engine.clone(), config.clone()));
        let sessions = Arc::new(SessionManager::new(store.clone(), pool.clone(), config.clone()));
        let router = Arc::new(CommandRouter::new(sessions.clone(), engine.clone(), config.clone()));
        let reconciler = Arc::new(Reconciler::new(store, engine, pool.clone()));
        Self { pool, sessions, router, reconciler }
    }

    /// Connect to the local container engine (Docker, falling back to
    /// rootless then system Podman sockets) and wire up the default
    /// in-memory store.
    #[cfg(feature = "containers")]
    pub async fn connect(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let engine = engine::docker::DockerEngine::connect(
            config.label_prefix.clone(),
            config.windows_container,
        )
        .await?;
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        Ok(Self::new(store, Arc::new(engine), config))
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub async fn ensure_prewarm(&self) -> Result<()> {
        self.pool.ensure_prewarm().await
    }

    pub async fn reconcile(&self) -> Result<()> {
        self.reconciler.reconcile().await
    }

    /// Destroy a single managed container regardless of its current status.
    pub async fn force_delete(&self, container_id: &str) -> Result<()> {
        self.pool.force_delete(container_id).await
    }

    /// Destroy every managed container.
    pub async fn delete_all(&self) -> Result<()> {
        self.pool.delete_all().await
    }

    /// The pool admin status snapshot: container counts by status plus the
    /// number of Active sessions.
    pub async fn status(&self) -> Result<CoreStatus> {
        let counts = self.pool.status_counts().await?;
        let active_sessions = self.sessions.list().await?.len() as u32;
        Ok(CoreStatus {
            max_containers: counts.max_containers,
            idle: counts.idle,
            busy: counts.busy,
            warming: counts.warming,
            destroying: counts.destroying,
            active_sessions,
        })
    }

    /// Manually trigger a sweep pass, destroying any session idle past its
    /// configured timeout. The background `Sweeper` calls the same routine
    /// on its own interval; this is the on-demand admin entry point.
    pub async fn cleanup_expired(&self, config: &CoreConfig) -> Result<()> {
        Sweeper::new(self.sessions.clone(), config.clone())
            .sweep_once()
            .await
    }

    /// Spawn the timeout sweeper as a background task, returning a handle
    /// that stops it when dropped-and-signalled via the returned sender.
    pub fn spawn_sweeper(&self, config: CoreConfig) -> (tokio::task::JoinHandle<()>, tokio::sync::watch::Sender<bool>) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let sweeper = Sweeper::new(self.sessions.clone(), config);
        let handle = tokio::spawn(sweeper.run(rx));
        (handle, tx)
    }
}
