//! Error taxonomy for the session-and-container orchestrator.
//!
//! Every public operation returns `Result<T, CoreError>`. Only the engine
//! adapter is allowed to catch raw transport/engine exceptions and map them
//! into this taxonomy; every other component propagates what it receives.

/// Core error type shared by every public operation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No Active session with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No managed container with the given id.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// A per-session timeout override exceeds the configured system ceiling.
    #[error("requested timeout {requested}s exceeds system maximum {max}s")]
    TimeoutExceedsLimit { requested: u64, max: u64 },

    /// Caller-supplied argument violates a configured bound.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `Acquire` found no Idle container and the pool is at capacity.
    #[error("max containers reached ({0})")]
    MaxContainersReached(u32),

    /// Could not reach the container engine at all (connect/handshake).
    #[error("engine unreachable: {0}")]
    EngineUnreachable(String),

    /// The engine answered but rejected a specific operation.
    #[error("engine operation '{op}' failed: {cause}")]
    EngineOperationFailed { op: String, cause: String },

    /// Cooperative cancellation propagated from a caller's token.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying store failure (construction detail, not part of the
    /// store's own contract — a `Store` impl maps its own errors here).
    #[error("store error: {0}")]
    StoreError(String),

    /// Filesystem / tar-stream IO failure while building or reading an
    /// archive for upload/download/list.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the core.
pub type Result<T> = std::result::Result<T, CoreError>;
