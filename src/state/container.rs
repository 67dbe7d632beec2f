use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Position of a container in the status lattice (§3).
///
/// `Warming` = create-in-flight or start-in-flight. `Idle` = running and
/// unassigned. `Busy` = reserved for a session. `Destroying` = terminal,
/// awaiting removal. Pool cap accounting counts `Warming + Idle + Busy`;
/// `Destroying` is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Warming,
    Idle,
    Busy,
    Destroying,
}

impl ContainerStatus {
    /// Whether this status counts against `MaxContainers`.
    pub fn counts_against_cap(&self) -> bool {
        !matches!(self, ContainerStatus::Destroying)
    }

    /// Never considered settled by the reconciler: their stored status is
    /// always recomputed from engine ground truth.
    pub fn is_unsettled(&self) -> bool {
        matches!(self, ContainerStatus::Warming | ContainerStatus::Destroying)
    }
}

/// A managed container row, keyed by the engine's container id.
///
/// Labels always carry at minimum `{prefix}.managed = "true"` plus the
/// resource/network facts so a fresh store can reconstruct this row purely
/// from engine ground truth (Reconciler adoption path).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContainerRecord {
    pub container_id: String,
    pub name: String,
    pub image: String,
    /// The engine's raw status string, e.g. "running" / "exited".
    pub docker_status: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
}

impl ContainerRecord {
    /// Build the placeholder row inserted at the start of the Warm sequence,
    /// before the engine has returned a real container id.
    pub fn placeholder(synthetic_id: String, image: impl Into<String>) -> Self {
        Self {
            container_id: synthetic_id,
            name: String::new(),
            image: image.into(),
            docker_status: "pending".to_string(),
            status: ContainerStatus::Warming,
            created_at: Utc::now(),
            started_at: None,
            labels: HashMap::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.docker_status == "running"
    }
}
