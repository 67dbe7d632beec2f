//! Timeout Sweeper (§4.5): a cooperative periodic task that destroys
//! sessions idle past their configured timeout.

use crate::config::CoreConfig;
use crate::session::SessionManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub struct Sweeper {
    sessions: Arc<SessionManager>,
    config: CoreConfig,
    interval: Duration,
}

impl Sweeper {
    pub fn new(sessions: Arc<SessionManager>, config: CoreConfig) -> Self {
        Self { sessions, config, interval: Duration::from_secs(5) }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until `shutdown` resolves. Errors destroying an individual
    /// session are logged, never halt the sweep.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("sweep pass failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> crate::error::Result<()> {
        let now = Utc::now();
        for session in self.sessions.list().await? {
            if session.is_executing_command {
                continue;
            }
            let timeout = session.effective_timeout(self.config.session_timeout_seconds);
            let idle_seconds = (now - session.last_activity_at).num_seconds().max(0) as u64;
            if idle_seconds > timeout {
                if let Err(e) = self.sessions.destroy(session.id).await {
                    warn!("failed to destroy timed-out session {}: {e}", session.id);
                }
            }
        }
        Ok(())
    }
}
