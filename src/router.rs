//! Command Router (§4.7): the session-facing surface over the engine. Every
//! operation requires an Active session, else fails `SessionNotFound`.

use crate::config::CoreConfig;
use crate::engine::{Cmd, EngineAdapter, Entry, Event, Usage};
use crate::error::{CoreError, Result};
use crate::session::SessionManager;
use crate::truncate;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Result of a batch `ExecCommand`, after truncation.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
    pub elapsed_ms: u64,
    pub is_truncated: bool,
}

pub struct CommandRouter {
    sessions: Arc<SessionManager>,
    engine: Arc<dyn EngineAdapter>,
    config: CoreConfig,
}

impl CommandRouter {
    pub fn new(sessions: Arc<SessionManager>, engine: Arc<dyn EngineAdapter>, config: CoreConfig) -> Self {
        Self { sessions, engine, config }
    }

    async fn container_id_for(&self, session_id: u64) -> Result<String> {
        let session = self.sessions.get(session_id).await?;
        session
            .container_id
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))
    }

    pub async fn exec_command(
        &self,
        session_id: u64,
        cmd: Cmd,
        cwd: Option<&str>,
        timeout_s: Option<u64>,
    ) -> Result<CommandResult> {
        let container_id = self.container_id_for(session_id).await?;
        let cwd = cwd.unwrap_or(&self.config.workdir).to_string();
        let timeout = Duration::from_secs(timeout_s.unwrap_or(self.config.session_timeout_seconds));

        self.sessions.set_executing(session_id, true).await?;
        self.sessions.bump_activity(session_id).await?;
        self.sessions.increment_command_count(session_id).await?;

        let outcome = self
            .engine
            .exec(&container_id, &cmd, Some(&cwd), timeout)
            .await;

        // Cleared even on failure (§4.7).
        self.sessions.set_executing(session_id, false).await?;

        let raw = outcome?;
        let stdout = truncate::truncate(&raw.stdout, &self.config.output_options);
        let stderr = truncate::truncate(&raw.stderr, &self.config.output_options);
        let is_truncated =
            stdout.len() != raw.stdout.len() || stderr.len() != raw.stderr.len();

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code: raw.exit_code,
            elapsed_ms: raw.elapsed_ms,
            is_truncated,
        })
    }

    /// Same bookkeeping as `exec_command`, but the returned sequence is
    /// never truncated. `is_executing` is cleared once the stream's final
    /// `Exit` event has been produced.
    pub async fn exec_command_stream(
        &self,
        session_id: u64,
        cmd: Cmd,
        cwd: Option<&str>,
        timeout_s: Option<u64>,
    ) -> Result<BoxStream<'static, Event>> {
        let container_id = self.container_id_for(session_id).await?;
        let cwd = cwd.unwrap_or(&self.config.workdir).to_string();
        let timeout = Duration::from_secs(timeout_s.unwrap_or(self.config.session_timeout_seconds));

        self.sessions.set_executing(session_id, true).await?;
        self.sessions.bump_activity(session_id).await?;
        self.sessions.increment_command_count(session_id).await?;

        let inner = match self
            .engine
            .exec_stream(&container_id, &cmd, Some(&cwd), timeout)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.sessions.set_executing(session_id, false).await?;
                return Err(e);
            }
        };

        let sessions = self.sessions.clone();
        let stream = inner.then(move |event| {
            let sessions = sessions.clone();
            async move {
                if matches!(event, Event::Exit { .. }) {
                    let _ = sessions.set_executing(session_id, false).await;
                }
                event
            }
        });

        Ok(Box::pin(stream))
    }

    pub async fn upload_file(&self, session_id: u64, path: &str, bytes: Vec<u8>) -> Result<()> {
        let container_id = self.container_id_for(session_id).await?;
        self.engine.upload(&container_id, path, bytes).await?;
        self.sessions.bump_activity(session_id).await?;
        Ok(())
    }

    pub async fn list_directory(&self, session_id: u64, path: &str) -> Result<Vec<Entry>> {
        let container_id = self.container_id_for(session_id).await?;
        let entries = self.engine.list(&container_id, path).await?;
        self.sessions.bump_activity(session_id).await?;
        Ok(entries)
    }

    pub async fn download_file(&self, session_id: u64, path: &str) -> Result<Vec<u8>> {
        let container_id = self.container_id_for(session_id).await?;
        let bytes = self.engine.download(&container_id, path).await?;
        self.sessions.bump_activity(session_id).await?;
        Ok(bytes)
    }

    /// A single `rm -f` (or Windows equivalent) via `Exec`, not an archive
    /// operation.
    pub async fn delete_file(&self, session_id: u64, path: &str) -> Result<()> {
        let container_id = self.container_id_for(session_id).await?;
        let cmd = if self.config.windows_container {
            Cmd::Shell(format!("Remove-Item -Force -ErrorAction SilentlyContinue '{path}'"))
        } else {
            Cmd::Argv(vec!["rm".to_string(), "-f".to_string(), path.to_string()])
        };
        self.engine
            .exec(&container_id, &cmd, None, Duration::from_secs(30))
            .await?;
        self.sessions.bump_activity(session_id).await?;
        Ok(())
    }

    pub async fn get_stats(&self, session_id: u64) -> Result<Option<Usage>> {
        let container_id = self.container_id_for(session_id).await?;
        self.engine.stats(&container_id).await
    }
}
