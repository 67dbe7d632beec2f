//! Exercises create → exec → upload → download against a real engine.
//! Requires a reachable Docker or Podman socket.

use codepod_core::engine::Cmd;
use codepod_core::{Core, CoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = CoreConfig::default();
    let core = Core::connect(config).await?;

    core.reconcile().await?;
    core.ensure_prewarm().await?;

    let session = core.sessions().create(None, None, None, None).await?;
    println!("created session {}", session.id);

    let result = core
        .router()
        .exec_command(session.id, Cmd::Shell("echo 'Hello from CodePod SDK!'".into()), None, None)
        .await?;
    println!("exit_code={} stdout={}", result.exit_code, String::from_utf8_lossy(&result.stdout));

    core.router()
        .upload_file(session.id, "/workspace/greeting.txt", b"hi from the host\n".to_vec())
        .await?;
    let downloaded = core.router().download_file(session.id, "/workspace/greeting.txt").await?;
    println!("round-tripped {} bytes", downloaded.len());

    core.sessions().destroy(session.id).await?;
    Ok(())
}
