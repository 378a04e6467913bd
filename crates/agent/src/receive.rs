//! Owner-side receiver: accept one push on the approved port and store it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::info;

/// Bind `addr`, accept a single connection and write its bytes to
/// `<dir>/<reservation_id>.bin`. Returns the written path and byte count.
pub async fn receive_one(addr: &str, dir: &Path, reservation_id: &str) -> Result<(PathBuf, u64)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    receive_on(listener, dir, reservation_id).await
}

pub async fn receive_on(
    listener: TcpListener,
    dir: &Path,
    reservation_id: &str,
) -> Result<(PathBuf, u64)> {
    let target = stored_path(dir, reservation_id)?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    info!(addr = %listener.local_addr()?, reservation_id, "waiting for transfer");
    let (mut socket, peer) = listener.accept().await.context("accept failed")?;
    info!(%peer, "sender connected");

    let mut file = File::create(&target)
        .await
        .with_context(|| format!("failed to create {}", target.display()))?;
    let received = tokio::io::copy(&mut socket, &mut file)
        .await
        .context("transfer interrupted")?;
    file.flush().await?;

    info!(bytes = received, path = %target.display(), "transfer stored");
    Ok((target, received))
}

fn stored_path(dir: &Path, reservation_id: &str) -> Result<PathBuf> {
    let valid = !reservation_id.is_empty()
        && reservation_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    anyhow::ensure!(valid, "invalid reservation id {reservation_id:?}");
    Ok(dir.join(format!("{reservation_id}.bin")))
}
