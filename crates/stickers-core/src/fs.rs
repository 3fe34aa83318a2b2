//! Durable atomic file writes shared by the cache and the artifact writer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `bytes` to `path` so that readers see either the previous file or
/// the complete new one, and the data is on disk when this returns.
pub(crate) async fn write_durable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_path(path);

    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    sync_parent(path).await;
    Ok(())
}

#[cfg(unix)]
async fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) {}
