//! Idempotent vhost file installation
//!
//! Files are replaced whole: new content goes to a hidden temporary file in
//! the same directory and is renamed over the target, so the proxy never
//! reads a half-written config.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::VhostOptions;
use crate::error::{Error, Result};

/// `<sites>/<domain>.conf`
pub fn vhost_path(options: &VhostOptions, domain: &str) -> PathBuf {
    options.proxy.sites.join(format!("{}.conf", domain))
}

/// Write `text` to `path` unless it already holds exactly these bytes
///
/// An unreadable existing file counts as different. Missing parent
/// directories are created.
///
/// # Returns
///
/// `true` if the file was written
pub async fn write_if_different(path: &Path, text: &str) -> Result<bool> {
    match fs::read(path).await {
        Ok(existing) if existing == text.as_bytes() => {
            tracing::trace!(path = %path.display(), "Config unchanged");
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::trace!(path = %path.display(), error = %e, "Existing config unreadable");
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }

    let temp_path = temp_path(path);
    {
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::io(&temp_path, e))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| Error::io(&temp_path, e))?;
        file.flush().await.map_err(|e| Error::io(&temp_path, e))?;
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(Error::io(path, e));
    }

    tracing::debug!(path = %path.display(), "Config written");
    Ok(true)
}

/// Delete `path` if it exists
///
/// # Returns
///
/// `true` if a file was removed
pub async fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Config removed");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}
