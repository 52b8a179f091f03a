//! Whole-file persistence helpers for the bridge's small state files.

use std::io;
use std::path::Path;

/// Write `contents` to `path`, creating parent directories, and restrict
/// the file to its owner.
pub async fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await?;
    set_file_permissions_0600(path).await
}

/// Read `path`, returning `None` if it does not exist.
pub async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_file_permissions_0600(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
