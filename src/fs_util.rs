use std::path::Path;

use tokio::fs;

use crate::error::{CaError, Result};

#[cfg(unix)]
const KEY_FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const KEY_DIR_MODE: u32 = 0o700;

/// Creates the parent directory of `path` if it is missing.
///
/// # Errors
/// Returns `Io` if the directory cannot be created.
pub async fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            CaError::io(format!("Failed to create directory {}", parent.display()), e)
        })?;
    }
    Ok(())
}

/// Creates a directory and any missing ancestors.
///
/// # Errors
/// Returns `Io` if the directory cannot be created.
pub async fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| CaError::io(format!("Failed to create directory {}", path.display()), e))
}

/// Writes a PEM artifact, overwriting any existing file.
///
/// # Errors
/// Returns `Io` if the write fails.
pub async fn write_pem(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)
        .await
        .map_err(|e| CaError::io(format!("Failed to write {}", path.display()), e))
}

/// Writes a private key with restrictive permissions: the parent directory is
/// created mode 0700 and the key file ends up mode 0600 (Unix).
///
/// # Errors
/// Returns `Io` if directories cannot be created, the file cannot be written,
/// or permissions cannot be applied.
pub async fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent).await?;
        #[cfg(unix)]
        set_mode(parent, KEY_DIR_MODE).await?;
    }
    write_pem(path, pem).await?;
    #[cfg(unix)]
    set_mode(path, KEY_FILE_MODE).await?;
    Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| {
            CaError::io(format!("Failed to set permissions on {}", path.display()), e)
        })
}
