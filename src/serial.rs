//! Serial number allocation.
//!
//! The serial file holds the *next* serial to issue as uppercase hex, at
//! least four digits wide (`0001`, `002F`, `10000`). The format matches the
//! legacy Ruby CA so `puppet cert` and friends can keep parsing it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::fs;

use crate::error::{CaError, Result};

static SERIAL_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    OnceLock::new();

/// Returns the mutex guarding the read-modify-write cycle for one serial
/// file. Keyed by path so a process hosting several CAs stays correct.
fn lock_for(path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let registry = SERIAL_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().expect("serial lock registry poisoned");
    Arc::clone(
        map.entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
    )
}

/// Allocates the next certificate serial from `path`.
///
/// Reads the current value, persists its successor, and returns the value
/// read. At most one read-modify-write is in flight per serial file
/// process-wide. If the process dies after the caller receives a serial but
/// before it lands in a certificate, the same serial can be issued again on
/// the next run; the legacy CA has the same window and external tools
/// tolerate it.
///
/// # Errors
/// Returns `Io` if the file is missing, unparsable, or cannot be rewritten.
pub async fn next_serial(path: &Path) -> Result<u64> {
    let lock = lock_for(path);
    let _guard = lock.lock().await;

    let contents = fs::read_to_string(path)
        .await
        .map_err(|e| CaError::io(format!("Failed to read serial file {}", path.display()), e))?;
    let serial = parse_serial(&contents).ok_or_else(|| {
        CaError::Io(format!(
            "Corrupt serial file {}: {contents:?} is not a hex integer",
            path.display()
        ))
    })?;

    write_serial(path, serial + 1).await?;
    Ok(serial)
}

/// Writes `serial` to `path` via a temp file and rename, so a crashed writer
/// never leaves a torn serial file behind.
pub async fn write_serial(path: &Path, serial: u64) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, format_serial(serial))
        .await
        .map_err(|e| CaError::io(format!("Failed to write serial file {}", tmp.display()), e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| CaError::io(format!("Failed to replace serial file {}", path.display()), e))
}

/// Formats a serial as uppercase hex, zero-padded to four digits and widening
/// naturally beyond that.
#[must_use]
pub fn format_serial(serial: u64) -> String {
    format!("{serial:04X}")
}

/// Parses a serial file body: trimmed, hex, case-insensitive.
#[must_use]
pub fn parse_serial(contents: &str) -> Option<u64> {
    u64::from_str_radix(contents.trim(), 16).ok()
}
