//! The certificate inventory: an append-only audit log with one line per
//! issued certificate, in the legacy text format. The core never reads it
//! back; external tooling does.

use std::path::Path;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::{CaError, Result};
use crate::serial::format_serial;

// Legacy pattern `YYY-MM-dd'T'HH:mm:ssz` as the reference renders it for a
// UTC clock: four-digit year, ISO-like layout, literal zone abbreviation.
// Every instant the core formats is UTC, so the abbreviation is constant.
const INVENTORY_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]UTC");

/// Renders one inventory line (without trailing newline):
/// `0x{SERIAL} {NOT_BEFORE} {NOT_AFTER} /{SUBJECT_DN}`.
///
/// # Errors
/// Returns `Io` if a timestamp fails to format.
pub fn format_entry(
    serial: u64,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    subject_dn: &str,
) -> Result<String> {
    Ok(format!(
        "0x{} {} {} /{}",
        format_serial(serial),
        format_timestamp(not_before)?,
        format_timestamp(not_after)?,
        subject_dn
    ))
}

fn format_timestamp(instant: OffsetDateTime) -> Result<String> {
    instant
        .to_offset(time::UtcOffset::UTC)
        .format(INVENTORY_DATE_FORMAT)
        .map_err(|e| CaError::Io(format!("Failed to format inventory timestamp: {e}")))
}

/// Appends one record to the inventory file, creating it if absent.
/// Line-buffered append; no fsync.
///
/// # Errors
/// Returns `Io` if the file cannot be opened or written.
pub async fn append_entry(
    path: &Path,
    serial: u64,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    subject_dn: &str,
) -> Result<()> {
    let line = format_entry(serial, not_before, not_after, subject_dn)?;
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .map_err(|e| CaError::io(format!("Failed to open inventory {}", path.display()), e))?;
    file.write_all(format!("{line}\n").as_bytes())
        .await
        .map_err(|e| CaError::io(format!("Failed to append to inventory {}", path.display()), e))
}
