use std::path::{Path, PathBuf};

use crate::error::{CaError, Result};

/// Location of the signed certificate for `subject`. The subject is used
/// verbatim, matching the legacy on-disk layout.
#[must_use]
pub fn path_to_cert(signeddir: &Path, subject: &str) -> PathBuf {
    signeddir.join(format!("{subject}.pem"))
}

/// Location of the stashed certificate request for `subject`.
#[must_use]
pub fn path_to_csr(csrdir: &Path, subject: &str) -> PathBuf {
    csrdir.join(format!("{subject}.pem"))
}

/// Rejects subjects that could escape the signed/request directories.
/// Certnames are expected to be lower-case DNS-like labels; anything carrying
/// a path separator or NUL is refused before a path is ever derived from it.
///
/// # Errors
/// Returns `InvalidSubject` if the subject is empty or contains `/`, `\`, or
/// NUL.
pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() || subject.contains(['/', '\\', '\0']) {
        return Err(CaError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}
