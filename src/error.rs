use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaError>;

/// Which on-disk artifact tripped the duplicate-certificate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingArtifact {
    SignedCert,
    PendingCsr,
}

impl ExistingArtifact {
    fn describe(self) -> &'static str {
        match self {
            ExistingArtifact::SignedCert => "signed certificate",
            ExistingArtifact::PendingCsr => "requested certificate",
        }
    }
}

/// Domain errors surfaced by the CA core. Each variant is a distinct error
/// kind so the transport boundary can map it to a status without string
/// matching.
#[derive(Debug, Error)]
pub enum CaError {
    /// Some but not all CA artifacts exist on disk. Initialization refuses to
    /// guess which half is authoritative.
    #[error(
        "Cannot initialize CA: partial CA state on disk (found: {}; missing: {})",
        format_paths(.found),
        format_paths(.missing)
    )]
    PartialState {
        found: Vec<PathBuf>,
        missing: Vec<PathBuf>,
    },

    /// A certificate or CSR already exists for the subject and duplicates are
    /// disallowed.
    #[error("{subject} already has a {}; ignoring certificate request", .artifact.describe())]
    DuplicateCert {
        subject: String,
        artifact: ExistingArtifact,
    },

    /// The submitted CSR bytes are not a parsable PEM/DER PKCS#10 structure.
    #[error("Failed to parse certificate signing request: {0}")]
    MalformedCsr(String),

    /// Key generation, certificate signing, or CRL construction failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Filesystem or process-launch failure. Never retried locally.
    #[error("{0}")]
    Io(String),

    /// The subject contains a path-hostile character (`/`, `\`, or NUL).
    #[error("Invalid certname {0:?}: certnames must not contain '/', '\\', or NUL")]
    InvalidSubject(String),
}

impl CaError {
    /// Wraps an I/O error with the context of what was being touched.
    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        CaError::Io(format!("{context}: {err}"))
    }

    pub fn crypto(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        CaError::Crypto(format!("{context}: {err}"))
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
