//! The surface the transport layer calls: certificate/CSR/CRL retrieval and
//! the CSR admission pipeline (duplicate policy → autosign → sign-or-stash).

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;

use crate::config::CaSettings;
use crate::error::{CaError, ExistingArtifact, Result};
use crate::{autosign, paths, signer};

/// Subject name under which the CA's own certificate is served.
const CA_SUBJECT: &str = "ca";

/// Returns the PEM for `subject`'s signed certificate, or the CA certificate
/// itself when the subject is `"ca"`. `None` when no certificate exists.
///
/// # Errors
/// Returns `Io` for any failure other than the file being absent.
pub async fn get_certificate(
    subject: &str,
    cacert: &Path,
    signeddir: &Path,
) -> Result<Option<String>> {
    if subject == CA_SUBJECT {
        return read_optional(cacert).await;
    }
    read_optional(&paths::path_to_cert(signeddir, subject)).await
}

/// Returns the PEM for `subject`'s pending certificate request, if any.
///
/// # Errors
/// Returns `Io` for any failure other than the file being absent.
pub async fn get_certificate_request(subject: &str, csrdir: &Path) -> Result<Option<String>> {
    read_optional(&paths::path_to_csr(csrdir, subject)).await
}

/// Returns the CA's certificate revocation list PEM.
///
/// # Errors
/// Returns `Io` if the CRL cannot be read; an initialized CA always has one.
pub async fn get_certificate_revocation_list(cacrl: &Path) -> Result<String> {
    fs::read_to_string(cacrl)
        .await
        .map_err(|e| CaError::io(format!("Failed to read CRL {}", cacrl.display()), e))
}

/// Admits one CSR submission: buffers the stream, enforces the duplicate
/// policy, consults the autosign engine, and either signs the request or
/// stashes it for manual signing. Exactly one of the two outcomes happens;
/// the sign path never also stores the CSR.
///
/// # Errors
/// `InvalidSubject`, `DuplicateCert`, `MalformedCsr`, `Io`, or `Crypto`.
/// An autosign denial is not an error; the CSR is stashed and `Ok` returned.
pub async fn process_csr_submission<R>(
    subject: &str,
    mut csr_stream: R,
    settings: &CaSettings,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    paths::validate_subject(subject)?;

    // Buffer once; the autosign engine and the signer both need to read the
    // CSR from the beginning.
    let mut csr_pem = Vec::new();
    csr_stream
        .read_to_end(&mut csr_pem)
        .await
        .map_err(|e| CaError::io(format!("Failed to read CSR stream for {subject}"), e))?;

    validate_duplicate_cert_policy(subject, settings).await?;

    let timeout = settings.autosign_timeout_secs.map(Duration::from_secs);
    let sign = autosign::should_autosign(
        &settings.autosign,
        subject,
        &csr_pem,
        &settings.load_path,
        timeout,
    )
    .await?;

    if sign {
        signer::sign_certificate_request(subject, &csr_pem, settings).await?;
    } else {
        stash_certificate_request(subject, &csr_pem, settings).await?;
    }
    Ok(())
}

/// Enforces the duplicate policy: with duplicates disallowed, an existing
/// signed certificate or pending CSR for the subject rejects the submission.
/// With duplicates allowed, the collision is logged and the new submission
/// proceeds (and will overwrite).
///
/// Runs before any serial allocation or file write.
///
/// # Errors
/// Returns `DuplicateCert` naming the subject and the artifact found.
pub async fn validate_duplicate_cert_policy(subject: &str, settings: &CaSettings) -> Result<()> {
    let cert_path = paths::path_to_cert(&settings.signeddir, subject);
    if fs::try_exists(&cert_path).await.unwrap_or(false) {
        if settings.allow_duplicate_certs {
            info!("{subject} already has a signed certificate; new certificate will overwrite it");
        } else {
            return Err(CaError::DuplicateCert {
                subject: subject.to_string(),
                artifact: ExistingArtifact::SignedCert,
            });
        }
    }

    let csr_path = paths::path_to_csr(&settings.csrdir, subject);
    if fs::try_exists(&csr_path).await.unwrap_or(false) {
        if settings.allow_duplicate_certs {
            info!("{subject} already has a requested certificate; new request will overwrite it");
        } else {
            return Err(CaError::DuplicateCert {
                subject: subject.to_string(),
                artifact: ExistingArtifact::PendingCsr,
            });
        }
    }
    Ok(())
}

/// Writes the buffered CSR verbatim to the request directory, pending manual
/// signing.
async fn stash_certificate_request(
    subject: &str,
    csr_pem: &[u8],
    settings: &CaSettings,
) -> Result<()> {
    let csr_path = paths::path_to_csr(&settings.csrdir, subject);
    fs::write(&csr_path, csr_pem)
        .await
        .map_err(|e| CaError::io(format!("Failed to stash CSR {}", csr_path.display()), e))?;
    info!("Stashed certificate request for {subject} pending signing");
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CaError::io(format!("Failed to read {}", path.display()), e)),
    }
}
