//! The signer: turns an admitted CSR into a signed certificate on disk plus
//! an inventory record.

use std::path::PathBuf;

use rcgen::{
    CertificateSigningRequestParams, DistinguishedName, DnType, DnValue, Issuer, SerialNumber,
};
use time::OffsetDateTime;
use tokio::fs;
use tracing::info;
use x509_parser::pem::parse_x509_pem;

use crate::config::CaSettings;
use crate::error::{CaError, Result};
use crate::serial::format_serial;
use crate::{extensions, inventory, keys, paths, serial};

/// Number of seconds a certificate is back-dated to tolerate mild clock skew
/// between the CA and agents.
const VALIDITY_BACKDATE_SECS: i64 = 24 * 60 * 60;

/// What the signer produced, for callers that want to report on it.
#[derive(Debug)]
pub struct IssuedCertificate {
    pub serial: u64,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub cert_path: PathBuf,
}

/// Computes the validity window for a certificate issued now: one day in the
/// past through `ca_ttl_secs` in the future.
#[must_use]
pub fn validity_window(ca_ttl_secs: u64) -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    let ttl = time::Duration::seconds(i64::try_from(ca_ttl_secs).unwrap_or(i64::MAX));
    (
        now - time::Duration::seconds(VALIDITY_BACKDATE_SECS),
        now + ttl,
    )
}

/// Signs the buffered CSR for `subject` and writes the certificate to the
/// signed directory, overwriting any previous certificate for that subject.
///
/// The issued certificate takes only two things from the CSR: its public key
/// and its Puppet-arc extensions. Subject, validity, serial, and every other
/// extension are dictated by the CA. The inventory record is appended before
/// the PEM is written (legacy order); a crash between the two leaves an
/// orphan audit line, never a cert that escaped the inventory.
///
/// # Errors
/// Returns `MalformedCsr`, `Io`, or `Crypto` depending on the failing step.
/// Nothing is written to the signed directory on failure.
pub async fn sign_certificate_request(
    subject: &str,
    csr_pem: &[u8],
    settings: &CaSettings,
) -> Result<IssuedCertificate> {
    let pem_str = std::str::from_utf8(csr_pem)
        .map_err(|e| CaError::MalformedCsr(format!("CSR is not valid UTF-8 PEM: {e}")))?;
    let (_, pem) = parse_x509_pem(csr_pem)
        .map_err(|e| CaError::MalformedCsr(format!("CSR is not valid PEM: {e}")))?;
    let csr_extensions = extensions::parse_csr_extensions(&pem.contents)?;
    let mut csr_params = CertificateSigningRequestParams::from_pem(pem_str)
        .map_err(|e| CaError::MalformedCsr(e.to_string()))?;

    let (not_before, not_after) = validity_window(settings.ca_ttl);
    let serial = serial::next_serial(&settings.serial).await?;

    let ca_cert_pem = fs::read_to_string(&settings.cacert).await.map_err(|e| {
        CaError::io(
            format!("Failed to read CA certificate {}", settings.cacert.display()),
            e,
        )
    })?;
    let ca_key_pem = fs::read_to_string(&settings.cakey).await.map_err(|e| {
        CaError::io(format!("Failed to read CA key {}", settings.cakey.display()), e)
    })?;
    let ca_key = keys::load_keypair(&ca_key_pem)?;
    let issuer = Issuer::from_ca_cert_pem(&ca_cert_pem, &ca_key)
        .map_err(|e| CaError::crypto("Failed to load CA certificate for issuing", e))?;

    let params = &mut csr_params.params;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(subject.to_string()));
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(serial));
    params.not_before = not_before;
    params.not_after = not_after;
    extensions::apply_issued_extensions(params, &csr_extensions)?;

    let cert = csr_params
        .signed_by(&issuer)
        .map_err(|e| CaError::crypto(format!("Failed to sign certificate for {subject}"), e))?;

    let subject_dn = format!("CN={subject}");
    inventory::append_entry(
        &settings.cert_inventory,
        serial,
        not_before,
        not_after,
        &subject_dn,
    )
    .await?;

    let cert_path = paths::path_to_cert(&settings.signeddir, subject);
    fs::write(&cert_path, cert.pem()).await.map_err(|e| {
        CaError::io(
            format!("Failed to write certificate {}", cert_path.display()),
            e,
        )
    })?;

    info!(
        "Signed certificate request for {subject} (serial 0x{})",
        format_serial(serial)
    );
    Ok(IssuedCertificate {
        serial,
        not_before,
        not_after,
        cert_path,
    })
}
