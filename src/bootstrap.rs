//! Initialization: verifies the CA is either fully present or fully absent,
//! and mints the CA and master artifacts as needed. A half-provisioned CA is
//! refused outright; a half-provisioned master is simply regenerated, since
//! nothing downstream trusts a master cert that was never distributed.

use std::path::PathBuf;

use rcgen::{
    CertificateParams, CertificateRevocationListParams, DistinguishedName, DnType, DnValue,
    Issuer, KeyIdMethod, SanType, SerialNumber, SigningKey,
};
use tokio::fs;
use tracing::{debug, info};

use crate::config::{CaSettings, MasterSettings};
use crate::error::{CaError, Result};
use crate::fs_util::{create_dir, create_parent_dir, write_pem, write_private_key};
use crate::signer::validity_window;
use crate::{inventory, keys, paths, serial};

/// Ensures CA and master artifacts exist, bootstrapping whichever side is
/// absent.
///
/// # Errors
/// Returns `PartialState` when some but not all CA artifacts exist, or the
/// underlying `Io`/`Crypto` failure of a bootstrap step.
pub async fn initialize(
    ca: &CaSettings,
    master: &MasterSettings,
    master_certname: &str,
    keylength: u32,
) -> Result<()> {
    let (found, missing) = partition_existing(&required_ca_files(ca)).await;
    if missing.is_empty() {
        info!("CA already initialized for SSL");
    } else if found.is_empty() {
        bootstrap_ca(ca, keylength).await?;
    } else {
        return Err(CaError::PartialState { found, missing });
    }

    let (_, master_missing) = partition_existing(&required_master_files(master)).await;
    if master_missing.is_empty() {
        debug!("Master already initialized for SSL");
    } else {
        bootstrap_master(ca, master, master_certname, keylength).await?;
    }
    Ok(())
}

/// Every path-valued CaSettings field. All of these exist on an initialized
/// CA; any strict subset is a `PartialState`.
fn required_ca_files(ca: &CaSettings) -> Vec<PathBuf> {
    vec![
        ca.cacert.clone(),
        ca.cakey.clone(),
        ca.capub.clone(),
        ca.cacrl.clone(),
        ca.cert_inventory.clone(),
        ca.csrdir.clone(),
        ca.signeddir.clone(),
        ca.serial.clone(),
    ]
}

fn required_master_files(master: &MasterSettings) -> Vec<PathBuf> {
    vec![
        master.certdir.clone(),
        master.requestdir.clone(),
        master.hostcert.clone(),
        master.hostprivkey.clone(),
        master.hostpubkey.clone(),
        master.localcacert.clone(),
    ]
}

async fn partition_existing(paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for path in paths {
        if fs::try_exists(path).await.unwrap_or(false) {
            found.push(path.clone());
        } else {
            missing.push(path.clone());
        }
    }
    (found, missing)
}

async fn bootstrap_ca(ca: &CaSettings, keylength: u32) -> Result<()> {
    info!("Initializing CA \"{}\"", ca.ca_name);

    for path in [&ca.cacert, &ca.capub, &ca.cacrl, &ca.cert_inventory, &ca.serial] {
        create_parent_dir(path).await?;
    }
    create_dir(&ca.csrdir).await?;
    create_dir(&ca.signeddir).await?;

    serial::write_serial(&ca.serial, 1).await?;

    let key = keys::generate_keypair(keylength)?;
    let ca_serial = serial::next_serial(&ca.serial).await?;
    let (not_before, not_after) = validity_window(ca.ca_ttl);

    // Self-signed root: subject == issuer, no composed extension set.
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(ca.ca_name.clone()));
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(ca_serial));
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = params
        .self_signed(&key.key_pair)
        .map_err(|e| CaError::crypto("Failed to self-sign CA certificate", e))?;
    let cert_pem = cert.pem();

    let subject_dn = format!("CN={}", ca.ca_name);
    inventory::append_entry(&ca.cert_inventory, ca_serial, not_before, not_after, &subject_dn)
        .await?;
    write_pem(&ca.capub, &key.public_pem).await?;
    write_private_key(&ca.cakey, &key.private_pem).await?;
    write_pem(&ca.cacert, &cert_pem).await?;

    let issuer = Issuer::from_ca_cert_pem(&cert_pem, &key.key_pair)
        .map_err(|e| CaError::crypto("Failed to load CA certificate for issuing", e))?;
    let crl_pem = build_empty_crl(&issuer, ca.ca_ttl)?;
    write_pem(&ca.cacrl, &crl_pem).await?;

    info!("CA certificate written to {}", ca.cacert.display());
    Ok(())
}

async fn bootstrap_master(
    ca: &CaSettings,
    master: &MasterSettings,
    master_certname: &str,
    keylength: u32,
) -> Result<()> {
    info!("Initializing master certificate for {master_certname}");

    create_dir(&master.certdir).await?;
    create_dir(&master.requestdir).await?;
    for path in [&master.hostcert, &master.hostpubkey, &master.localcacert] {
        create_parent_dir(path).await?;
    }

    let key = keys::generate_keypair(keylength)?;
    let master_serial = serial::next_serial(&ca.serial).await?;
    let (not_before, not_after) = validity_window(ca.ca_ttl);

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(master_certname.to_string()),
    );
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(master_serial));
    params.not_before = not_before;
    params.not_after = not_after;

    let alt_names = parse_dns_alt_names(&master.dns_alt_names);
    if !alt_names.is_empty() {
        let mut sans = alt_names;
        sans.push(master_certname.to_string());
        params.subject_alt_names = sans
            .into_iter()
            .map(|name| {
                rcgen::string::Ia5String::try_from(name.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| CaError::crypto(format!("Invalid DNS alt name {name:?}"), e))
            })
            .collect::<Result<Vec<_>>>()?;
    }

    let ca_cert_pem = fs::read_to_string(&ca.cacert).await.map_err(|e| {
        CaError::io(format!("Failed to read CA certificate {}", ca.cacert.display()), e)
    })?;
    let ca_key_pem = fs::read_to_string(&ca.cakey)
        .await
        .map_err(|e| CaError::io(format!("Failed to read CA key {}", ca.cakey.display()), e))?;
    let ca_key = keys::load_keypair(&ca_key_pem)?;
    let issuer = Issuer::from_ca_cert_pem(&ca_cert_pem, &ca_key)
        .map_err(|e| CaError::crypto("Failed to load CA certificate for issuing", e))?;

    let cert = params
        .signed_by(&key.key_pair, &issuer)
        .map_err(|e| CaError::crypto("Failed to sign master certificate", e))?;
    let cert_pem = cert.pem();

    let subject_dn = format!("CN={master_certname}");
    inventory::append_entry(
        &ca.cert_inventory,
        master_serial,
        not_before,
        not_after,
        &subject_dn,
    )
    .await?;
    write_pem(&master.hostpubkey, &key.public_pem).await?;
    write_private_key(&master.hostprivkey, &key.private_pem).await?;
    write_pem(&master.hostcert, &cert_pem).await?;
    write_pem(&paths::path_to_cert(&ca.signeddir, master_certname), &cert_pem).await?;
    write_pem(&master.localcacert, &ca_cert_pem).await?;

    info!("Master certificate written to {}", master.hostcert.display());
    Ok(())
}

/// Splits the comma-separated dns_alt_names setting, trimming each entry and
/// dropping empties.
#[must_use]
pub fn parse_dns_alt_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

fn build_empty_crl<S: SigningKey>(issuer: &Issuer<'_, S>, ca_ttl_secs: u64) -> Result<String> {
    let now = time::OffsetDateTime::now_utc();
    let ttl = time::Duration::seconds(i64::try_from(ca_ttl_secs).unwrap_or(i64::MAX));
    let params = CertificateRevocationListParams {
        this_update: now,
        next_update: now + ttl,
        crl_number: SerialNumber::from(0u64),
        issuing_distribution_point: None,
        revoked_certs: Vec::new(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    let crl = params
        .signed_by(issuer)
        .map_err(|e| CaError::crypto("Failed to build CRL", e))?;
    crl.pem()
        .map_err(|e| CaError::crypto("Failed to encode CRL", e))
}
