// Helper functions are shared across multiple test crates; not every helper is
// referenced in each test module.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use puppetca::config::{Autosign, CaSettings, MasterSettings};
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, DnValue, KeyPair};

/// Keylength for tests; large enough for ring's RSA floor, small enough to
/// keep the suite fast.
pub(crate) const TEST_KEYLENGTH: u32 = 2048;
pub(crate) const TEST_CA_TTL: u64 = 157_680_000;
pub(crate) const TEST_CA_NAME: &str = "Puppet CA: test";
pub(crate) const TEST_MASTER_CERTNAME: &str = "master.example.com";

pub(crate) fn ca_settings(root: &Path) -> CaSettings {
    CaSettings {
        autosign: Autosign::Decided(false),
        allow_duplicate_certs: false,
        cacert: root.join("ca/ca_crt.pem"),
        cakey: root.join("ca/ca_key.pem"),
        capub: root.join("ca/ca_pub.pem"),
        cacrl: root.join("ca/ca_crl.pem"),
        ca_name: TEST_CA_NAME.to_string(),
        ca_ttl: TEST_CA_TTL,
        cert_inventory: root.join("ca/inventory.txt"),
        csrdir: root.join("ca/requests"),
        signeddir: root.join("ca/signed"),
        serial: root.join("ca/serial"),
        load_path: Vec::new(),
        autosign_timeout_secs: None,
    }
}

pub(crate) fn master_settings(root: &Path) -> MasterSettings {
    MasterSettings {
        certdir: root.join("certs"),
        requestdir: root.join("certificate_requests"),
        hostcert: root.join("certs").join(format!("{TEST_MASTER_CERTNAME}.pem")),
        hostprivkey: root.join("private_keys").join(format!("{TEST_MASTER_CERTNAME}.pem")),
        hostpubkey: root.join("public_keys").join(format!("{TEST_MASTER_CERTNAME}.pem")),
        localcacert: root.join("certs/ca.pem"),
        dns_alt_names: String::new(),
    }
}

/// Generates a PEM CSR for `subject` with no requested extensions.
pub(crate) fn generate_csr(subject: &str) -> String {
    generate_csr_with_params(subject, Vec::new(), Vec::new())
}

/// Generates a PEM CSR carrying the given custom extensions and DNS SANs in
/// its extensionRequest attribute.
pub(crate) fn generate_csr_with_params(
    subject: &str,
    custom_extensions: Vec<CustomExtension>,
    dns_sans: Vec<String>,
) -> String {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(subject.to_string()));
    params.distinguished_name = dn;
    params.custom_extensions = custom_extensions;
    params.subject_alt_names = dns_sans
        .into_iter()
        .map(|name| {
            rcgen::SanType::DnsName(rcgen::string::Ia5String::try_from(name).expect("dns name"))
        })
        .collect();

    let key = KeyPair::generate().expect("csr key pair");
    params
        .serialize_request(&key)
        .expect("serialize csr")
        .pem()
        .expect("csr pem")
}

/// Writes an executable fixture script, mode 0700.
pub(crate) fn write_executable(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write fixture script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
        .expect("set fixture script permissions");
    path
}

/// Reads a PEM file and returns the DER contents of its first block.
pub(crate) fn read_pem_der(path: &Path) -> Vec<u8> {
    let pem = fs::read(path).expect("read pem file");
    let (_, parsed) = x509_parser::pem::parse_x509_pem(&pem).expect("parse pem");
    parsed.contents
}

pub(crate) fn inventory_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read inventory")
        .lines()
        .map(String::from)
        .collect()
}
