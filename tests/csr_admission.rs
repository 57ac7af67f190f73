mod support;

use std::fs;

use puppetca::api::{get_certificate, get_certificate_request, process_csr_submission};
use puppetca::bootstrap::initialize;
use puppetca::config::Autosign;
use puppetca::error::CaError;
use support::{
    ca_settings, generate_csr, generate_csr_with_params, inventory_lines, master_settings,
    read_pem_der, TEST_CA_NAME, TEST_KEYLENGTH, TEST_MASTER_CERTNAME,
};
use tempfile::tempdir;
use x509_parser::prelude::*;

const PUPPET_ROLE_OID: &str = "1.3.6.1.4.1.34380.1.2.3";
const SAN_OID: &str = "2.5.29.17";
const NETSCAPE_COMMENT_OID: &str = "2.16.840.1.113730.1.13";

fn find_extension<'a>(cert: &'a X509Certificate<'a>, oid: &str) -> Option<&'a X509Extension<'a>> {
    cert.extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == oid)
}

#[tokio::test]
async fn test_autosigned_submission_yields_composed_certificate() {
    let dir = tempdir().unwrap();
    let mut ca = ca_settings(dir.path());
    let master = master_settings(dir.path());
    initialize(&ca, &master, TEST_MASTER_CERTNAME, TEST_KEYLENGTH)
        .await
        .unwrap();
    ca.autosign = Autosign::Decided(true);

    // The CSR asks for a Puppet-arc extension (which must be carried) and a
    // SAN (which must be dropped).
    let role_value = b"\x16\x07role=db".to_vec();
    let csr = generate_csr_with_params(
        "agent1",
        vec![rcgen::CustomExtension::from_oid_content(
            &[1, 3, 6, 1, 4, 1, 34380, 1, 2, 3],
            role_value.clone(),
        )],
        vec!["agent1.sneaky.example.com".to_string()],
    );

    process_csr_submission("agent1", csr.as_bytes(), &ca)
        .await
        .unwrap();

    let cert_path = ca.signeddir.join("agent1.pem");
    assert!(cert_path.exists());
    assert!(!ca.csrdir.join("agent1.pem").exists());

    let der = read_pem_der(&cert_path);
    let (_, cert) = X509Certificate::from_der(&der).unwrap();
    assert_eq!(
        cert.subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok()),
        Some("agent1")
    );
    assert_eq!(
        cert.issuer()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok()),
        Some(TEST_CA_NAME)
    );
    assert_eq!(cert.serial.to_string(), "3");

    // Base extension set.
    let bc = find_extension(&cert, "2.5.29.19").expect("basic constraints");
    assert!(bc.critical);
    match bc.parsed_extension() {
        ParsedExtension::BasicConstraints(bc) => assert!(!bc.ca),
        other => panic!("unexpected basic constraints parse: {other:?}"),
    }

    let ku = find_extension(&cert, "2.5.29.15").expect("key usage");
    assert!(ku.critical);
    match ku.parsed_extension() {
        ParsedExtension::KeyUsage(ku) => {
            assert!(ku.digital_signature());
            assert!(ku.key_encipherment());
        }
        other => panic!("unexpected key usage parse: {other:?}"),
    }

    let eku = find_extension(&cert, "2.5.29.37").expect("extended key usage");
    match eku.parsed_extension() {
        ParsedExtension::ExtendedKeyUsage(eku) => {
            assert!(eku.server_auth);
            assert!(eku.client_auth);
        }
        other => panic!("unexpected extended key usage parse: {other:?}"),
    }

    assert!(find_extension(&cert, "2.5.29.14").is_some(), "missing SKI");
    assert!(find_extension(&cert, "2.5.29.35").is_some(), "missing AKI");

    let comment = find_extension(&cert, NETSCAPE_COMMENT_OID).expect("netscape comment");
    assert!(!comment.critical);
    let text = String::from_utf8_lossy(comment.value);
    assert!(text.ends_with("Puppet JVM Internal Certificate"));

    // Puppet-arc extension carried through verbatim; CSR SAN dropped.
    let role = find_extension(&cert, PUPPET_ROLE_OID).expect("puppet arc extension");
    assert_eq!(role.value, role_value.as_slice());
    assert!(find_extension(&cert, SAN_OID).is_none());

    // Audit trail: CA, master, then agent1.
    let lines = inventory_lines(&ca.cert_inventory);
    assert_eq!(lines.len(), 3);
    assert!(lines[2].starts_with("0x0003 "));
    assert!(lines[2].ends_with("/CN=agent1"));

    let fetched = get_certificate("agent1", &ca.cacert, &ca.signeddir)
        .await
        .unwrap();
    assert_eq!(fetched, Some(fs::read_to_string(&cert_path).unwrap()));
}

#[tokio::test]
async fn test_denied_submission_is_stashed_verbatim() {
    let dir = tempdir().unwrap();
    let ca = ca_settings(dir.path());
    fs::create_dir_all(&ca.csrdir).unwrap();
    fs::create_dir_all(&ca.signeddir).unwrap();

    let csr = generate_csr("agent2");
    process_csr_submission("agent2", csr.as_bytes(), &ca)
        .await
        .unwrap();

    assert!(!ca.signeddir.join("agent2.pem").exists());
    assert_eq!(
        fs::read_to_string(ca.csrdir.join("agent2.pem")).unwrap(),
        csr
    );

    let pending = get_certificate_request("agent2", &ca.csrdir).await.unwrap();
    assert_eq!(pending, Some(csr));
    let cert = get_certificate("agent2", &ca.cacert, &ca.signeddir)
        .await
        .unwrap();
    assert!(cert.is_none());
}

#[tokio::test]
async fn test_whitelist_governs_admission() {
    let dir = tempdir().unwrap();
    let mut ca = ca_settings(dir.path());
    let master = master_settings(dir.path());
    initialize(&ca, &master, TEST_MASTER_CERTNAME, TEST_KEYLENGTH)
        .await
        .unwrap();

    let whitelist = dir.path().join("autosign.conf");
    fs::write(&whitelist, "# comment\n*.example.com\nexact.host\n").unwrap();
    ca.autosign = Autosign::Source(whitelist);

    for subject in ["a.example.com", "exact.host"] {
        let csr = generate_csr(subject);
        process_csr_submission(subject, csr.as_bytes(), &ca)
            .await
            .unwrap();
        assert!(
            ca.signeddir.join(format!("{subject}.pem")).exists(),
            "{subject} should have been signed"
        );
        assert!(!ca.csrdir.join(format!("{subject}.pem")).exists());
    }

    let csr = generate_csr("other.net");
    process_csr_submission("other.net", csr.as_bytes(), &ca)
        .await
        .unwrap();
    assert!(!ca.signeddir.join("other.net.pem").exists());
    assert!(ca.csrdir.join("other.net.pem").exists());
}

#[tokio::test]
async fn test_duplicate_cert_is_refused_then_overwritten_when_allowed() {
    let dir = tempdir().unwrap();
    let mut ca = ca_settings(dir.path());
    let master = master_settings(dir.path());
    initialize(&ca, &master, TEST_MASTER_CERTNAME, TEST_KEYLENGTH)
        .await
        .unwrap();
    ca.autosign = Autosign::Decided(true);

    let csr = generate_csr("foo");
    process_csr_submission("foo", csr.as_bytes(), &ca)
        .await
        .unwrap();
    let first_cert = fs::read(ca.signeddir.join("foo.pem")).unwrap();
    let lines_before = inventory_lines(&ca.cert_inventory);

    let err = process_csr_submission("foo", csr.as_bytes(), &ca)
        .await
        .unwrap_err();
    match err {
        CaError::DuplicateCert { subject, .. } => assert_eq!(subject, "foo"),
        other => panic!("expected DuplicateCert, got {other:?}"),
    }
    assert_eq!(fs::read(ca.signeddir.join("foo.pem")).unwrap(), first_cert);
    assert_eq!(inventory_lines(&ca.cert_inventory), lines_before);

    ca.allow_duplicate_certs = true;
    process_csr_submission("foo", csr.as_bytes(), &ca)
        .await
        .unwrap();
    let second_cert = fs::read(ca.signeddir.join("foo.pem")).unwrap();
    assert_ne!(second_cert, first_cert);
    assert_eq!(
        inventory_lines(&ca.cert_inventory).len(),
        lines_before.len() + 1
    );
}

#[tokio::test]
async fn test_pending_csr_trips_duplicate_policy() {
    let dir = tempdir().unwrap();
    let ca = ca_settings(dir.path());
    fs::create_dir_all(&ca.csrdir).unwrap();
    fs::create_dir_all(&ca.signeddir).unwrap();
    fs::write(ca.csrdir.join("bar.pem"), "earlier request").unwrap();

    let csr = generate_csr("bar");
    let err = process_csr_submission("bar", csr.as_bytes(), &ca)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("bar already has a requested certificate"));
    assert_eq!(
        fs::read_to_string(ca.csrdir.join("bar.pem")).unwrap(),
        "earlier request"
    );
}
