//! Extension composition for issued certificates: a fixed base set plus the
//! CSR extensions whose OIDs fall inside the Puppet arc. Everything else a
//! CSR asks for is dropped; the CA, not the requester, decides what an
//! issued certificate asserts.

use rcgen::{
    CertificateParams, CustomExtension, ExtendedKeyUsagePurpose, IsCa, KeyIdMethod,
    KeyUsagePurpose,
};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::cri_attributes::ParsedCriAttribute;
use x509_parser::prelude::FromDer;

use crate::error::{CaError, Result};

/// OID subtree under which CSR extensions are trusted for carry-through.
pub const PUPPET_OID_ARC: &str = "1.3.6.1.4.1.34380.1";

/// Netscape comment (2.16.840.1.113730.1.13) stamped on every issued cert.
pub const NETSCAPE_COMMENT: &str = "Puppet JVM Internal Certificate";

const NETSCAPE_COMMENT_OID: &[u64] = &[2, 16, 840, 1, 113730, 1, 13];
const DER_TAG_IA5STRING: u8 = 0x16;

/// One extension lifted from a CSR. Equality is by OID; the value is the raw
/// DER extnValue payload.
#[derive(Debug, Clone)]
pub struct CsrExtension {
    pub oid: String,
    pub critical: bool,
    pub value: Vec<u8>,
}

impl PartialEq for CsrExtension {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid
    }
}

impl Eq for CsrExtension {}

/// Extracts the raw extension list from a DER-encoded PKCS#10 request
/// (the extensionRequest attribute, when present).
///
/// # Errors
/// Returns `MalformedCsr` if the DER does not parse.
pub fn parse_csr_extensions(csr_der: &[u8]) -> Result<Vec<CsrExtension>> {
    let (_, csr) = X509CertificationRequest::from_der(csr_der)
        .map_err(|e| CaError::MalformedCsr(e.to_string()))?;

    let mut extensions = Vec::new();
    for attribute in csr.certification_request_info.iter_attributes() {
        if let ParsedCriAttribute::ExtensionRequest(request) = attribute.parsed_attribute() {
            for ext in &request.extensions {
                extensions.push(CsrExtension {
                    oid: ext.oid.to_id_string(),
                    critical: ext.critical,
                    value: ext.value.to_vec(),
                });
            }
        }
    }
    Ok(extensions)
}

/// Dotted-prefix subtree test against the Puppet arc.
#[must_use]
pub fn is_puppet_arc(oid: &str) -> bool {
    oid == PUPPET_OID_ARC || oid.starts_with("1.3.6.1.4.1.34380.1.")
}

/// Configures `params` with the extension set every issued certificate
/// carries:
///
/// 1. the Netscape comment (non-critical);
/// 2. Authority Key Identifier from the issuing CA (non-critical);
/// 3. Basic Constraints `cA=false` (critical);
/// 4. Extended Key Usage with the SSL server and client OIDs;
/// 5. Key Usage digitalSignature + keyEncipherment (critical);
/// 6. Subject Key Identifier from the subject public key;
/// 7. the Puppet-arc subset of the CSR's own extensions, criticality
///    preserved.
///
/// Any subject alternative names the CSR requested are cleared along with
/// the rest of its non-arc extensions.
///
/// # Errors
/// Returns `MalformedCsr` if a carried extension has an unparsable OID.
pub fn apply_issued_extensions(
    params: &mut CertificateParams,
    csr_extensions: &[CsrExtension],
) -> Result<()> {
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.use_authority_key_identifier_extension = true;
    params.key_identifier_method = KeyIdMethod::Sha256;
    params.subject_alt_names = Vec::new();

    let mut customs = vec![CustomExtension::from_oid_content(
        NETSCAPE_COMMENT_OID,
        der_ia5_string(NETSCAPE_COMMENT),
    )];
    for ext in csr_extensions.iter().filter(|e| is_puppet_arc(&e.oid)) {
        let components = oid_components(&ext.oid).ok_or_else(|| {
            CaError::MalformedCsr(format!("unparsable extension OID {}", ext.oid))
        })?;
        let mut custom = CustomExtension::from_oid_content(&components, ext.value.clone());
        custom.set_criticality(ext.critical);
        customs.push(custom);
    }
    params.custom_extensions = customs;
    Ok(())
}

fn oid_components(oid: &str) -> Option<Vec<u64>> {
    oid.split('.').map(|arc| arc.parse::<u64>().ok()).collect()
}

fn der_ia5_string(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 4);
    out.push(DER_TAG_IA5STRING);
    der_length(&mut out, bytes.len());
    out.extend_from_slice(bytes);
    out
}

fn der_length(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
        return;
    }
    let octets = len.to_be_bytes();
    let skip = octets.iter().take_while(|&&b| b == 0).count();
    let significant = &octets[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

#[cfg(test)]
mod tests {
    use rcgen::{DistinguishedName, DnType, DnValue, KeyPair, SanType};

    use super::*;

    #[test]
    fn test_is_puppet_arc_subtree() {
        assert!(is_puppet_arc("1.3.6.1.4.1.34380.1"));
        assert!(is_puppet_arc("1.3.6.1.4.1.34380.1.2.3"));
        assert!(!is_puppet_arc("2.5.29.17"));
        assert!(!is_puppet_arc("1.3.6.1.4.1.34380.2.1"));
        assert!(!is_puppet_arc("1.3.6.1.4.1.343801.1"));
    }

    #[test]
    fn test_csr_extension_equality_is_by_oid() {
        let a = CsrExtension {
            oid: "1.3.6.1.4.1.34380.1.1.1".to_string(),
            critical: false,
            value: vec![1, 2, 3],
        };
        let b = CsrExtension {
            oid: "1.3.6.1.4.1.34380.1.1.1".to_string(),
            critical: true,
            value: vec![9],
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_der_ia5_string_short_form() {
        let encoded = der_ia5_string("abc");
        assert_eq!(encoded, vec![0x16, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn test_der_length_long_form() {
        let mut out = Vec::new();
        der_length(&mut out, 300);
        assert_eq!(out, vec![0x82, 0x01, 0x2C]);
    }

    #[test]
    fn test_parse_csr_extensions_sees_requested_extensions() {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String("agent1".to_string()));
        params.distinguished_name = dn;
        params.subject_alt_names = vec![SanType::DnsName(
            rcgen::string::Ia5String::try_from("agent1.example.com".to_string()).unwrap(),
        )];
        params.custom_extensions = vec![CustomExtension::from_oid_content(
            &[1, 3, 6, 1, 4, 1, 34380, 1, 2, 3],
            der_ia5_string("role=db"),
        )];
        let key = KeyPair::generate().unwrap();
        let csr_pem = params.serialize_request(&key).unwrap().pem().unwrap();

        let (_, pem) = x509_parser::pem::parse_x509_pem(csr_pem.as_bytes()).unwrap();
        let extensions = parse_csr_extensions(&pem.contents).unwrap();

        let oids: Vec<&str> = extensions.iter().map(|e| e.oid.as_str()).collect();
        assert!(oids.contains(&"1.3.6.1.4.1.34380.1.2.3"));
        assert!(oids.contains(&"2.5.29.17"));

        let carried: Vec<&CsrExtension> = extensions
            .iter()
            .filter(|e| is_puppet_arc(&e.oid))
            .collect();
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].value, der_ia5_string("role=db"));
    }

    #[test]
    fn test_apply_issued_extensions_filters_non_arc() {
        let mut params = CertificateParams::default();
        let extensions = vec![
            CsrExtension {
                oid: "1.3.6.1.4.1.34380.1.2.3".to_string(),
                critical: false,
                value: der_ia5_string("role=db"),
            },
            CsrExtension {
                oid: "2.5.29.17".to_string(),
                critical: false,
                value: vec![0x30, 0x00],
            },
        ];

        apply_issued_extensions(&mut params, &extensions).unwrap();

        // Netscape comment plus the single arc extension.
        assert_eq!(params.custom_extensions.len(), 2);
        assert!(matches!(params.is_ca, IsCa::ExplicitNoCa));
        assert_eq!(params.key_usages.len(), 2);
        assert_eq!(params.extended_key_usages.len(), 2);
        assert!(params.use_authority_key_identifier_extension);
        assert!(params.subject_alt_names.is_empty());
    }
}
