//! X.509 helpers for certificate-mode gateway credentials.
//!
//! A certificate serial number ("cert SN") is the lower-case hex MD5 of the
//! issuer DN in RFC 4514 order followed by the decimal serial number.

use crate::error::{PaymentError, PaymentResult};
use md5::{Digest, Md5};
use rsa::pkcs8::DecodePublicKey;
use rsa::{BigUint, RsaPublicKey};
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::Encode;
use x509_cert::name::RdnSequence;
use x509_cert::Certificate;

const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");

const ATTRIBUTE_NAMES: &[(&str, &str)] = &[
    ("2.5.4.3", "CN"),
    ("2.5.4.6", "C"),
    ("2.5.4.7", "L"),
    ("2.5.4.8", "ST"),
    ("2.5.4.10", "O"),
    ("2.5.4.11", "OU"),
    ("0.9.2342.19200300.100.1.25", "DC"),
    ("0.9.2342.19200300.100.1.1", "UID"),
];

fn invalid(what: &str, detail: impl std::fmt::Display) -> PaymentError {
    PaymentError::ConfigurationInvalid(format!("{}: {}", what, detail))
}

/// Parses every certificate in a PEM bundle.
pub fn parse_chain(pem: &str, what: &str) -> PaymentResult<Vec<Certificate>> {
    let certs = Certificate::load_pem_chain(pem.as_bytes()).map_err(|e| invalid(what, e))?;
    if certs.is_empty() {
        return Err(invalid(what, "no certificate found"));
    }
    Ok(certs)
}

/// Parses the first certificate in a PEM document.
pub fn parse_one(pem: &str, what: &str) -> PaymentResult<Certificate> {
    let mut certs = parse_chain(pem, what)?;
    Ok(certs.swap_remove(0))
}

/// Big-endian unsigned bytes to a decimal string.
fn decimal_serial(bytes: &[u8]) -> String {
    BigUint::from_bytes_be(bytes).to_str_radix(10)
}

fn escape_rfc4514(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == '#' || c == ' '))
            || (i == last && c == ' ');
        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Distinguished name in RFC 4514 order (last RDN first).
pub fn rfc4514_name(name: &RdnSequence) -> String {
    name.0
        .iter()
        .rev()
        .map(|rdn| {
            rdn.0
                .iter()
                .map(|atv| {
                    let oid = atv.oid.to_string();
                    let key = ATTRIBUTE_NAMES
                        .iter()
                        .find(|(dotted, _)| *dotted == oid)
                        .map(|(_, short)| short.to_string())
                        .unwrap_or(oid);
                    let value = match std::str::from_utf8(atv.value.value()) {
                        Ok(text) => escape_rfc4514(text),
                        Err(_) => format!("#{}", hex::encode(atv.value.value())),
                    };
                    format!("{}={}", key, value)
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn cert_sn(cert: &Certificate) -> String {
    let tbs = &cert.tbs_certificate;
    let issuer = rfc4514_name(&tbs.issuer);
    let serial = decimal_serial(tbs.serial_number.as_bytes());
    hex::encode(Md5::digest(format!("{}{}", issuer, serial).as_bytes()))
}

/// SN of the first certificate in `pem`.
pub fn cert_sn_from_pem(pem: &str, what: &str) -> PaymentResult<String> {
    Ok(cert_sn(&parse_one(pem, what)?))
}

/// `_`-joined SNs of the RSA-signed certificates in a root bundle.
/// Certificates signed with other algorithms are skipped.
pub fn root_cert_sn(bundle_pem: &str) -> PaymentResult<String> {
    let sns: Vec<String> = parse_chain(bundle_pem, "root certificate")?
        .iter()
        .filter(|cert| {
            let alg = cert.signature_algorithm.oid;
            alg == SHA256_WITH_RSA || alg == SHA1_WITH_RSA
        })
        .map(cert_sn)
        .collect();
    if sns.is_empty() {
        return Err(invalid("root certificate", "no RSA-signed certificate in bundle"));
    }
    Ok(sns.join("_"))
}

pub fn public_key(cert: &Certificate) -> PaymentResult<RsaPublicKey> {
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| invalid("gateway public certificate", e))?;
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| invalid("gateway public certificate", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_CERT: &str = include_str!("../../tests/fixtures/app_cert.crt");
    const GATEWAY_CERT: &str = include_str!("../../tests/fixtures/gateway_public_cert.crt");
    const ROOT_BUNDLE: &str = include_str!("../../tests/fixtures/root_cert_bundle.crt");

    #[test]
    fn decimal_serial_handles_large_values() {
        assert_eq!(decimal_serial(&[]), "0");
        assert_eq!(decimal_serial(&[0x00, 0x01, 0x00]), "256");
        assert_eq!(
            decimal_serial(&0x85f9_12e6_4863_00acu64.to_be_bytes()),
            "9653768056511594668"
        );
    }

    #[test]
    fn issuer_is_rendered_in_rfc4514_order() {
        let cert = parse_one(APP_CERT, "app certificate").unwrap();
        assert_eq!(
            rfc4514_name(&cert.tbs_certificate.issuer),
            "CN=Test Payment Root,OU=Certification Authority,O=Test Root CA,C=CN"
        );
        assert_eq!(escape_rfc4514("a,b "), "a\\,b\\ ");
    }

    #[test]
    fn cert_sns_match_known_values() {
        assert_eq!(
            cert_sn_from_pem(APP_CERT, "app").unwrap(),
            "7fd808068d8c29c62b0e1dcc97b74cb8"
        );
        assert_eq!(
            cert_sn_from_pem(GATEWAY_CERT, "gateway").unwrap(),
            "b4b70f146dac4e5a7bd65ac9131d52ab"
        );
    }

    #[test]
    fn root_sn_skips_non_rsa_certificates() {
        assert_eq!(parse_chain(ROOT_BUNDLE, "root").unwrap().len(), 2);
        assert_eq!(
            root_cert_sn(ROOT_BUNDLE).unwrap(),
            "c2137671b7d0646a140525eac6600399"
        );
    }

    #[test]
    fn gateway_public_key_is_extracted() {
        let cert = parse_one(GATEWAY_CERT, "gateway").unwrap();
        assert!(public_key(&cert).is_ok());
    }

    #[test]
    fn garbage_is_configuration_invalid() {
        let err = parse_chain("not a certificate", "app certificate").unwrap_err();
        assert_eq!(err.kind(), "CONFIGURATION_INVALID");
    }
}
