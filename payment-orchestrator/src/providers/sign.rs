//! Signature primitives used by the gateway clients.

use crate::error::{PaymentError, PaymentResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

/// `k1=v1&k2=v2` over the keys in ascending order, skipping empty values
/// and the keys in `exclude`. Values are not URL-encoded.
pub fn canonical_query(params: &BTreeMap<String, String>, exclude: &[&str]) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !exclude.contains(&k.as_str()))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lower-case hex `md5(content + key)`.
pub fn md5_sign(content: &str, key: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Strips PEM armour and whitespace, leaving the base64 body.
fn pem_body(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----"))
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// SHA256withRSA signer.
#[derive(Clone)]
pub struct RsaSigner {
    key: SigningKey<Sha256>,
}

impl RsaSigner {
    /// Accepts PKCS#8 or PKCS#1 PEM, or the bare base64 DER of either.
    pub fn from_pem(pem: &str) -> PaymentResult<Self> {
        let pem = pem.trim();
        let parsed = if pem.contains("BEGIN RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| e.to_string())
        } else if pem.contains("BEGIN PRIVATE KEY") {
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| e.to_string())
        } else {
            STANDARD
                .decode(pem_body(pem))
                .map_err(|e| e.to_string())
                .and_then(|der| {
                    RsaPrivateKey::from_pkcs8_der(&der)
                        .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der))
                        .map_err(|e| e.to_string())
                })
        };
        let key = parsed
            .map_err(|e| PaymentError::ConfigurationInvalid(format!("private key: {}", e)))?;
        Ok(Self {
            key: SigningKey::<Sha256>::new(key),
        })
    }

    /// Base64 signature over `content`.
    pub fn sign(&self, content: &str) -> String {
        let signature = self.key.sign(content.as_bytes());
        STANDARD.encode(signature.to_bytes())
    }
}

/// SHA256withRSA verifier.
#[derive(Clone)]
pub struct RsaVerifier {
    key: VerifyingKey<Sha256>,
}

impl RsaVerifier {
    pub fn new(key: RsaPublicKey) -> Self {
        Self {
            key: VerifyingKey::<Sha256>::new(key),
        }
    }

    /// Checks a base64 signature. Any decoding problem counts as a mismatch.
    pub fn verify(&self, content: &str, signature_b64: &str) -> Result<(), String> {
        let bytes = STANDARD
            .decode(signature_b64.trim())
            .map_err(|e| format!("signature is not base64: {}", e))?;
        let signature =
            Signature::try_from(bytes.as_slice()).map_err(|e| format!("malformed signature: {}", e))?;
        self.key
            .verify(content.as_bytes(), &signature)
            .map_err(|_| "signature mismatch".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/gateway_private_key.pem");

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_query_sorts_and_filters() {
        let p = params(&[
            ("sign", "x"),
            ("sign_type", "MD5"),
            ("money", "9.90"),
            ("name", ""),
            ("a", "1"),
        ]);
        assert_eq!(canonical_query(&p, &["sign", "sign_type"]), "a=1&money=9.90");
        assert_eq!(canonical_query(&p, &["sign"]), "a=1&money=9.90&sign_type=MD5");
    }

    #[test]
    fn md5_sign_appends_key() {
        // md5("a=1key")
        assert_eq!(md5_sign("a=1", "key"), hex::encode(Md5::digest(b"a=1key")));
        assert_eq!(md5_sign("", "").len(), 32);
    }

    #[test]
    fn constant_time_eq_compares_content_and_length() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn rsa_signature_round_trip_and_tamper() {
        let signer = RsaSigner::from_pem(PRIVATE_KEY).unwrap();
        let public = RsaPublicKey::from(signer.key.as_ref());
        let verifier = RsaVerifier::new(public);

        let signature = signer.sign("a=1&b=2");
        assert!(verifier.verify("a=1&b=2", &signature).is_ok());
        assert!(verifier.verify("a=1&b=3", &signature).is_err());
        assert!(verifier.verify("a=1&b=2", "not-base64!").is_err());
        assert!(verifier.verify("a=1&b=2", "AAAA").is_err());
    }

    #[test]
    fn bare_base64_private_key_is_accepted() {
        let body = pem_body(PRIVATE_KEY);
        assert!(RsaSigner::from_pem(&body).is_ok());
        assert!(RsaSigner::from_pem("garbage").is_err());
    }
}
