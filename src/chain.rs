//! X.509 helpers for the `x5c` certificate chain carried in a JWS header.
//!
//! A chain is always `[leaf, intermediate, root]`. Trust is anchored by
//! pinning the SHA-1 fingerprints of the intermediate and root; the leaf
//! rotates and is trusted only through its signature by the intermediate.

use p256::ecdsa::signature::hazmat::PrehashVerifier as _;
use pkcs8::DecodePublicKey as _;
use serde_json::Value;
use sha1::{Digest as _, Sha1};
use sha2::{Sha256, Sha384};
use x509_parser::{certificate::X509Certificate, pem::Pem};

use crate::error::{Error, Result};

/// SHA-1 fingerprint of Apple Worldwide Developer Relations CA - G6.
pub const APPLE_INTERMEDIATE_FINGERPRINT: &str = "0be38bfe21fd434d8cc51cbe0e2bc7758ddbf97b";

/// SHA-1 fingerprint of Apple Root CA - G3.
pub const APPLE_ROOT_FINGERPRINT: &str = "b52cb02fd567e0359fe8fa4d4c41037970fe01b0";

/// Number of certificates a valid `x5c` chain carries.
pub const CHAIN_LENGTH: usize = 3;

const PEM_LINE_WIDTH: usize = 64;

const OID_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
const OID_ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";

/// Fingerprints the intermediate and root of a chain must match, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedFingerprints {
    intermediate: String,
    root: String,
}

impl PinnedFingerprints {
    /// Creates a pin pair from hex SHA-1 fingerprints. Case is ignored.
    pub fn new(intermediate: impl AsRef<str>, root: impl AsRef<str>) -> Self {
        PinnedFingerprints {
            intermediate: intermediate.as_ref().to_ascii_lowercase(),
            root: root.as_ref().to_ascii_lowercase(),
        }
    }

    /// The pins for App Store signed payloads.
    pub fn apple() -> Self {
        Self::new(APPLE_INTERMEDIATE_FINGERPRINT, APPLE_ROOT_FINGERPRINT)
    }

    /// Pinned intermediate fingerprint.
    pub fn intermediate(&self) -> &str {
        &self.intermediate
    }

    /// Pinned root fingerprint.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Positional comparison of `[intermediate, root]` against the pins.
    pub fn matches(&self, intermediate: &str, root: &str) -> bool {
        self.intermediate == intermediate && self.root == root
    }
}

impl Default for PinnedFingerprints {
    fn default() -> Self {
        Self::apple()
    }
}

/// Wraps a base64 DER certificate in a PEM envelope with 64 column lines.
pub fn pem_envelope(base64_der: &str) -> String {
    let mut pem = String::with_capacity(base64_der.len() + base64_der.len() / PEM_LINE_WIDTH + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for line in base64_der.as_bytes().chunks(PEM_LINE_WIDTH) {
        // chunks of an ASCII base64 string stay valid UTF-8
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Lowercase hex SHA-1 over DER bytes.
pub fn sha1_fingerprint(der: &[u8]) -> String {
    hex::encode(Sha1::digest(der))
}

/// Owned DER for the three certificates of an `x5c` header.
///
/// Parsed certificates borrow from this, so all three are allocated together
/// when verification starts and dropped together when it ends.
#[derive(Debug)]
pub struct EncodedChain {
    pems: Vec<Pem>,
}

impl EncodedChain {
    /// Checks the shape of an `x5c` header value and decodes its entries.
    ///
    /// # Arguments
    ///
    /// * `x5c` - The raw header value, if present.
    ///
    /// # Returns
    ///
    /// [`Error::InvalidCertificateChain`] if the value is missing, not an
    /// array, or not exactly three entries long. [`Error::CertificateParse`]
    /// if an entry is not a base64 certificate string.
    pub fn from_x5c(x5c: Option<&Value>) -> Result<Self> {
        let entries = match x5c {
            None => {
                return Err(Error::InvalidCertificateChain(
                    "x5c header is missing".to_owned(),
                ))
            }
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                return Err(Error::InvalidCertificateChain(
                    "x5c header is not an array".to_owned(),
                ))
            }
        };

        if entries.len() != CHAIN_LENGTH {
            return Err(Error::InvalidCertificateChain(format!(
                "expected {CHAIN_LENGTH} certificates, found {}",
                entries.len()
            )));
        }

        let pems = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let b64 = entry.as_str().ok_or_else(|| {
                    Error::CertificateParse(format!("x5c[{index}] is not a string"))
                })?;
                let pem = pem_envelope(b64);
                let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(|e| {
                    Error::CertificateParse(format!("x5c[{index}] is not valid PEM: {e}"))
                })?;
                Ok(pem)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(EncodedChain { pems })
    }

    /// Parses the three certificates.
    pub fn parse(&self) -> Result<CertificateChain<'_>> {
        let mut certs = self
            .pems
            .iter()
            .enumerate()
            .map(|(index, pem)| {
                let x509 = pem.parse_x509().map_err(|e| {
                    Error::CertificateParse(format!("x5c[{index}] is not an X.509 certificate: {e}"))
                })?;
                Ok(Certificate {
                    der: &pem.contents,
                    x509,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (root, intermediate, leaf) = match (certs.pop(), certs.pop(), certs.pop()) {
            (Some(root), Some(intermediate), Some(leaf)) => (root, intermediate, leaf),
            _ => {
                return Err(Error::InvalidCertificateChain(format!(
                    "expected {CHAIN_LENGTH} certificates"
                )))
            }
        };

        Ok(CertificateChain {
            leaf,
            intermediate,
            root,
        })
    }
}

/// A parsed certificate together with the DER it was parsed from.
#[derive(Debug)]
pub struct Certificate<'a> {
    der: &'a [u8],
    x509: X509Certificate<'a>,
}

impl<'a> Certificate<'a> {
    /// DER encoding.
    pub fn der(&self) -> &'a [u8] {
        self.der
    }

    /// Parsed certificate.
    pub fn x509(&self) -> &X509Certificate<'a> {
        &self.x509
    }

    /// Lowercase hex SHA-1 fingerprint of the DER.
    pub fn fingerprint(&self) -> String {
        sha1_fingerprint(self.der)
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> String {
        self.x509.subject().to_string()
    }

    /// Checks that this certificate was signed by `issuer`'s key.
    pub fn verify_issued_by(&self, issuer: &Certificate<'_>) -> Result<()> {
        let tbs: &[u8] = self.x509.tbs_certificate.as_ref();
        let signature: &[u8] = self.x509.signature_value.data.as_ref();
        let oid = self.x509.signature_algorithm.algorithm.to_id_string();
        let issuer_spki = issuer.x509.tbs_certificate.subject_pki.raw;

        let digest = match oid.as_str() {
            OID_ECDSA_WITH_SHA256 => Sha256::digest(tbs).to_vec(),
            OID_ECDSA_WITH_SHA384 => Sha384::digest(tbs).to_vec(),
            other => {
                return Err(Error::CertificateChainVerificationFailed(format!(
                    "unsupported certificate signature algorithm {other}"
                )))
            }
        };

        verify_ecdsa_prehash(issuer_spki, &digest, signature).map_err(|reason| {
            Error::CertificateChainVerificationFailed(format!(
                "'{}' is not signed by '{}': {reason}",
                self.subject(),
                issuer.subject()
            ))
        })
    }

    /// Public key of this certificate as a P-256 verifying key.
    pub fn p256_verifying_key(&self) -> Result<p256::ecdsa::VerifyingKey> {
        let spki = self.x509.tbs_certificate.subject_pki.raw;
        let public_key = p256::PublicKey::from_public_key_der(spki).map_err(|e| {
            Error::SignatureVerificationFailed(format!("leaf key is not a P-256 key: {e}"))
        })?;

        Ok(p256::ecdsa::VerifyingKey::from(&public_key))
    }
}

/// Parsed `[leaf, intermediate, root]` chain.
#[derive(Debug)]
pub struct CertificateChain<'a> {
    leaf: Certificate<'a>,
    intermediate: Certificate<'a>,
    root: Certificate<'a>,
}

impl<'a> CertificateChain<'a> {
    /// Signing certificate.
    pub fn leaf(&self) -> &Certificate<'a> {
        &self.leaf
    }

    /// Intermediate CA.
    pub fn intermediate(&self) -> &Certificate<'a> {
        &self.intermediate
    }

    /// Root CA.
    pub fn root(&self) -> &Certificate<'a> {
        &self.root
    }

    /// Fails with [`Error::UntrustedCertificate`] unless the intermediate and
    /// root fingerprints equal the pins, in that order.
    pub fn check_pins(&self, pins: &PinnedFingerprints) -> Result<()> {
        let intermediate = self.intermediate.fingerprint();
        let root = self.root.fingerprint();

        if pins.matches(&intermediate, &root) {
            Ok(())
        } else {
            Err(Error::UntrustedCertificate(format!(
                "chain fingerprints [{intermediate}, {root}] are not pinned"
            )))
        }
    }

    /// Verifies leaf ← intermediate ← root signatures.
    pub fn verify_signatures(&self) -> Result<()> {
        self.leaf.verify_issued_by(&self.intermediate)?;
        self.intermediate.verify_issued_by(&self.root)?;

        Ok(())
    }
}

fn verify_ecdsa_prehash(
    issuer_spki: &[u8],
    digest: &[u8],
    signature: &[u8],
) -> std::result::Result<(), String> {
    if let Ok(key) = p256::PublicKey::from_public_key_der(issuer_spki) {
        let vk = p256::ecdsa::VerifyingKey::from(&key);
        let sig = p256::ecdsa::Signature::from_der(signature)
            .map_err(|e| format!("bad ECDSA signature bytes: {e}"))?;
        return vk
            .verify_prehash(digest, &sig)
            .map_err(|_| "signature mismatch".to_owned());
    }

    if let Ok(key) = p384::PublicKey::from_public_key_der(issuer_spki) {
        let vk = p384::ecdsa::VerifyingKey::from(&key);
        let sig = p384::ecdsa::Signature::from_der(signature)
            .map_err(|e| format!("bad ECDSA signature bytes: {e}"))?;
        return vk
            .verify_prehash(digest, &sig)
            .map_err(|_| "signature mismatch".to_owned());
    }

    Err("issuer key is neither P-256 nor P-384".to_owned())
}
