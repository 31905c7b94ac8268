use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Signing algorithms accepted for outbound tokens and inbound payloads.
///
/// The App Store Server API only speaks ES256, so this is a single-variant
/// enum. It is kept as a type so that headers and configuration stay typed.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    Default,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
)]
pub enum SignerAlgorithm {
    /// ECDSA over P-256 with SHA-256
    #[default]
    #[serde(rename = "ES256")]
    #[strum(serialize = "ES256")]
    Es256,
}

impl SignerAlgorithm {
    /// JOSE `alg` header value.
    pub fn as_jose_str(&self) -> &'static str {
        match self {
            SignerAlgorithm::Es256 => "ES256",
        }
    }
}

/// Trait for producing JWS signatures.
///
/// Implementations are synchronous: signing is CPU bound and never touches I/O.
pub trait Signer: Send + Sync {
    /// Algorithm this signer produces.
    fn algorithm(&self) -> SignerAlgorithm;

    /// Key identifier placed into the `kid` header.
    fn key_id(&self) -> &str;

    /// Signs the provided data and returns the raw `r || s` signature.
    ///
    /// # Arguments
    ///
    /// * `data` - The JWS signing input.
    ///
    /// # Returns
    ///
    /// A 64-byte fixed-width signature as required by JWS ES256.
    fn sign(&self, data: &[u8]) -> Result<[u8; 64]>;
}
