use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;

use crate::{
    clock::{Clock, SystemClock},
    error::{Error, Result},
    issuer::TokenIssuer,
    signer::Signer,
    token::{encode_json_segment, JsonMap, SignedToken},
};

/// Audience the App Store Server API expects in every token.
pub const AUDIENCE: &str = "appstoreconnect-v1";

/// Lifetime of a generated token, in seconds.
pub const TOKEN_LIFETIME_SECS: i64 = 60 * 60;

/// Generates a signed App Store Server API token.
///
/// Every call signs fresh `iat`/`exp` values; nothing is cached.
///
/// # Arguments
///
/// * `issuer` - Issuer id, bundle id and signing key.
/// * `clock` - Time source for `iat`.
///
/// # Returns
///
/// The signed token, [`Error::Configuration`] if the issuer is incomplete,
/// or [`Error::TokenGeneration`] if signing fails.
pub fn generate(issuer: &TokenIssuer, clock: &dyn Clock) -> Result<SignedToken> {
    issuer.validate()?;

    let key = issuer.key();
    let issued_at = clock.now();
    let expires_at = issued_at + Duration::seconds(TOKEN_LIFETIME_SECS);

    let mut header = JsonMap::new();
    header.insert("alg".to_owned(), key.algorithm().as_jose_str().into());
    header.insert("kid".to_owned(), key.key_id().into());
    header.insert("typ".to_owned(), "JWT".into());

    let mut claims = JsonMap::new();
    claims.insert("iss".to_owned(), issuer.issuer_id().into());
    claims.insert("iat".to_owned(), Value::from(issued_at.timestamp()));
    claims.insert("exp".to_owned(), Value::from(expires_at.timestamp()));
    claims.insert("aud".to_owned(), AUDIENCE.into());
    claims.insert("bid".to_owned(), issuer.bundle_id().into());

    let signing_input = format!(
        "{}.{}",
        encode_json_segment(&header)?,
        encode_json_segment(&claims)?
    );

    let signature = key.sign(signing_input.as_bytes()).map_err(|e| match e {
        Error::TokenGeneration(_) => e,
        other => Error::TokenGeneration(other.to_string()),
    })?;

    log::debug!(
        "Generated API token for issuer '{}' (kid {}), expires {}",
        issuer.issuer_id(),
        key.key_id(),
        expires_at
    );

    Ok(SignedToken::from_parts(
        header,
        claims,
        signing_input,
        signature.to_vec(),
    ))
}

/// Parses a compact JWS without verifying it. See [`SignedToken::decode`].
pub fn decode(signed_payload: &str) -> Result<SignedToken> {
    SignedToken::decode(signed_payload)
}

/// Issues API tokens for a single issuer.
///
/// Cheap to clone; the issuer and clock are shared.
#[derive(Clone)]
pub struct TokenGenerator {
    issuer: Arc<TokenIssuer>,
    clock: Arc<dyn Clock>,
}

impl TokenGenerator {
    /// Creates a generator with an explicit clock.
    pub fn new(issuer: Arc<TokenIssuer>, clock: Arc<dyn Clock>) -> Self {
        TokenGenerator { issuer, clock }
    }

    /// Creates a generator reading the wall clock.
    pub fn with_system_clock(issuer: Arc<TokenIssuer>) -> Self {
        Self::new(issuer, Arc::new(SystemClock))
    }

    /// Issuer tokens are generated for.
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Generates a fresh token.
    pub fn generate(&self) -> Result<SignedToken> {
        generate(&self.issuer, self.clock.as_ref())
    }

    /// Generates a fresh token and formats it as an `Authorization` value.
    pub fn bearer(&self) -> Result<String> {
        Ok(self.generate()?.bearer())
    }
}

impl std::fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGenerator")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}
