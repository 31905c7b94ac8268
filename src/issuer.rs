use crate::{
    error::{Error, Result},
    key::KeyMaterial,
    signer::{Signer, SignerAlgorithm},
};

/// Identity on whose behalf App Store Server API tokens are issued.
///
/// Binds the issuer id from App Store Connect, the app bundle id and the
/// signing key. Immutable once built; share it behind an `Arc` across every
/// token generated for a validator.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    issuer_id: String,
    bundle_id: String,
    key: KeyMaterial,
}

impl TokenIssuer {
    /// Creates a new issuer.
    ///
    /// # Arguments
    ///
    /// * `issuer_id` - Issuer id from the App Store Connect keys page.
    /// * `bundle_id` - Bundle id of the app.
    /// * `key` - Private key used to sign tokens.
    ///
    /// # Returns
    ///
    /// The issuer, or [`Error::Configuration`] if either id is empty.
    pub fn new(
        issuer_id: impl Into<String>,
        bundle_id: impl Into<String>,
        key: KeyMaterial,
    ) -> Result<Self> {
        let issuer = TokenIssuer {
            issuer_id: issuer_id.into(),
            bundle_id: bundle_id.into(),
            key,
        };
        issuer.validate()?;

        Ok(issuer)
    }

    /// Builds an issuer without validation so tests can exercise the
    /// checks in token generation.
    #[cfg(test)]
    pub(crate) fn unchecked(issuer_id: &str, bundle_id: &str, key: KeyMaterial) -> Self {
        TokenIssuer {
            issuer_id: issuer_id.to_owned(),
            bundle_id: bundle_id.to_owned(),
            key,
        }
    }

    /// Checks the invariants required before signing.
    pub fn validate(&self) -> Result<()> {
        if self.issuer_id.trim().is_empty() {
            return Err(Error::Configuration("issuer id must not be empty".to_owned()));
        }
        if self.bundle_id.trim().is_empty() {
            return Err(Error::Configuration("bundle id must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Issuer id (`iss` claim).
    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    /// Bundle id (`bid` claim).
    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    /// Signing key.
    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// Signing algorithm (`alg` header), always the key's own.
    pub fn algorithm(&self) -> SignerAlgorithm {
        self.key.algorithm()
    }
}
