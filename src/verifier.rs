use p256::ecdsa::{signature::Verifier as _, Signature};

use crate::{
    chain::{EncodedChain, PinnedFingerprints},
    error::{Error, Result},
    signer::SignerAlgorithm,
    token::SignedToken,
};

/// Decides whether a signed payload really comes from the store.
///
/// Verification is a linear pipeline; the first failing step rejects the
/// token with an error naming that step:
///
/// 1. exactly three compact segments ([`Error::MalformedToken`])
/// 2. `alg` is `ES256` ([`Error::UnsupportedAlgorithm`])
/// 3. `x5c` is an array of three ([`Error::InvalidCertificateChain`])
/// 4. every entry parses as X.509 ([`Error::CertificateParse`])
/// 5. intermediate and root match the pins ([`Error::UntrustedCertificate`])
/// 6. leaf ← intermediate ← root signatures hold
///    ([`Error::CertificateChainVerificationFailed`])
/// 7. the token signature verifies under the leaf key
///    ([`Error::SignatureVerificationFailed`])
///
/// The verifier holds only its pins and is safe to share between threads.
#[derive(Debug, Clone, Default)]
pub struct ChainVerifier {
    pins: PinnedFingerprints,
}

impl ChainVerifier {
    /// Verifier pinned to the App Store intermediate and root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifier pinned to a different intermediate/root pair.
    pub fn with_pins(pins: PinnedFingerprints) -> Self {
        ChainVerifier { pins }
    }

    /// Pinned fingerprints.
    pub fn pins(&self) -> &PinnedFingerprints {
        &self.pins
    }

    /// Runs every trust check against a parsed token.
    ///
    /// # Arguments
    ///
    /// * `token` - Token parsed from a store-signed payload.
    ///
    /// # Returns
    ///
    /// `Ok(())` when every step passes, otherwise the error of the first
    /// failing step.
    pub fn verify(&self, token: &SignedToken) -> Result<()> {
        self.run_steps(token).inspect_err(|e| {
            log::warn!("Rejected signed payload (kid {:?}): {e}", token.kid());
        })?;
        log::debug!("Signed payload verified");

        Ok(())
    }

    /// Decodes a compact JWS and verifies it.
    ///
    /// # Returns
    ///
    /// The verified token, so callers can read its claims.
    pub fn verify_str(&self, compact: &str) -> Result<SignedToken> {
        let token = SignedToken::decode(compact)?;
        self.verify(&token)?;

        Ok(token)
    }

    fn run_steps(&self, token: &SignedToken) -> Result<()> {
        log::trace!("Checking segment count");
        let segments = token.as_str().split('.').count();
        if segments != 3 {
            return Err(Error::MalformedToken(format!(
                "expected 3 segments, found {segments}"
            )));
        }

        log::trace!("Checking algorithm");
        let expected = SignerAlgorithm::Es256.as_jose_str();
        match token.alg() {
            Some(alg) if alg == expected => {}
            Some(alg) => return Err(Error::UnsupportedAlgorithm(alg.to_owned())),
            None => return Err(Error::UnsupportedAlgorithm("alg header is missing".to_owned())),
        }

        log::trace!("Checking certificate chain shape");
        let encoded = EncodedChain::from_x5c(token.x5c())?;

        log::trace!("Parsing certificate chain");
        let chain = encoded.parse()?;

        log::trace!("Checking pinned fingerprints");
        chain.check_pins(&self.pins)?;

        log::trace!("Checking certificate chain signatures");
        chain.verify_signatures()?;

        log::trace!("Checking token signature");
        let leaf_key = chain.leaf().p256_verifying_key()?;
        let signature = Signature::from_slice(token.signature()).map_err(|e| {
            Error::SignatureVerificationFailed(format!("signature is not a valid ES256 signature: {e}"))
        })?;
        leaf_key
            .verify(token.signing_input(), &signature)
            .map_err(|_| {
                Error::SignatureVerificationFailed(
                    "signature does not match the leaf certificate key".to_owned(),
                )
            })
    }
}
