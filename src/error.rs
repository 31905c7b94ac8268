use thiserror::Error;

/// Result alias used by the token and verification core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while issuing, parsing or verifying signed tokens.
///
/// Messages carry a short context string only. Key material and raw
/// certificate bytes are never included.
#[derive(Debug, Error)]
pub enum Error {
    /// Issuer or key setup is invalid. Detected before any crypto runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Private key contents could not be parsed as a P-256 key.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// Signing the outbound token failed.
    #[error("token generation failed: {0}")]
    TokenGeneration(String),

    /// Input is not a well-formed compact JWS.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Header `alg` is anything other than `ES256`.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Header `x5c` is missing, not an array or not exactly three entries.
    #[error("invalid certificate chain: {0}")]
    InvalidCertificateChain(String),

    /// One of the `x5c` entries is not a parseable X.509 certificate.
    #[error("certificate parse error: {0}")]
    CertificateParse(String),

    /// Intermediate or root fingerprint does not match the pinned values.
    #[error("untrusted certificate: {0}")]
    UntrustedCertificate(String),

    /// A certificate in the chain is not signed by its issuer.
    #[error("certificate chain verification failed: {0}")]
    CertificateChainVerificationFailed(String),

    /// The token signature does not verify against the leaf key.
    #[error("signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// A verified payload is missing a required claim.
    #[error("missing claim '{0}'")]
    MissingClaim(String),

    /// A verified payload carries a claim of the wrong type.
    #[error("invalid claim '{claim}': {reason}")]
    InvalidClaim {
        /// Claim name
        claim: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Fieldless discriminant of [`Error`], handy for matching and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    /// [`Error::Configuration`]
    Configuration,
    /// [`Error::InvalidKey`]
    InvalidKey,
    /// [`Error::TokenGeneration`]
    TokenGeneration,
    /// [`Error::MalformedToken`]
    MalformedToken,
    /// [`Error::UnsupportedAlgorithm`]
    UnsupportedAlgorithm,
    /// [`Error::InvalidCertificateChain`]
    InvalidCertificateChain,
    /// [`Error::CertificateParse`]
    CertificateParse,
    /// [`Error::UntrustedCertificate`]
    UntrustedCertificate,
    /// [`Error::CertificateChainVerificationFailed`]
    CertificateChainVerificationFailed,
    /// [`Error::SignatureVerificationFailed`]
    SignatureVerificationFailed,
    /// [`Error::MissingClaim`]
    MissingClaim,
    /// [`Error::InvalidClaim`]
    InvalidClaim,
}

impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::InvalidKey(_) => ErrorKind::InvalidKey,
            Error::TokenGeneration(_) => ErrorKind::TokenGeneration,
            Error::MalformedToken(_) => ErrorKind::MalformedToken,
            Error::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Error::InvalidCertificateChain(_) => ErrorKind::InvalidCertificateChain,
            Error::CertificateParse(_) => ErrorKind::CertificateParse,
            Error::UntrustedCertificate(_) => ErrorKind::UntrustedCertificate,
            Error::CertificateChainVerificationFailed(_) => {
                ErrorKind::CertificateChainVerificationFailed
            }
            Error::SignatureVerificationFailed(_) => ErrorKind::SignatureVerificationFailed,
            Error::MissingClaim(_) => ErrorKind::MissingClaim,
            Error::InvalidClaim { .. } => ErrorKind::InvalidClaim,
        }
    }

    /// True when the error means a received token must be treated as untrusted.
    ///
    /// Configuration and generation errors are about our own setup and return false.
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedToken
                | ErrorKind::UnsupportedAlgorithm
                | ErrorKind::InvalidCertificateChain
                | ErrorKind::CertificateParse
                | ErrorKind::UntrustedCertificate
                | ErrorKind::CertificateChainVerificationFailed
                | ErrorKind::SignatureVerificationFailed
        )
    }

    pub(crate) fn invalid_claim(claim: &str, reason: impl Into<String>) -> Self {
        Error::InvalidClaim {
            claim: claim.to_owned(),
            reason: reason.into(),
        }
    }
}
