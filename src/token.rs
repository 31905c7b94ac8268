use std::{fmt, str::FromStr};

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// JSON object used for JOSE headers and claim sets.
pub type JsonMap = Map<String, Value>;

/// base64url without padding on encode; padding tolerated on decode.
pub(crate) const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A compact-serialized JWS split into its parts.
///
/// Produced either by signing our own claims (outbound API tokens) or by
/// parsing a string received from the store (inbound signed payloads).
/// Holding a `SignedToken` says nothing about whether it is trusted; run it
/// through [`ChainVerifier`](crate::verifier::ChainVerifier) for that.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedToken {
    header: JsonMap,
    claims: JsonMap,
    signature: Vec<u8>,
    signing_input: String,
    compact: String,
}

impl SignedToken {
    /// Assembles a token from an already signed `header.payload` input.
    pub(crate) fn from_parts(
        header: JsonMap,
        claims: JsonMap,
        signing_input: String,
        signature: Vec<u8>,
    ) -> Self {
        let compact = format!("{signing_input}.{}", BASE64_URL.encode(&signature));

        SignedToken {
            header,
            claims,
            signature,
            signing_input,
            compact,
        }
    }

    /// Parses a compact JWS without verifying it.
    ///
    /// The signing input is kept exactly as transmitted, never re-encoded,
    /// so the signature can still be checked against it.
    ///
    /// # Arguments
    ///
    /// * `compact` - `base64url(header).base64url(payload).base64url(signature)`
    ///
    /// # Returns
    ///
    /// The parsed token, or [`Error::MalformedToken`] if the input is empty,
    /// does not have exactly three segments, or a segment is not valid
    /// base64url / a JSON object.
    pub fn decode(compact: &str) -> Result<Self> {
        if compact.is_empty() {
            return Err(Error::MalformedToken("token is empty".to_owned()));
        }

        let segments: Vec<&str> = compact.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
            return Err(Error::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header = decode_json_segment("header", header_b64)?;
        let claims = decode_json_segment("payload", payload_b64)?;
        let signature = BASE64_URL
            .decode(signature_b64)
            .map_err(|e| Error::MalformedToken(format!("signature is not base64url: {e}")))?;

        Ok(SignedToken {
            header,
            claims,
            signature,
            signing_input: format!("{header_b64}.{payload_b64}"),
            compact: compact.to_owned(),
        })
    }

    /// JOSE header.
    pub fn header(&self) -> &JsonMap {
        &self.header
    }

    /// Claim set.
    pub fn claims(&self) -> &JsonMap {
        &self.claims
    }

    /// Consumes the token and returns its claim set.
    pub fn into_claims(self) -> JsonMap {
        self.claims
    }

    /// Raw signature bytes.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The exact bytes that were signed: `header.payload`.
    pub fn signing_input(&self) -> &[u8] {
        self.signing_input.as_bytes()
    }

    /// Compact serialization.
    pub fn as_str(&self) -> &str {
        &self.compact
    }

    /// `alg` header value.
    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    /// `kid` header value.
    pub fn kid(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// Raw `x5c` header value.
    pub fn x5c(&self) -> Option<&Value> {
        self.header.get("x5c")
    }

    /// Looks up a single claim.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Value for an HTTP `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.compact)
    }
}

impl fmt::Display for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact)
    }
}

impl FromStr for SignedToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SignedToken::decode(s)
    }
}

pub(crate) fn encode_json_segment(value: &JsonMap) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| Error::TokenGeneration(format!("failed to serialize segment: {e}")))?;

    Ok(BASE64_URL.encode(json))
}

fn decode_json_segment(name: &str, segment: &str) -> Result<JsonMap> {
    let bytes = BASE64_URL
        .decode(segment)
        .map_err(|e| Error::MalformedToken(format!("{name} is not base64url: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::MalformedToken(format!("{name} is not a JSON object"))),
        Err(e) => Err(Error::MalformedToken(format!("{name} is not valid JSON: {e}"))),
    }
}
