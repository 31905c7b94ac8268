//! Receipt validation for the App Store.
//!
//! This crate mints short-lived ES256 tokens for the App Store Server API and
//! verifies store-signed JWS payloads (transactions, renewal info and server
//! notifications) against a pinned certificate chain.

#![warn(missing_docs)]

/// App Store Server API environments, endpoints and request descriptors
pub mod api;

/// Pinned certificate chains carried in the `x5c` header
pub mod chain;

/// Typed extraction of claims from verified payloads
pub mod claims;

/// App Store Server API client
pub mod client;

/// Injectable time source
pub mod clock;

/// Validator configuration files
pub mod config;

/// Error types
pub mod error;

/// API token generation
pub mod generator;

/// Token issuer identity
pub mod issuer;

/// Private key material for ES256 signing
pub mod key;

/// Transactions, renewal info and notifications built from verified claims
pub mod payload;

/// Signing seam and supported algorithms
pub mod signer;

/// Compact JWS parsing
pub mod token;

/// HTTP seam for the API client
pub mod transport;

/// JWS trust verification
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use error::{Error, ErrorKind, Result};
pub use generator::TokenGenerator;
pub use issuer::TokenIssuer;
pub use key::KeyMaterial;
pub use token::SignedToken;
pub use verifier::ChainVerifier;
