//! Fixtures shared by unit tests: deterministic API keys and throwaway
//! three-level ECDSA chains that sign JWS payloads the way the store does.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use p256::{
    ecdsa::{signature::Signer as _, Signature, SigningKey},
    pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding},
    SecretKey,
};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
};
use serde_json::{json, Value};

use crate::{
    chain::{sha1_fingerprint, PinnedFingerprints},
    issuer::TokenIssuer,
    key::KeyMaterial,
    token::BASE64_URL,
};

/// PKCS#8 PEM for a fixed P-256 scalar.
pub fn test_key_pem() -> String {
    let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
    secret.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
}

pub fn test_key() -> KeyMaterial {
    KeyMaterial::new("ABC123DEFG", test_key_pem(), None).unwrap()
}

pub fn test_issuer() -> TokenIssuer {
    TokenIssuer::new("DEF456UVW", "com.example", test_key()).unwrap()
}

/// Leaf, intermediate and root certificates plus the leaf signing key.
pub struct TestChain {
    pub leaf_der: Vec<u8>,
    pub intermediate_der: Vec<u8>,
    pub root_der: Vec<u8>,
    pub leaf_key: SigningKey,
}

impl TestChain {
    /// P-256 chain, every certificate signed with ecdsa-with-SHA256.
    pub fn generate() -> Self {
        Self::generate_with(&rcgen::PKCS_ECDSA_P256_SHA256)
    }

    /// P-384 root and intermediate over a P-256 leaf, so the intermediate
    /// and leaf certificates carry ecdsa-with-SHA384 signatures.
    pub fn generate_p384() -> Self {
        Self::generate_with(&rcgen::PKCS_ECDSA_P384_SHA384)
    }

    fn generate_with(ca_alg: &'static rcgen::SignatureAlgorithm) -> Self {
        let root_key = KeyPair::generate_for(ca_alg).unwrap();
        let mut root_params = CertificateParams::default();
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        root_params.distinguished_name = distinguished_name("Test Root CA");
        let root = root_params.self_signed(&root_key).unwrap();
        let root_issuer = Issuer::new(root_params, root_key);

        let intermediate_key = KeyPair::generate_for(ca_alg).unwrap();
        let mut intermediate_params = CertificateParams::default();
        intermediate_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        intermediate_params.distinguished_name = distinguished_name("Test Intermediate CA");
        let intermediate = intermediate_params
            .signed_by(&intermediate_key, &root_issuer)
            .unwrap();
        let intermediate_issuer = Issuer::new(intermediate_params, intermediate_key);

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::default();
        leaf_params.is_ca = IsCa::NoCa;
        leaf_params.distinguished_name = distinguished_name("Test Signed Payload Leaf");
        let leaf = leaf_params
            .signed_by(&leaf_key, &intermediate_issuer)
            .unwrap();

        TestChain {
            leaf_der: leaf.der().to_vec(),
            intermediate_der: intermediate.der().to_vec(),
            root_der: root.der().to_vec(),
            leaf_key: SigningKey::from_pkcs8_der(&leaf_key.serialize_der()).unwrap(),
        }
    }

    pub fn x5c(&self) -> Value {
        json!([
            BASE64.encode(&self.leaf_der),
            BASE64.encode(&self.intermediate_der),
            BASE64.encode(&self.root_der),
        ])
    }

    pub fn pins(&self) -> PinnedFingerprints {
        PinnedFingerprints::new(
            sha1_fingerprint(&self.intermediate_der),
            sha1_fingerprint(&self.root_der),
        )
    }

    /// Signs `claims` under an ES256 header carrying this chain.
    pub fn sign(&self, claims: Value) -> String {
        self.sign_with_header(json!({"alg": "ES256", "x5c": self.x5c()}), claims)
    }

    pub fn sign_with_header(&self, header: Value, claims: Value) -> String {
        let signing_input = format!(
            "{}.{}",
            BASE64_URL.encode(serde_json::to_vec(&header).unwrap()),
            BASE64_URL.encode(serde_json::to_vec(&claims).unwrap())
        );
        let signature: Signature = self.leaf_key.sign(signing_input.as_bytes());

        format!("{signing_input}.{}", BASE64_URL.encode(signature.to_bytes()))
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    name
}

pub fn transaction_claims() -> Value {
    json!({
        "transactionId": "2000000123456789",
        "originalTransactionId": "2000000000000001",
        "webOrderLineItemId": "2000000000000099",
        "bundleId": "com.example",
        "productId": "com.example.monthly",
        "subscriptionGroupIdentifier": "21000000",
        "purchaseDate": 1_704_067_200_000_i64,
        "originalPurchaseDate": 1_701_388_800_000_i64,
        "expiresDate": 1_706_745_600_000_i64,
        "quantity": 1,
        "type": "Auto-Renewable Subscription",
        "inAppOwnershipType": "PURCHASED",
        "signedDate": 1_704_067_260_000_i64,
        "environment": "Sandbox",
    })
}

pub fn renewal_claims() -> Value {
    json!({
        "originalTransactionId": "2000000000000001",
        "autoRenewProductId": "com.example.yearly",
        "productId": "com.example.monthly",
        "autoRenewStatus": 1,
        "isInBillingRetryPeriod": false,
        "signedDate": 1_704_067_260_000_i64,
        "environment": "Sandbox",
    })
}
