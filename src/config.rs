use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{api::Environment, issuer::TokenIssuer, key::KeyMaterial};

/// Settings for calling the App Store Server API, usually stored as JSON
/// next to the `.p8` key downloaded from App Store Connect.
///
/// Exactly one of `private_key` and `private_key_path` must be set.
#[derive(Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Issuer id from the App Store Connect keys page
    pub issuer_id: String,
    /// Bundle id of the app
    pub bundle_id: String,
    /// Id of the API key, sent as `kid`
    pub key_id: String,
    /// Inline PEM key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Path to a `.p8` key file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    /// Passphrase of an encrypted PKCS#8 key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// API environment, production unless set
    #[serde(default)]
    pub environment: Environment,
}

impl ValidatorConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// A relative `private_key_path` is resolved against the directory of
    /// the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read validator config {}", path.display()))?;
        let mut config = Self::from_json_str(&contents)
            .with_context(|| format!("invalid validator config {}", path.display()))?;

        if let (Some(key_path), Some(dir)) = (&config.private_key_path, path.parent()) {
            if key_path.is_relative() {
                config.private_key_path = Some(dir.join(key_path));
            }
        }
        log::debug!("Loaded validator config from {}", path.display());

        Ok(config)
    }

    /// Parses a configuration from JSON and checks the key source.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ValidatorConfig = serde_json::from_str(json)?;
        if config.private_key.is_some() == config.private_key_path.is_some() {
            return Err(anyhow!(
                "exactly one of 'private_key' and 'private_key_path' must be set"
            ));
        }

        Ok(config)
    }

    /// Reads the key and builds the issuer. Key and ids are validated here,
    /// not on first use.
    pub fn into_issuer(self) -> Result<TokenIssuer> {
        let key = match (self.private_key, &self.private_key_path) {
            (Some(pem), _) => KeyMaterial::new(self.key_id, pem, self.passphrase)?,
            (None, Some(path)) => KeyMaterial::from_file(self.key_id, path, self.passphrase)
                .with_context(|| format!("failed to load private key {}", path.display()))?,
            (None, None) => return Err(anyhow!("no private key configured")),
        };

        Ok(TokenIssuer::new(self.issuer_id, self.bundle_id, key)?)
    }
}

impl std::fmt::Debug for ValidatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorConfig")
            .field("issuer_id", &self.issuer_id)
            .field("bundle_id", &self.bundle_id)
            .field("key_id", &self.key_id)
            .field("private_key_path", &self.private_key_path)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{error::Error, test_support::test_key_pem};

    fn inline_config() -> serde_json::Value {
        json!({
            "issuer_id": "DEF456UVW",
            "bundle_id": "com.example",
            "key_id": "ABC123DEFG",
            "private_key": test_key_pem(),
        })
    }

    #[test]
    fn parses_inline_key() {
        let config = ValidatorConfig::from_json_str(&inline_config().to_string()).unwrap();
        assert_eq!(config.environment, Environment::Production);

        let issuer = config.into_issuer().unwrap();
        assert_eq!(issuer.issuer_id(), "DEF456UVW");
        assert_eq!(issuer.key().key_id(), "ABC123DEFG");
    }

    #[test]
    fn loads_key_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("AuthKey_ABC123DEFG.p8"), test_key_pem()).unwrap();
        let config_path = dir.path().join("validator.json");
        fs::write(
            &config_path,
            json!({
                "issuer_id": "DEF456UVW",
                "bundle_id": "com.example",
                "key_id": "ABC123DEFG",
                "private_key_path": "AuthKey_ABC123DEFG.p8",
                "environment": "sandbox",
            })
            .to_string(),
        )
        .unwrap();

        let config = ValidatorConfig::load(&config_path).unwrap();
        assert_eq!(config.environment, Environment::Sandbox);
        assert_eq!(
            config.private_key_path.as_deref(),
            Some(dir.path().join("AuthKey_ABC123DEFG.p8").as_path())
        );
        assert_eq!(config.into_issuer().unwrap().bundle_id(), "com.example");
    }

    #[test]
    fn requires_exactly_one_key_source() {
        let mut both = inline_config();
        both["private_key_path"] = json!("AuthKey.p8");
        assert!(ValidatorConfig::from_json_str(&both.to_string()).is_err());

        let mut neither = inline_config();
        neither.as_object_mut().unwrap().remove("private_key");
        assert!(ValidatorConfig::from_json_str(&neither.to_string()).is_err());
    }

    #[test]
    fn core_errors_stay_downcastable() {
        let mut config = inline_config();
        config["private_key"] = json!("not a key");
        let err = ValidatorConfig::from_json_str(&config.to_string())
            .unwrap()
            .into_issuer()
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidKey(_))));

        let mut config = inline_config();
        config["issuer_id"] = json!("");
        let err = ValidatorConfig::from_json_str(&config.to_string())
            .unwrap()
            .into_issuer()
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Configuration(_))));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = ValidatorConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn debug_omits_secrets() {
        let mut config = inline_config();
        config["passphrase"] = json!("hunter2");
        let config = ValidatorConfig::from_json_str(&config.to_string()).unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("PRIVATE KEY"));
        assert!(!debug.contains("hunter2"));
    }
}
