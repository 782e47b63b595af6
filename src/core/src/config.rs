use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{InspectError, Result};

/// Inspection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    /// Emit per-artifact detail (classification, lookup outcomes) at debug level
    pub verbose: bool,

    /// Registry access
    pub registry: RegistryConfig,

    /// Discovery mechanisms
    pub discovery: DiscoveryConfig,
}

impl InspectConfig {
    /// Parse a YAML configuration document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&data)?;
        tracing::debug!(
            path = %path.display(),
            verbose = config.verbose,
            timeout_secs = config.registry.request_timeout_secs,
            "Loaded inspect configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.request_timeout_secs == 0 {
            return Err(InspectError::ConfigError(
                "registry.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.registry.username.is_some() != self.registry.password.is_some() {
            return Err(InspectError::ConfigError(
                "registry.username and registry.password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wire protocol used to talk to registries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryProtocol {
    #[default]
    Https,
    Http,
}

/// Registry access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Default protocol for all registries
    pub protocol: RegistryProtocol,

    /// Registries reached over plain HTTP regardless of `protocol` (e.g. "localhost:5000")
    pub http_registries: Vec<String>,

    /// Explicit credentials, used before the Docker keychain and environment
    pub username: Option<String>,
    pub password: Option<String>,

    /// Per-request timeout applied to every registry call
    pub request_timeout_secs: u64,

    /// User agent sent with referrers API requests
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            protocol: RegistryProtocol::Https,
            http_registries: Vec::new(),
            username: None,
            password: None,
            request_timeout_secs: 30,
            user_agent: format!("a3s-inspect/{}", crate::VERSION),
        }
    }
}

impl RegistryConfig {
    /// Protocol to use for `registry`.
    pub fn protocol_for(&self, registry: &str) -> RegistryProtocol {
        if self.http_registries.iter().any(|r| r == registry) {
            RegistryProtocol::Http
        } else {
            self.protocol
        }
    }
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Read signer identity and OIDC issuer from cosign signing certificates
    pub enrich_signatures: bool,

    /// Look up `<alg>-<hex>.sig` / `.att` tags
    pub cosign_tags: bool,

    /// Read the `<alg>-<hex>` referrers tag when the referrers API returns nothing
    pub referrers_tag_fallback: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enrich_signatures: true,
            cosign_tags: true,
            referrers_tag_fallback: true,
        }
    }
}
