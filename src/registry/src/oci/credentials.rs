//! Registry credentials.
//!
//! Credentials are resolved per registry from, in order: explicit
//! configuration, the Docker `config.json` keychain, the
//! `REGISTRY_USERNAME` / `REGISTRY_PASSWORD` environment variables, and
//! finally anonymous access.

use std::collections::HashMap;
use std::path::PathBuf;

use a3s_inspect_core::config::RegistryConfig;
use a3s_inspect_core::error::{InspectError, Result};
use base64::Engine;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;

/// Authentication credentials for a container registry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if either is unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    /// Resolve credentials for `registry`: configuration, then the Docker
    /// keychain, then environment variables, then anonymous.
    pub fn resolve(registry: &str, config: &RegistryConfig) -> Self {
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            return Self::basic(username, password);
        }
        if let Some(keychain) = DockerKeychain::default_path() {
            match keychain.get(registry) {
                Ok(Some((username, password))) => return Self::basic(username, password),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(registry, error = %e, "Ignoring unreadable Docker config");
                }
            }
        }
        Self::from_env()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    /// `(username, password)` for HTTP basic authentication.
    pub fn basic_credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    /// Convert to oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Per-registry entry in a Docker `config.json`.
#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Docker `config.json` file format (only `auths` is read).
#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// Read-only view of the Docker CLI credential file.
pub struct DockerKeychain {
    path: PathBuf,
}

impl DockerKeychain {
    /// `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`.
    pub fn default_path() -> Option<Self> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Some(Self::new(PathBuf::from(dir).join("config.json")));
        }
        let home = dirs::home_dir()?;
        Some(Self::new(home.join(".docker").join("config.json")))
    }

    /// Create a keychain reading a custom path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get credentials for a registry. Returns `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        let wanted = normalize_registry(registry);
        let entry = file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);

        let Some(entry) = entry else {
            return Ok(None);
        };

        if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
            return Ok(Some((username.clone(), password.clone())));
        }
        match entry.auth.as_deref() {
            Some(auth) if !auth.is_empty() => decode_auth(auth).map(Some).map_err(|e| {
                InspectError::ConfigError(format!(
                    "Invalid auth entry for {} in {}: {}",
                    registry,
                    self.path.display(),
                    e
                ))
            }),
            _ => Ok(None),
        }
    }

    /// Load the config file from disk. Returns empty if not found.
    fn load(&self) -> Result<DockerConfigFile> {
        if !self.path.exists() {
            return Ok(DockerConfigFile::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&data).map_err(|e| {
            InspectError::ConfigError(format!(
                "Failed to parse Docker config {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Decode a base64 `user:password` auth string.
fn decode_auth(auth: &str) -> std::result::Result<(String, String), String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth.trim())
        .map_err(|e| e.to_string())?;
    let decoded = String::from_utf8(decoded).map_err(|e| e.to_string())?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| "expected user:password".to_string())?;
    Ok((username.to_string(), password.to_string()))
}

/// Normalize registry names (e.g., "docker.io", "https://index.docker.io/v1/"
/// → "index.docker.io").
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    let host = r.split('/').next().unwrap_or_default();
    if host == "docker.io" || host == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        host.to_string()
    }
}
