//! Image and repository reference parsing.
//!
//! Parses references like `ghcr.io/org/app:v1` or `app@sha256:...` into
//! structured components, and derives sibling references (same repository,
//! different tag or digest) for the discovery lookups.

use a3s_inspect_core::error::{InspectError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, optionally with port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/app")
    pub repository: String,
    /// Tag (e.g., "latest", "v1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `ghcr.io/org/app:v1` → ghcr.io/org/app:v1
    /// - `ghcr.io/org/app@sha256:abc...`
    /// - `localhost:5000/app:dev`
    pub fn parse(reference: &str) -> Result<Self> {
        let mut parsed = Self::parse_parts(reference)?;
        if parsed.tag.is_none() && parsed.digest.is_none() {
            parsed.tag = Some(DEFAULT_TAG.to_string());
        }
        Ok(parsed)
    }

    /// Parse a bare repository reference (`ghcr.io/org/app`).
    ///
    /// A tag or digest, if present, is rejected.
    pub fn repository(reference: &str) -> Result<Self> {
        let parsed = Self::parse_parts(reference)?;
        if parsed.tag.is_some() || parsed.digest.is_some() {
            return Err(InspectError::InvalidReference(format!(
                "Expected a repository without tag or digest: '{}'",
                reference.trim()
            )));
        }
        Ok(parsed)
    }

    fn parse_parts(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(InspectError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(InspectError::InvalidReference(format!(
                "Whitespace in reference '{}'",
                reference
            )));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                validate_digest(digest).map_err(|msg| {
                    InspectError::InvalidReference(format!(
                        "Invalid digest in reference '{}': {}",
                        reference, msg
                    ))
                })?;
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag is a colon after the last slash. With no slash, a numeric
        // suffix is a registry port rather than a tag.
        let last_segment_start = name_tag.rfind('/').map_or(0, |p| p + 1);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let colon = last_segment_start + colon;
                let after = &name_tag[colon + 1..];
                if last_segment_start == 0 && after.chars().all(|c| c.is_ascii_digit()) {
                    (name_tag, None)
                } else {
                    (&name_tag[..colon], Some(after.to_string()))
                }
            }
            None => (name_tag, None),
        };

        if let Some(ref tag) = tag {
            if tag.is_empty() || tag.len() > 128 {
                return Err(InspectError::InvalidReference(format!(
                    "Invalid tag in reference '{}'",
                    reference
                )));
            }
        }

        let (registry, repository) = Self::split_registry_repository(name)?;

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        // The first component is a registry if it looks like a hostname
        // (contains a dot or colon, or is "localhost")
        if let Some((first, rest)) = name.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                if rest.is_empty() {
                    return Err(InspectError::InvalidReference(format!(
                        "Empty repository in reference '{}'",
                        name
                    )));
                }
                return Ok((first.to_string(), validate_repository(rest)?));
            }
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            // Docker Hub official images live under library/
            format!("library/{}", name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), validate_repository(&repository)?))
    }

    /// Same repository, addressed by `digest`.
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }

    /// Same repository, addressed by `tag`.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

fn validate_repository(repository: &str) -> Result<String> {
    let valid = repository.split('/').all(|component| {
        !component.is_empty()
            && component.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
            })
    });
    if !valid {
        return Err(InspectError::InvalidReference(format!(
            "Invalid repository name '{}'",
            repository
        )));
    }
    Ok(repository.to_string())
}

/// Check `algorithm:hex` digest syntax.
pub(crate) fn validate_digest(digest: &str) -> std::result::Result<(), String> {
    let (algorithm, encoded) = digest
        .split_once(':')
        .ok_or_else(|| "expected algorithm:hex".to_string())?;
    if algorithm.is_empty() || encoded.is_empty() {
        return Err("expected algorithm:hex".to_string());
    }
    if !encoded.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("non-hex characters in '{}'", encoded));
    }
    Ok(())
}
