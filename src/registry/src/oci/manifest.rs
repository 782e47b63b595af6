//! OCI wire structures: descriptors, image indexes and image manifests.
//!
//! Only the fields referrer discovery reads are modelled. Unknown fields are
//! ignored and `null` collections decode as empty, since registries in the
//! wild are not consistent about either.

use std::collections::BTreeMap;

use a3s_inspect_core::annotations::{
    ATTESTATION_MANIFEST, COSIGN_PREDICATE_TYPE, DOCKER_REFERENCE_DIGEST, DOCKER_REFERENCE_TYPE,
    IN_TOTO_PREDICATE_TYPE, OCI_IMAGE_INDEX, OCI_IMAGE_MANIFEST,
};
use serde::{Deserialize, Deserializer, Serialize};

/// Content descriptor as found in index `manifests`, manifest `layers` and
/// referrers API responses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Declared artifact type, empty when absent.
    pub fn artifact_type(&self) -> &str {
        self.artifact_type.as_deref().unwrap_or_default()
    }

    /// Predicate type of an attestation layer: the in-toto key, else cosign's.
    pub fn predicate_type(&self) -> Option<&str> {
        self.annotation(IN_TOTO_PREDICATE_TYPE)
            .or_else(|| self.annotation(COSIGN_PREDICATE_TYPE))
    }

    /// BuildKit attestation manifest embedded in an image index.
    pub fn is_attestation_manifest(&self) -> bool {
        self.annotation(DOCKER_REFERENCE_TYPE) == Some(ATTESTATION_MANIFEST)
    }

    /// Digest of the platform manifest a BuildKit entry describes.
    pub fn reference_digest(&self) -> Option<&str> {
        self.annotation(DOCKER_REFERENCE_DIGEST)
    }

    /// A runnable platform manifest: has a platform that is not
    /// `unknown/unknown` and carries no reference type.
    pub fn is_platform_manifest(&self) -> bool {
        match &self.platform {
            Some(platform) => {
                !platform.is_unknown() && !self.annotations.contains_key(DOCKER_REFERENCE_TYPE)
            }
            None => false,
        }
    }

    /// An artifact listed directly in an image index (artifact type, no platform).
    pub fn is_index_artifact(&self) -> bool {
        self.platform.is_none() && !self.artifact_type().is_empty()
    }
}

/// Target platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// BuildKit marks attestation manifests with `unknown/unknown`.
    pub fn is_unknown(&self) -> bool {
        self.os == "unknown" && self.architecture == "unknown"
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// OCI image index or Docker manifest list. Also the shape of a referrers
/// API response and of a referrers fallback tag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub manifests: Vec<Descriptor>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
}

/// OCI image manifest (also Docker schema 2).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
}

impl ImageManifest {
    /// Manifest media type, defaulting to the OCI manifest type.
    pub fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or(OCI_IMAGE_MANIFEST)
    }
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Media type of raw manifest bytes.
///
/// Uses the `mediaType` field when present; otherwise an object with
/// `manifests` is an OCI index and anything else an OCI manifest.
pub fn detect_media_type(manifest: &[u8]) -> String {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sniff {
        #[serde(default)]
        media_type: Option<String>,
        #[serde(default)]
        manifests: Option<serde_json::Value>,
    }

    match serde_json::from_slice::<Sniff>(manifest) {
        Ok(Sniff {
            media_type: Some(media_type),
            ..
        }) if !media_type.is_empty() => media_type,
        Ok(Sniff {
            manifests: Some(_), ..
        }) => OCI_IMAGE_INDEX.to_string(),
        _ => OCI_IMAGE_MANIFEST.to_string(),
    }
}

/// Cosign tag suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CosignSuffix {
    Signature,
    Attestation,
}

impl CosignSuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "sig",
            Self::Attestation => "att",
        }
    }
}

/// Referrers fallback tag for `digest`: `sha256:abc` becomes `sha256-abc`.
pub fn referrers_tag(digest: &str) -> Option<String> {
    let (algorithm, encoded) = digest.split_once(':')?;
    if algorithm.is_empty() || encoded.is_empty() || encoded.contains(':') {
        return None;
    }
    Some(format!("{}-{}", algorithm, encoded))
}

/// Cosign tag for `digest`: `sha256-abc.sig` or `sha256-abc.att`.
pub fn cosign_tag(digest: &str, suffix: CosignSuffix) -> Option<String> {
    referrers_tag(digest).map(|tag| format!("{}.{}", tag, suffix.as_str()))
}

/// Shorten a digest for log output: `sha256:` plus 12 hex characters.
pub fn truncate_digest(digest: &str) -> String {
    match digest.split_once(':') {
        Some((algorithm, encoded)) if encoded.len() > 12 && encoded.is_char_boundary(12) => {
            format!("{}:{}...", algorithm, &encoded[..12])
        }
        _ => digest.to_string(),
    }
}
