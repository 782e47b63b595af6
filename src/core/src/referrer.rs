//! Referrer data model.
//!
//! A referrer is an artifact (signature, SBOM, attestation, VEX document,
//! vulnerability scan) attached to an image or platform manifest by digest.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::annotations::DOCKER_REFERENCE_DIGEST;

/// Semantic category of a referrer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferrerKind {
    Signature,
    Sbom,
    Attestation,
    Vex,
    VulnerabilityScan,
    Artifact,
}

impl ReferrerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Sbom => "sbom",
            Self::Attestation => "attestation",
            Self::Vex => "vex",
            Self::VulnerabilityScan => "vulnerability-scan",
            Self::Artifact => "artifact",
        }
    }
}

impl std::fmt::Display for ReferrerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReferrerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "signature" => Ok(Self::Signature),
            "sbom" => Ok(Self::Sbom),
            "attestation" => Ok(Self::Attestation),
            "vex" => Ok(Self::Vex),
            "vulnerability-scan" => Ok(Self::VulnerabilityScan),
            "artifact" => Ok(Self::Artifact),
            _ => Err(format!("unknown referrer type: '{}'", s)),
        }
    }
}

/// How a referrer was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMechanism {
    /// `GET /v2/<name>/referrers/<digest>`
    #[default]
    OciReferrersApi,
    /// `<alg>-<hex>` tag holding a referrers index
    ReferrersTagFallback,
    /// `<alg>-<hex>.sig` / `.att` tags
    CosignTagScheme,
    /// Attestation manifests embedded in the image index
    BuildkitAttestationManifest,
    /// Artifacts listed directly in the image index
    ImageIndexArtifact,
}

impl DiscoveryMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OciReferrersApi => "oci-referrers-api",
            Self::ReferrersTagFallback => "referrers-tag-fallback",
            Self::CosignTagScheme => "cosign-tag-scheme",
            Self::BuildkitAttestationManifest => "buildkit-attestation-manifest",
            Self::ImageIndexArtifact => "image-index-artifact",
        }
    }
}

impl std::fmt::Display for DiscoveryMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signer details read from a cosign signing certificate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub issuer: String,
    pub identity: String,
}

/// A discovered supply-chain artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referrer {
    #[serde(rename = "type")]
    pub kind: ReferrerKind,
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    pub artifact_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_info: Option<SignatureInfo>,
    #[serde(skip)]
    pub mechanism: DiscoveryMechanism,
}

impl Referrer {
    /// Digest of the platform manifest (or index) this referrer is linked to.
    pub fn reference_digest(&self) -> Option<&str> {
        self.annotations
            .get(DOCKER_REFERENCE_DIGEST)
            .map(String::as_str)
            .filter(|d| !d.is_empty())
    }

    /// Link this referrer to `digest`, replacing any previous link.
    pub fn set_reference_digest(&mut self, digest: impl Into<String>) {
        self.annotations
            .insert(DOCKER_REFERENCE_DIGEST.to_string(), digest.into());
    }
}

/// Digest-keyed referrer collection.
///
/// The first referrer inserted for a digest is kept. A later insert for the
/// same digest only contributes its reference-digest annotation, and only
/// when the kept entry has none.
#[derive(Debug, Default)]
pub struct ReferrerSet {
    entries: Vec<Referrer>,
    positions: HashMap<String, usize>,
}

impl ReferrerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `referrer`. Returns true if its digest was not present.
    pub fn insert(&mut self, referrer: Referrer) -> bool {
        if let Some(&pos) = self.positions.get(&referrer.digest) {
            let existing = &mut self.entries[pos];
            if existing.reference_digest().is_none() {
                if let Some(link) = referrer.reference_digest() {
                    let link = link.to_string();
                    existing.set_reference_digest(link);
                }
            }
            return false;
        }
        self.positions
            .insert(referrer.digest.clone(), self.entries.len());
        self.entries.push(referrer);
        true
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.positions.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Referrer> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<Referrer> {
        self.entries
    }
}
