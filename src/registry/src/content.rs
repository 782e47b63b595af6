//! SBOM and VEX content retrieval.
//!
//! The digest handed in is either an attestation manifest (its first matching
//! layer is read) or a layer digest reported by the extractor (read as a blob
//! directly). The layer is unwrapped before it is returned.

use std::sync::Arc;

use a3s_inspect_core::error::{InspectError, Result};
use a3s_inspect_core::{ReferrerKind, VexDocument};
use serde::Serialize;

use crate::classify::classify_predicate_type;
use crate::envelope::{pretty_json, unwrap_envelope};
use crate::oci::{truncate_digest, ImageReference, RegistryTransport};

/// Content type reported for unwrapped SBOMs.
const SBOM_CONTENT_TYPE: &str = "application/json";

/// An unwrapped, pretty-printed SBOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SbomContent {
    #[serde(skip)]
    pub content: Vec<u8>,
    pub content_type: String,
    /// Empty when the document was stored unwrapped with no layer annotation.
    pub predicate_type: String,
    /// Digest the content was read from.
    pub digest: String,
}

/// A predicate read from the registry.
struct Predicate {
    digest: String,
    predicate_type: String,
    data: Vec<u8>,
}

/// Reads SBOM and VEX documents from attestation manifests and layers.
#[derive(Clone)]
pub struct ContentLookup {
    transport: Arc<dyn RegistryTransport>,
}

impl ContentLookup {
    pub fn new(transport: Arc<dyn RegistryTransport>) -> Self {
        Self { transport }
    }

    /// Fetch the SBOM at `digest`.
    pub async fn fetch_sbom(&self, repository: &ImageReference, digest: &str) -> Result<SbomContent> {
        let predicate = self.fetch_predicate(repository, digest, is_sbom, "SBOM").await?;
        Ok(SbomContent {
            content: pretty_json(&predicate.data),
            content_type: SBOM_CONTENT_TYPE.to_string(),
            predicate_type: predicate.predicate_type,
            digest: predicate.digest,
        })
    }

    /// Fetch and parse the OpenVEX document at `digest`.
    pub async fn fetch_vex(&self, repository: &ImageReference, digest: &str) -> Result<VexDocument> {
        let predicate = self.fetch_predicate(repository, digest, is_vex, "VEX").await?;
        VexDocument::from_slice(&predicate.data)
    }

    /// Tags in `repository`.
    pub async fn list_tags(&self, repository: &ImageReference) -> Result<Vec<String>> {
        self.transport.list_tags(repository).await
    }

    async fn fetch_predicate(
        &self,
        repository: &ImageReference,
        digest: &str,
        wanted: fn(&str) -> bool,
        what: &str,
    ) -> Result<Predicate> {
        let (layer_digest, layer_predicate_type) = match self
            .transport
            .get_image_manifest(&repository.with_digest(digest))
            .await
        {
            Ok(manifest) => {
                let layer = manifest
                    .layers
                    .iter()
                    .find(|layer| layer.predicate_type().is_some_and(wanted))
                    .ok_or_else(|| {
                        InspectError::NotFound(format!("No {} layer in manifest {}", what, digest))
                    })?;
                (
                    layer.digest.clone(),
                    layer.predicate_type().unwrap_or_default().to_string(),
                )
            }
            Err(e) => {
                tracing::debug!(
                    digest = %truncate_digest(digest),
                    error = %e,
                    "Not a readable manifest, fetching as blob"
                );
                (digest.to_string(), String::new())
            }
        };

        let blob = self.transport.get_blob(repository, &layer_digest).await?;
        let envelope = unwrap_envelope(&blob);
        let predicate_type = if envelope.is_wrapped() {
            envelope.predicate_type
        } else {
            layer_predicate_type
        };

        tracing::debug!(
            digest = %truncate_digest(&layer_digest),
            predicate_type = %predicate_type,
            size = envelope.predicate.len(),
            "Fetched {}",
            what
        );

        Ok(Predicate {
            digest: layer_digest,
            predicate_type,
            data: envelope.predicate,
        })
    }
}

fn is_sbom(predicate_type: &str) -> bool {
    classify_predicate_type(predicate_type) == ReferrerKind::Sbom
        || predicate_type.to_lowercase().contains("syft")
}

fn is_vex(predicate_type: &str) -> bool {
    classify_predicate_type(predicate_type) == ReferrerKind::Vex
}
