//! Attestation manifest extraction.
//!
//! An attestation manifest (BuildKit's index-embedded kind, or cosign's
//! `.att` tag) bundles several in-toto predicates as layers. Each
//! recognised layer becomes its own referrer, keyed by the layer digest, so
//! an SBOM and a provenance statement under one manifest stay distinct.

use std::collections::BTreeMap;
use std::sync::Arc;

use a3s_inspect_core::annotations::IN_TOTO_PREDICATE_TYPE;
use a3s_inspect_core::error::Result;
use a3s_inspect_core::{DiscoveryMechanism, Referrer, ReferrerKind};

use crate::classify::classify_predicate_type;
use crate::oci::{truncate_digest, ImageReference, RegistryTransport};

/// Artifact type of the referrer emitted for a manifest with no recognised layer.
pub const GENERIC_ATTESTATION: &str = "attestation";

/// Expands attestation manifests into per-layer referrers.
#[derive(Clone)]
pub struct AttestationExtractor {
    transport: Arc<dyn RegistryTransport>,
    verbose: bool,
}

impl AttestationExtractor {
    pub fn new(transport: Arc<dyn RegistryTransport>) -> Self {
        Self {
            transport,
            verbose: false,
        }
    }

    /// Log every extracted layer at debug level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Fetch the manifest at `manifest_digest` and emit one referrer per
    /// sbom, vex or attestation layer.
    ///
    /// `carried` annotations are copied onto every emitted referrer. When no
    /// layer is recognised a single generic attestation referrer for the
    /// manifest itself is returned, using `declared_size`. Fails only if the
    /// manifest cannot be fetched or parsed.
    pub async fn extract(
        &self,
        repository: &ImageReference,
        manifest_digest: &str,
        declared_size: i64,
        carried: &BTreeMap<String, String>,
        mechanism: DiscoveryMechanism,
    ) -> Result<Vec<Referrer>> {
        let manifest = self
            .transport
            .get_image_manifest(&repository.with_digest(manifest_digest))
            .await?;

        let mut referrers = Vec::new();
        for layer in &manifest.layers {
            let Some(predicate_type) = layer.predicate_type() else {
                continue;
            };
            let kind = classify_predicate_type(predicate_type);
            if !matches!(
                kind,
                ReferrerKind::Sbom | ReferrerKind::Vex | ReferrerKind::Attestation
            ) {
                continue;
            }

            let mut annotations = carried.clone();
            annotations.insert(IN_TOTO_PREDICATE_TYPE.to_string(), predicate_type.to_string());

            if self.verbose {
                tracing::debug!(
                    manifest = %truncate_digest(manifest_digest),
                    layer = %truncate_digest(&layer.digest),
                    kind = %kind,
                    predicate_type,
                    size = layer.size,
                    "Extracted attestation layer"
                );
            }

            referrers.push(Referrer {
                kind,
                media_type: layer.media_type.clone(),
                digest: layer.digest.clone(),
                size: layer.size,
                artifact_type: predicate_type.to_string(),
                annotations,
                signature_info: None,
                mechanism,
            });
        }

        if referrers.is_empty() {
            if self.verbose {
                tracing::debug!(
                    manifest = %truncate_digest(manifest_digest),
                    layers = manifest.layers.len(),
                    "No recognised predicate, reporting generic attestation"
                );
            }
            referrers.push(Referrer {
                kind: ReferrerKind::Attestation,
                media_type: manifest.media_type().to_string(),
                digest: manifest_digest.to_string(),
                size: declared_size,
                artifact_type: GENERIC_ATTESTATION.to_string(),
                annotations: carried.clone(),
                signature_info: None,
                mechanism,
            });
        }

        Ok(referrers)
    }
}
