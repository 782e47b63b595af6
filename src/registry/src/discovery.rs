//! Referrer discovery orchestration.
//!
//! Resolves an image, then runs every discovery mechanism concurrently and
//! merges the results into one digest-keyed set:
//!
//! ```text
//!                       resolve(image)
//!                            │
//!            ┌───────────────┼────────────────────┐
//!            ▼               ▼                    ▼
//!     top-level digest   platform digests   attestation manifests
//!            │               │                    │
//!   referrers API ──► tag fallback (if empty)     extractor
//!   cosign .sig / .att    (stamped)               (stamped)
//!            │               │                    │
//!            └───────────────┴─────► ReferrerSet ◄┘
//!                                        │
//!                               signature enrichment
//! ```
//!
//! [`ReferrerDiscovery::inspect`] also reads each platform's manifest and
//! config blob alongside the referrer lookups.
//!
//! Every mechanism swallows its own errors. Only a malformed reference or a
//! failure to resolve the top-level digest fails the call.

use std::collections::BTreeMap;
use std::sync::Arc;

use a3s_inspect_core::annotations::{
    is_index_media_type, COSIGN_SIGNATURE_ARTIFACT_TYPE, DOCKER_REFERENCE_DIGEST,
};
use a3s_inspect_core::error::{InspectError, Result};
use a3s_inspect_core::{
    DiscoveryConfig, DiscoveryMechanism, InspectConfig, Referrer, ReferrerKind, ReferrerSet,
};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::attestation::AttestationExtractor;
use crate::classify::classify;
use crate::oci::{
    cosign_tag, referrers_tag, truncate_digest, CosignSuffix, Descriptor, ImageConfig, ImageIndex,
    ImageManifest, ImageReference, OciTransport, RegistryTransport,
};
use crate::signature::SignatureEnricher;

/// A runnable manifest listed in an image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformManifest {
    pub digest: String,
    pub media_type: String,
    pub size: i64,
    pub os: String,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Image configuration, absent when it could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ImageConfig>,
}

/// Result of inspecting one image reference.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInspection {
    /// Normalized reference that was inspected.
    pub reference: String,
    /// `registry/repository`.
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Top-level digest (index digest for multi-platform images).
    pub digest: String,
    pub media_type: String,
    /// The index itself, for multi-platform images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<ImageIndex>,
    /// Empty for single-platform images.
    pub platforms: Vec<PlatformManifest>,
    /// First platform whose image could be read. `manifest` and `config`
    /// describe this platform; `None` for single-platform images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ImageManifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ImageConfig>,
    /// Deduplicated referrers, in no particular order.
    pub referrers: Vec<Referrer>,
}

impl ImageInspection {
    /// Referrers linked to `platform_digest`.
    pub fn referrers_for_platform<'a>(
        &'a self,
        platform_digest: &'a str,
    ) -> impl Iterator<Item = &'a Referrer> + 'a {
        self.referrers
            .iter()
            .filter(move |r| r.reference_digest() == Some(platform_digest))
    }

    /// Referrers of `kind`.
    pub fn referrers_of_kind(&self, kind: ReferrerKind) -> impl Iterator<Item = &Referrer> + '_ {
        self.referrers.iter().filter(move |r| r.kind == kind)
    }
}

/// Discovers the supply-chain artifacts attached to container images.
pub struct ReferrerDiscovery {
    transport: Arc<dyn RegistryTransport>,
    extractor: AttestationExtractor,
    enricher: SignatureEnricher,
    config: DiscoveryConfig,
    verbose: bool,
}

impl ReferrerDiscovery {
    pub fn new(transport: Arc<dyn RegistryTransport>, config: &InspectConfig) -> Self {
        Self {
            extractor: AttestationExtractor::new(transport.clone()).with_verbose(config.verbose),
            enricher: SignatureEnricher::new(transport.clone()),
            transport,
            config: config.discovery.clone(),
            verbose: config.verbose,
        }
    }

    /// Discovery over the network with an [`OciTransport`] built from `config`.
    pub fn connect(config: &InspectConfig) -> Result<Self> {
        config.validate()?;
        let transport = OciTransport::new(config.registry.clone())?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Deduplicated referrers of `image`. Image manifests and configs are
    /// not read.
    pub async fn discover(&self, image: &str) -> Result<Vec<Referrer>> {
        let reference = ImageReference::parse(image)?;
        Ok(self.run(&reference, false).await?.referrers)
    }

    /// Resolve `image`, read its platforms, manifests and configs, and
    /// discover its referrers.
    pub async fn inspect(&self, image: &str) -> Result<ImageInspection> {
        let reference = ImageReference::parse(image)?;
        self.inspect_reference(&reference).await
    }

    pub async fn inspect_reference(&self, reference: &ImageReference) -> Result<ImageInspection> {
        self.run(reference, true).await
    }

    async fn run(&self, reference: &ImageReference, with_details: bool) -> Result<ImageInspection> {
        let top = self.transport.resolve(reference).await?;
        let repository = reference.with_digest(&top.digest);

        tracing::info!(
            reference = %reference,
            digest = %truncate_digest(&top.digest),
            media_type = %top.media_type,
            "Discovering referrers"
        );

        let mut platforms = Vec::new();
        let mut attestation_manifests = Vec::new();
        let mut index_artifacts = Vec::new();
        let mut image_index = None;

        if is_index_media_type(&top.media_type) {
            match self.transport.get_image_index(&repository).await {
                Ok(index) => {
                    image_index = Some(index.clone());
                    for entry in index.manifests {
                        if entry.is_index_artifact() {
                            index_artifacts.push(entry.clone());
                        }
                        if entry.is_attestation_manifest() {
                            attestation_manifests.push(entry);
                        } else if entry.is_platform_manifest() && entry.digest != top.digest {
                            platforms.push(entry);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        digest = %truncate_digest(&top.digest),
                        error = %e,
                        "Failed to read image index, using top-level digest only"
                    );
                }
            }
        }

        let accumulator = Arc::new(Mutex::new(ReferrerSet::new()));
        let scan = Scan {
            transport: self.transport.clone(),
            extractor: self.extractor.clone(),
            repository: repository.clone(),
            accumulator: accumulator.clone(),
            tag_fallback: self.config.referrers_tag_fallback,
            verbose: self.verbose,
        };

        // Index-embedded artifacts need no network call and go in first.
        let embedded: Vec<Referrer> = index_artifacts
            .iter()
            .map(|entry| referrer_from_descriptor(entry, DiscoveryMechanism::ImageIndexArtifact))
            .collect();
        scan.merge(embedded, "image index");

        // Image details are read alongside discovery. Slot `i` is platform
        // `i`; a single-platform image uses slot 0 for the top digest.
        let mut details = JoinSet::new();
        if with_details {
            let digests: Vec<&String> = if is_index_media_type(&top.media_type) {
                platforms.iter().map(|p| &p.digest).collect()
            } else {
                vec![&top.digest]
            };
            for (slot, digest) in digests.into_iter().enumerate() {
                let transport = self.transport.clone();
                let image = repository.with_digest(digest);
                details.spawn(async move { (slot, fetch_image(transport, image).await) });
            }
        }

        let mut tasks = JoinSet::new();
        tasks.spawn(scan.clone().referrers(top.digest.clone(), false));
        for platform in &platforms {
            tasks.spawn(scan.clone().referrers(platform.digest.clone(), true));
        }
        for entry in attestation_manifests {
            tasks.spawn(scan.clone().attestation_manifest(entry));
        }
        if self.config.cosign_tags {
            let digests = std::iter::once(&top.digest).chain(platforms.iter().map(|p| &p.digest));
            for digest in digests {
                tasks.spawn(scan.clone().cosign_signature(digest.clone()));
                tasks.spawn(scan.clone().cosign_attestation(digest.clone()));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Discovery task aborted");
            }
        }

        let mut images: Vec<Option<ImageDetails>> = Vec::new();
        while let Some(joined) = details.join_next().await {
            match joined {
                Ok((slot, Ok(image))) => {
                    if images.len() <= slot {
                        images.resize_with(slot + 1, || None);
                    }
                    images[slot] = Some(image);
                }
                Ok((slot, Err(e))) => {
                    tracing::debug!(slot, error = %e, "Failed to read image details");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Image details task aborted");
                }
            }
        }

        let mut referrers = std::mem::take(&mut *accumulator.lock()).into_vec();

        if self.config.enrich_signatures {
            self.enrich_signatures(&repository, &mut referrers).await;
        }

        tracing::info!(
            reference = %reference,
            platforms = platforms.len(),
            referrers = referrers.len(),
            "Referrer discovery complete"
        );

        let mut platform_manifests: Vec<PlatformManifest> =
            platforms.iter().filter_map(platform_manifest).collect();
        let mut platform_digest = None;
        let mut selected = None;

        if is_index_media_type(&top.media_type) {
            // Slots follow index order, so the first readable platform wins.
            for (slot, image) in images.into_iter().enumerate() {
                let (Some(image), Some(entry)) = (image, platforms.get(slot)) else {
                    continue;
                };
                let platform = platform_manifests.iter_mut().find(|p| p.digest == entry.digest);
                if let Some(platform) = platform {
                    platform.config = Some(image.config.clone());
                }
                if selected.is_none() {
                    platform_digest = Some(entry.digest.clone());
                    selected = Some(image);
                }
            }
        } else {
            selected = images.into_iter().next().flatten();
        }

        if self.verbose {
            if let Some(ref image) = selected {
                tracing::debug!(
                    platform = ?platform_digest.as_deref().map(truncate_digest),
                    layers = image.manifest.layers.len(),
                    history = image.config.history.len(),
                    "Image details"
                );
            }
        }

        let (manifest, config) = match selected {
            Some(image) => (Some(image.manifest), Some(image.config)),
            None => (None, None),
        };

        Ok(ImageInspection {
            reference: reference.full_reference(),
            repository: reference.repository_name(),
            tag: reference.tag.clone(),
            digest: top.digest,
            media_type: top.media_type,
            index: image_index,
            platforms: platform_manifests,
            platform_digest,
            manifest,
            config,
            referrers,
        })
    }

    async fn enrich_signatures(&self, repository: &ImageReference, referrers: &mut [Referrer]) {
        let targets: Vec<(usize, String)> = referrers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.kind == ReferrerKind::Signature)
            .map(|(i, r)| (i, r.digest.clone()))
            .collect();

        let lookups = targets.iter().map(|(i, digest)| async move {
            (*i, self.enricher.enrich(repository, digest).await)
        });

        for (i, info) in join_all(lookups).await {
            if self.verbose {
                if let Some(ref info) = info {
                    tracing::debug!(
                        digest = %truncate_digest(&referrers[i].digest),
                        identity = %info.identity,
                        issuer = %info.issuer,
                        "Signature signer"
                    );
                }
            }
            referrers[i].signature_info = info;
        }
    }
}

/// Per-inspection state shared by the discovery tasks.
#[derive(Clone)]
struct Scan {
    transport: Arc<dyn RegistryTransport>,
    extractor: AttestationExtractor,
    repository: ImageReference,
    accumulator: Arc<Mutex<ReferrerSet>>,
    tag_fallback: bool,
    verbose: bool,
}

impl Scan {
    /// Insert `referrers`, returning how many were new.
    fn merge(&self, referrers: Vec<Referrer>, source: &str) -> usize {
        let mut set = self.accumulator.lock();
        let mut added = 0;
        for referrer in referrers {
            if self.verbose {
                tracing::debug!(
                    source,
                    kind = %referrer.kind,
                    digest = %truncate_digest(&referrer.digest),
                    mechanism = %referrer.mechanism,
                    "Referrer"
                );
            }
            if set.insert(referrer) {
                added += 1;
            }
        }
        added
    }

    /// Referrers API on `digest`, then the fallback tag if the API gave
    /// nothing. Platform results are linked to `digest`.
    async fn referrers(self, digest: String, platform: bool) {
        let mut found = match self.transport.get_referrers(&self.repository, &digest).await {
            Ok(descriptors) if !descriptors.is_empty() => Some(
                descriptors
                    .iter()
                    .map(|d| referrer_from_descriptor(d, DiscoveryMechanism::OciReferrersApi))
                    .collect::<Vec<_>>(),
            ),
            Ok(_) => {
                tracing::debug!(digest = %truncate_digest(&digest), "Referrers API returned nothing");
                None
            }
            Err(e) => {
                tracing::debug!(digest = %truncate_digest(&digest), error = %e, "Referrers API unavailable");
                None
            }
        };

        if found.is_none() && self.tag_fallback {
            if let Some(tag) = referrers_tag(&digest) {
                match self.transport.get_image_index(&self.repository.with_tag(&tag)).await {
                    Ok(index) => {
                        found = Some(
                            index
                                .manifests
                                .iter()
                                .map(|d| {
                                    referrer_from_descriptor(d, DiscoveryMechanism::ReferrersTagFallback)
                                })
                                .collect(),
                        );
                    }
                    Err(e) => {
                        tracing::debug!(tag = %tag, error = %e, "No referrers fallback tag");
                    }
                }
            }
        }

        let Some(mut referrers) = found else {
            return;
        };
        if platform {
            for referrer in &mut referrers {
                referrer.set_reference_digest(digest.as_str());
            }
        }
        self.merge(referrers, "referrers");
    }

    /// Expand a BuildKit attestation manifest unless its digest is already known.
    async fn attestation_manifest(self, entry: Descriptor) {
        if self.accumulator.lock().contains(&entry.digest) {
            return;
        }

        let extracted = self
            .extractor
            .extract(
                &self.repository,
                &entry.digest,
                entry.size,
                &entry.annotations,
                DiscoveryMechanism::BuildkitAttestationManifest,
            )
            .await;

        match extracted {
            Ok(mut referrers) => {
                if let Some(platform_digest) = entry.reference_digest() {
                    for referrer in &mut referrers {
                        referrer.set_reference_digest(platform_digest);
                    }
                }
                self.merge(referrers, "attestation manifest");
            }
            Err(e) => {
                tracing::debug!(
                    digest = %truncate_digest(&entry.digest),
                    error = %e,
                    "Failed to read attestation manifest"
                );
            }
        }
    }

    /// `<alg>-<hex>.sig`: the tagged manifest is the signature.
    async fn cosign_signature(self, digest: String) {
        let Some(tag) = cosign_tag(&digest, CosignSuffix::Signature) else {
            return;
        };
        let signature = match self.transport.resolve(&self.repository.with_tag(&tag)).await {
            Ok(signature) => signature,
            Err(e) => {
                tracing::debug!(tag = %tag, error = %e, "No cosign signature tag");
                return;
            }
        };

        let mut referrer = Referrer {
            kind: ReferrerKind::Signature,
            media_type: signature.media_type,
            digest: signature.digest,
            size: signature.size,
            artifact_type: COSIGN_SIGNATURE_ARTIFACT_TYPE.to_string(),
            annotations: BTreeMap::new(),
            signature_info: None,
            mechanism: DiscoveryMechanism::CosignTagScheme,
        };
        referrer.set_reference_digest(digest);
        self.merge(vec![referrer], "cosign signature tag");
    }

    /// `<alg>-<hex>.att`: the tagged manifest is an attestation manifest.
    async fn cosign_attestation(self, digest: String) {
        let Some(tag) = cosign_tag(&digest, CosignSuffix::Attestation) else {
            return;
        };
        let attestation = match self.transport.resolve(&self.repository.with_tag(&tag)).await {
            Ok(attestation) => attestation,
            Err(e) => {
                tracing::debug!(tag = %tag, error = %e, "No cosign attestation tag");
                return;
            }
        };

        let carried = BTreeMap::from([(DOCKER_REFERENCE_DIGEST.to_string(), digest)]);
        match self
            .extractor
            .extract(
                &self.repository,
                &attestation.digest,
                attestation.size,
                &carried,
                DiscoveryMechanism::CosignTagScheme,
            )
            .await
        {
            Ok(referrers) => {
                self.merge(referrers, "cosign attestation tag");
            }
            Err(e) => {
                tracing::debug!(tag = %tag, error = %e, "Failed to read cosign attestation");
            }
        }
    }
}

/// Classify a descriptor reported by the referrers API, a fallback tag or
/// an image index.
fn referrer_from_descriptor(descriptor: &Descriptor, mechanism: DiscoveryMechanism) -> Referrer {
    Referrer {
        kind: classify(descriptor.artifact_type(), &descriptor.annotations),
        media_type: descriptor.media_type.clone(),
        digest: descriptor.digest.clone(),
        size: descriptor.size,
        artifact_type: descriptor.artifact_type().to_string(),
        annotations: descriptor.annotations.clone(),
        signature_info: None,
        mechanism,
    }
}

/// A platform's manifest and the config it points at.
struct ImageDetails {
    manifest: ImageManifest,
    config: ImageConfig,
}

async fn fetch_image(
    transport: Arc<dyn RegistryTransport>,
    image: ImageReference,
) -> Result<ImageDetails> {
    let manifest = transport.get_image_manifest(&image).await?;
    let config_digest = manifest
        .config
        .as_ref()
        .map(|config| config.digest.clone())
        .ok_or_else(|| InspectError::NotFound(format!("Manifest {} has no config", image)))?;
    let blob = transport.get_blob(&image, &config_digest).await?;
    let config = ImageConfig::from_slice(&blob)?;
    Ok(ImageDetails { manifest, config })
}

fn platform_manifest(descriptor: &Descriptor) -> Option<PlatformManifest> {
    let platform = descriptor.platform.as_ref()?;
    Some(PlatformManifest {
        digest: descriptor.digest.clone(),
        media_type: descriptor.media_type.clone(),
        size: descriptor.size,
        os: platform.os.clone(),
        architecture: platform.architecture.clone(),
        variant: platform.variant.clone(),
        config: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        attestation_entry, config_json, descriptor, image_json, index_json, layer, manifest_json,
        platform_entry, MockRegistry, REPO,
    };
    use a3s_inspect_core::annotations::IN_TOTO_PREDICATE_TYPE;
    use a3s_inspect_core::InspectError;
    use serde_json::json;

    const INDEX: &str = "sha256:1de0000000000000000000000000000000000000000000000000000000000000";
    const AMD64: &str = "sha256:a3d6400000000000000000000000000000000000000000000000000000000000";
    const ARM64: &str = "sha256:a4a6400000000000000000000000000000000000000000000000000000000000";
    const ATTEST: &str = "sha256:a77e570000000000000000000000000000000000000000000000000000000000";
    const IMAGE: &str = "sha256:1a6e000000000000000000000000000000000000000000000000000000000000";
    const SIG: &str = "sha256:5160000000000000000000000000000000000000000000000000000000000000";

    fn image() -> String {
        format!("{}:v1", REPO)
    }

    fn quiet_config() -> InspectConfig {
        let mut config = InspectConfig::default();
        config.discovery.cosign_tags = false;
        config.discovery.enrich_signatures = false;
        config
    }

    fn discovery(registry: &Arc<MockRegistry>, config: &InspectConfig) -> ReferrerDiscovery {
        ReferrerDiscovery::new(registry.clone(), config)
    }

    fn find<'a>(referrers: &'a [Referrer], digest: &str) -> &'a Referrer {
        referrers
            .iter()
            .find(|r| r.digest == digest)
            .unwrap_or_else(|| panic!("no referrer {}", digest))
    }

    /// Two platforms plus a BuildKit attestation manifest for amd64.
    fn multi_platform() -> Arc<MockRegistry> {
        let registry = MockRegistry::new();
        registry.add_tagged(
            "v1",
            INDEX,
            index_json(&[
                platform_entry(AMD64, "linux", "amd64"),
                platform_entry(ARM64, "linux", "arm64"),
                attestation_entry(ATTEST, AMD64, 840),
            ]),
        );
        registry.add_manifest(
            ATTEST,
            manifest_json(&[
                layer("sha256:spdx", 4000, IN_TOTO_PREDICATE_TYPE, "https://spdx.dev/Document"),
                layer("sha256:slsa", 1500, IN_TOTO_PREDICATE_TYPE, "https://slsa.dev/provenance/v0.2"),
            ]),
        );
        registry.add_referrers(INDEX, vec![descriptor(SIG, "application/vnd.dev.cosign.artifact.sig.v1+json")]);
        registry.add_referrers(ARM64, vec![descriptor("sha256:vex", "application/vnd.openvex+json")]);
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_multi_platform_linkage() {
        let registry = multi_platform();
        let inspection = discovery(&registry, &quiet_config()).inspect(&image()).await.unwrap();

        assert_eq!(inspection.digest, INDEX);
        assert_eq!(inspection.tag.as_deref(), Some("v1"));
        assert_eq!(inspection.platforms.len(), 2);
        assert!(inspection.platforms.iter().any(|p| p.digest == AMD64 && p.architecture == "amd64"));
        assert_eq!(inspection.referrers.len(), 4);

        let referrers = &inspection.referrers;
        let signature = find(referrers, SIG);
        assert_eq!(signature.kind, ReferrerKind::Signature);
        assert_eq!(signature.reference_digest(), None);

        let vex = find(referrers, "sha256:vex");
        assert_eq!(vex.kind, ReferrerKind::Vex);
        assert_eq!(vex.reference_digest(), Some(ARM64));

        let sbom = find(referrers, "sha256:spdx");
        assert_eq!(sbom.kind, ReferrerKind::Sbom);
        assert_eq!(sbom.size, 4000);
        assert_eq!(sbom.reference_digest(), Some(AMD64));
        assert_eq!(sbom.mechanism, DiscoveryMechanism::BuildkitAttestationManifest);

        let provenance = find(referrers, "sha256:slsa");
        assert_eq!(provenance.kind, ReferrerKind::Attestation);
        assert_eq!(provenance.reference_digest(), Some(AMD64));

        assert_eq!(inspection.referrers_for_platform(AMD64).count(), 2);
        assert_eq!(inspection.referrers_of_kind(ReferrerKind::Vex).count(), 1);
    }

    #[tokio::test]
    async fn test_attestation_manifest_is_not_a_platform() {
        let registry = multi_platform();
        discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();

        let calls = registry.calls();
        assert!(calls.contains(&format!("referrers:{}", INDEX)));
        assert!(calls.contains(&format!("referrers:{}", AMD64)));
        assert!(calls.contains(&format!("referrers:{}", ARM64)));
        assert!(!calls.contains(&format!("referrers:{}", ATTEST)));
        assert!(calls.contains(&format!("manifest:{}", ATTEST)));
    }

    #[tokio::test]
    async fn test_tag_fallback_when_api_unsupported() {
        let registry = MockRegistry::new().without_referrers_api();
        registry.add_tagged("v1", IMAGE, manifest_json(&[]));
        let fallback_tag = referrers_tag(IMAGE).unwrap();
        registry.add_tagged(
            &fallback_tag,
            "sha256:fa11bac4",
            index_json(&[json!({
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:cdx",
                "size": 2048,
                "artifactType": "application/vnd.cyclonedx+json"
            })]),
        );
        let registry = Arc::new(registry);

        let referrers = discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();
        assert_eq!(referrers.len(), 1);
        assert_eq!(referrers[0].kind, ReferrerKind::Sbom);
        assert_eq!(referrers[0].size, 2048);
        assert_eq!(referrers[0].mechanism, DiscoveryMechanism::ReferrersTagFallback);
        assert_eq!(referrers[0].reference_digest(), None);
    }

    #[tokio::test]
    async fn test_tag_fallback_used_when_api_empty() {
        let registry = MockRegistry::new();
        registry.add_tagged("v1", IMAGE, manifest_json(&[]));
        let registry = Arc::new(registry);

        let referrers = discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();
        assert!(referrers.is_empty());
        let fallback = format!("manifest:{}", referrers_tag(IMAGE).unwrap());
        assert!(registry.calls().contains(&fallback));
    }

    #[tokio::test]
    async fn test_tag_fallback_skipped_when_api_answers() {
        let registry = MockRegistry::new();
        registry.add_tagged("v1", IMAGE, manifest_json(&[]));
        registry.add_referrers(IMAGE, vec![descriptor(SIG, "application/vnd.dev.cosign.artifact.sig.v1+json")]);
        let registry = Arc::new(registry);

        discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();
        let fallback = format!("manifest:{}", referrers_tag(IMAGE).unwrap());
        assert!(!registry.calls().contains(&fallback));

        let mut config = quiet_config();
        config.discovery.referrers_tag_fallback = false;
        let registry = Arc::new(MockRegistry::new().without_referrers_api());
        registry.add_tagged("v1", IMAGE, manifest_json(&[]));
        discovery(&registry, &config).discover(&image()).await.unwrap();
        assert!(!registry.calls().contains(&fallback));
    }

    #[tokio::test]
    async fn test_platform_fallback_results_are_stamped() {
        let registry = MockRegistry::new().without_referrers_api();
        registry.add_tagged("v1", INDEX, index_json(&[platform_entry(AMD64, "linux", "amd64")]));
        registry.add_tagged(
            &referrers_tag(AMD64).unwrap(),
            "sha256:fa11bac4",
            index_json(&[json!({
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:scan",
                "size": 300,
                "artifactType": "application/vnd.aquasec.trivy.vuln-report+json"
            })]),
        );
        let registry = Arc::new(registry);

        let referrers = discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();
        let scan = find(&referrers, "sha256:scan");
        assert_eq!(scan.kind, ReferrerKind::VulnerabilityScan);
        assert_eq!(scan.reference_digest(), Some(AMD64));
    }

    #[tokio::test]
    async fn test_cosign_tags() {
        let registry = MockRegistry::new();
        registry.add_tagged("v1", IMAGE, manifest_json(&[]));
        registry.add_tagged(
            &cosign_tag(IMAGE, CosignSuffix::Signature).unwrap(),
            SIG,
            manifest_json(&[layer("sha256:sigpayload", 250, "dev.cosignproject.cosign/signature", "MEUCIQ==")]),
        );
        registry.add_tagged(
            &cosign_tag(IMAGE, CosignSuffix::Attestation).unwrap(),
            ATTEST,
            manifest_json(&[layer("sha256:openvex", 900, IN_TOTO_PREDICATE_TYPE, "https://openvex.dev/ns/v0.2.0")]),
        );
        let registry = Arc::new(registry);

        let mut config = quiet_config();
        config.discovery.cosign_tags = true;
        let referrers = discovery(&registry, &config).discover(&image()).await.unwrap();
        assert_eq!(referrers.len(), 2);

        let signature = find(&referrers, SIG);
        assert_eq!(signature.kind, ReferrerKind::Signature);
        assert_eq!(signature.artifact_type, COSIGN_SIGNATURE_ARTIFACT_TYPE);
        assert_eq!(signature.mechanism, DiscoveryMechanism::CosignTagScheme);
        assert_eq!(signature.reference_digest(), Some(IMAGE));

        let vex = find(&referrers, "sha256:openvex");
        assert_eq!(vex.kind, ReferrerKind::Vex);
        assert_eq!(vex.size, 900);
        assert_eq!(vex.reference_digest(), Some(IMAGE));
    }

    #[tokio::test]
    async fn test_dedup_across_mechanisms() {
        let registry = MockRegistry::new();
        registry.add_tagged("v1", IMAGE, manifest_json(&[]));
        registry.add_referrers(IMAGE, vec![descriptor(SIG, "application/vnd.dev.cosign.artifact.sig.v1+json")]);
        registry.add_tagged(
            &cosign_tag(IMAGE, CosignSuffix::Signature).unwrap(),
            SIG,
            manifest_json(&[]),
        );
        let registry = Arc::new(registry);

        let mut config = quiet_config();
        config.discovery.cosign_tags = true;
        let referrers = discovery(&registry, &config).discover(&image()).await.unwrap();

        assert_eq!(referrers.len(), 1);
        assert_eq!(referrers[0].kind, ReferrerKind::Signature);
        // Whichever mechanism wins, the cosign link is merged in.
        assert_eq!(referrers[0].reference_digest(), Some(IMAGE));
    }

    #[tokio::test]
    async fn test_index_artifacts_suppress_attestation_fetch() {
        let registry = MockRegistry::new();
        registry.add_tagged(
            "v1",
            INDEX,
            index_json(&[
                platform_entry(AMD64, "linux", "amd64"),
                json!({
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": ATTEST,
                    "size": 700,
                    "artifactType": "application/vnd.in-toto+json",
                    "annotations": {
                        "vnd.docker.reference.type": "attestation-manifest",
                        "vnd.docker.reference.digest": AMD64,
                        "in-toto.io/predicate-type": "https://spdx.dev/Document"
                    }
                }),
            ]),
        );
        let registry = Arc::new(registry);

        let referrers = discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();
        assert_eq!(referrers.len(), 1);
        assert_eq!(referrers[0].kind, ReferrerKind::Sbom);
        assert_eq!(referrers[0].mechanism, DiscoveryMechanism::ImageIndexArtifact);
        assert_eq!(referrers[0].reference_digest(), Some(AMD64));
        assert!(!registry.calls().contains(&format!("manifest:{}", ATTEST)));
    }

    #[tokio::test]
    async fn test_unreadable_index_falls_back_to_top_digest() {
        let registry = MockRegistry::new();
        registry.add_tagged("v1", INDEX, index_json(&[platform_entry(AMD64, "linux", "amd64")]));
        registry.add_tagged(
            &cosign_tag(INDEX, CosignSuffix::Signature).unwrap(),
            SIG,
            manifest_json(&[]),
        );
        registry.fail(INDEX);
        let registry = Arc::new(registry);

        let mut config = quiet_config();
        config.discovery.cosign_tags = true;
        let inspection = discovery(&registry, &config).inspect(&image()).await.unwrap();

        assert!(inspection.platforms.is_empty());
        assert_eq!(inspection.referrers.len(), 1);
        assert_eq!(inspection.referrers[0].digest, SIG);
        assert!(!registry.calls().contains(&format!("referrers:{}", AMD64)));
    }

    #[tokio::test]
    async fn test_mechanism_failures_are_swallowed() {
        let registry = multi_platform();
        registry.fail(ARM64);
        registry.fail(ATTEST);

        let referrers = discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();
        assert_eq!(referrers.len(), 1);
        assert_eq!(referrers[0].digest, SIG);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_fatal() {
        let registry = Arc::new(MockRegistry::new());
        let result = discovery(&registry, &quiet_config()).discover(&image()).await;
        assert!(matches!(result, Err(InspectError::RegistryError { .. })));

        let result = discovery(&registry, &quiet_config()).discover("Not A Reference!").await;
        assert!(matches!(result, Err(InspectError::InvalidReference(_))));
    }

    #[tokio::test]
    async fn test_signatures_enriched_when_enabled() {
        use rcgen::{CertificateParams, KeyPair, SanType, PKCS_ECDSA_P384_SHA384};

        let key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap();
        let mut params = CertificateParams::default();
        params.subject_alt_names = vec![SanType::Rfc822Name("ci@a3s-lab.io".try_into().unwrap())];
        let pem = params.self_signed(&key).unwrap().pem();

        let registry = MockRegistry::new();
        registry.add_tagged("v1", IMAGE, manifest_json(&[]));
        registry.add_referrers(IMAGE, vec![descriptor(SIG, "application/vnd.dev.cosign.artifact.sig.v1+json")]);
        registry.add_manifest(
            SIG,
            manifest_json(&[layer("sha256:sigpayload", 250, "dev.sigstore.cosign/certificate", &pem)]),
        );
        let registry = Arc::new(registry);

        let mut config = quiet_config();
        config.discovery.enrich_signatures = true;
        let referrers = discovery(&registry, &config).discover(&image()).await.unwrap();
        let info = referrers[0].signature_info.as_ref().unwrap();
        assert_eq!(info.identity, "ci@a3s-lab.io");
        assert_eq!(info.issuer, "");

        let referrers = discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();
        assert_eq!(referrers[0].signature_info, None);
    }

    #[test]
    fn test_inspection_json_shape() {
        let inspection = ImageInspection {
            reference: "ghcr.io/a3s-lab/app:v1".to_string(),
            repository: "ghcr.io/a3s-lab/app".to_string(),
            tag: Some("v1".to_string()),
            digest: INDEX.to_string(),
            media_type: "application/vnd.oci.image.index.v1+json".to_string(),
            platforms: vec![PlatformManifest {
                digest: AMD64.to_string(),
                media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
                size: 1000,
                os: "linux".to_string(),
                architecture: "amd64".to_string(),
                variant: None,
                config: None,
            }],
            platform_digest: Some(AMD64.to_string()),
            index: None,
            manifest: None,
            config: Some(ImageConfig {
                os: "linux".to_string(),
                architecture: "amd64".to_string(),
                ..Default::default()
            }),
            referrers: Vec::new(),
        };
        let value = serde_json::to_value(&inspection).unwrap();
        assert_eq!(value["mediaType"], "application/vnd.oci.image.index.v1+json");
        assert_eq!(value["platforms"][0]["architecture"], "amd64");
        assert!(value["platforms"][0].get("variant").is_none());
        assert!(value["platforms"][0].get("config").is_none());
        assert_eq!(value["platformDigest"], AMD64);
        assert_eq!(value["config"]["os"], "linux");
        assert!(value.get("manifest").is_none());
    }

    const AMD64_CONFIG: &str = "sha256:c0a6400000000000000000000000000000000000000000000000000000000000";
    const ARM64_CONFIG: &str = "sha256:c0a4a00000000000000000000000000000000000000000000000000000000000";

    /// Adds readable images behind both platforms of [`multi_platform`].
    fn with_platform_images(registry: &MockRegistry) {
        let layers = [json!({
            "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
            "digest": "sha256:1a7e4",
            "size": 31457280,
            "annotations": { "org.opencontainers.image.title": "app" }
        })];
        registry.add_manifest(AMD64, image_json(AMD64_CONFIG, &layers));
        registry.add_manifest(ARM64, image_json(ARM64_CONFIG, &layers));
        registry.add_blob(AMD64_CONFIG, config_json("linux", "amd64"));
        registry.add_blob(ARM64_CONFIG, config_json("linux", "arm64"));
    }

    #[tokio::test]
    async fn test_inspection_reads_platform_images() {
        let registry = multi_platform();
        with_platform_images(&registry);
        let inspection = discovery(&registry, &quiet_config()).inspect(&image()).await.unwrap();

        assert_eq!(inspection.index.as_ref().unwrap().manifests.len(), 3);
        assert_eq!(inspection.platform_digest.as_deref(), Some(AMD64));
        let manifest = inspection.manifest.as_ref().unwrap();
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].size, 31457280);
        assert_eq!(manifest.layers[0].annotations["org.opencontainers.image.title"], "app");

        let config = inspection.config.as_ref().unwrap();
        assert_eq!(config.architecture, "amd64");
        assert_eq!(config.created.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(config.diff_ids().to_vec(), vec!["sha256:d1ff".to_string()]);
        assert_eq!(config.history[0].created_by.as_deref(), Some("COPY app /app"));
        let container = config.config.as_ref().unwrap();
        assert_eq!(container.user.as_deref(), Some("app"));
        assert_eq!(container.entrypoint, vec!["/app"]);
        assert_eq!(container.exposed_ports().collect::<Vec<_>>(), vec!["8080/tcp"]);

        let arm = inspection.platforms.iter().find(|p| p.digest == ARM64).unwrap();
        assert_eq!(arm.config.as_ref().unwrap().architecture, "arm64");
        assert_eq!(inspection.referrers.len(), 4);
    }

    #[tokio::test]
    async fn test_unreadable_platform_is_skipped() {
        let registry = multi_platform();
        with_platform_images(&registry);
        registry.fail(AMD64_CONFIG);
        let inspection = discovery(&registry, &quiet_config()).inspect(&image()).await.unwrap();

        assert_eq!(inspection.platform_digest.as_deref(), Some(ARM64));
        assert_eq!(inspection.config.as_ref().unwrap().architecture, "arm64");
        let amd = inspection.platforms.iter().find(|p| p.digest == AMD64).unwrap();
        assert!(amd.config.is_none());
        assert_eq!(inspection.referrers.len(), 4);

        registry.fail(ARM64);
        let inspection = discovery(&registry, &quiet_config()).inspect(&image()).await.unwrap();
        assert_eq!(inspection.platform_digest, None);
        assert_eq!(inspection.manifest, None);
        assert_eq!(inspection.config, None);
        assert_eq!(inspection.platforms.len(), 2);
    }

    #[tokio::test]
    async fn test_single_platform_image_details() {
        let registry = MockRegistry::new();
        registry.add_tagged("v1", IMAGE, image_json(AMD64_CONFIG, &[]));
        registry.add_blob(AMD64_CONFIG, config_json("linux", "amd64"));
        let registry = Arc::new(registry);

        let inspection = discovery(&registry, &quiet_config()).inspect(&image()).await.unwrap();
        assert_eq!(inspection.index, None);
        assert_eq!(inspection.platform_digest, None);
        assert!(inspection.manifest.is_some());
        assert_eq!(inspection.config.as_ref().unwrap().os, "linux");

        registry.fail(AMD64_CONFIG);
        let inspection = discovery(&registry, &quiet_config()).inspect(&image()).await.unwrap();
        assert_eq!(inspection.config, None);
    }

    #[tokio::test]
    async fn test_discover_skips_image_details() {
        let registry = multi_platform();
        with_platform_images(&registry);
        discovery(&registry, &quiet_config()).discover(&image()).await.unwrap();

        let calls = registry.calls();
        assert!(!calls.contains(&format!("manifest:{}", AMD64)));
        assert!(!calls.iter().any(|call| call.starts_with("blob:")));
    }
}
