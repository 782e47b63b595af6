//! In-memory registry used by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use a3s_inspect_core::error::{InspectError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::oci::manifest::detect_media_type;
use crate::oci::{Descriptor, ImageReference, RegistryTransport};

/// Repository every mock lookup is served from.
pub const REPO: &str = "ghcr.io/a3s-lab/app";

#[derive(Default)]
pub struct MockRegistry {
    manifests: Mutex<HashMap<String, Vec<u8>>>,
    tags: Mutex<HashMap<String, String>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    referrers: Mutex<HashMap<String, Vec<Descriptor>>>,
    referrers_supported: Mutex<bool>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        let registry = Self::default();
        *registry.referrers_supported.lock() = true;
        registry
    }

    pub fn add_manifest(&self, digest: &str, data: Vec<u8>) {
        self.manifests.lock().insert(digest.to_string(), data);
    }

    /// Store `data` under `digest` and point `tag` at it.
    pub fn add_tagged(&self, tag: &str, digest: &str, data: Vec<u8>) {
        self.add_manifest(digest, data);
        self.tags.lock().insert(tag.to_string(), digest.to_string());
    }

    pub fn add_blob(&self, digest: &str, data: Vec<u8>) {
        self.blobs.lock().insert(digest.to_string(), data);
    }

    pub fn add_referrers(&self, subject: &str, referrers: Vec<Descriptor>) {
        self.referrers.lock().insert(subject.to_string(), referrers);
    }

    /// Answer every referrers query with 404.
    pub fn without_referrers_api(self) -> Self {
        *self.referrers_supported.lock() = false;
        self
    }

    /// Fail every request touching `digest` or `tag`.
    pub fn fail(&self, digest_or_tag: &str) {
        self.failing.lock().insert(digest_or_tag.to_string());
    }

    /// Requests served so far, as `op:target` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, op: &str, target: &str) -> Result<()> {
        self.calls.lock().push(format!("{}:{}", op, target));
        if self.failing.lock().contains(target) {
            return Err(InspectError::registry("ghcr.io", format!("injected failure for {}", target)));
        }
        Ok(())
    }

    fn lookup(&self, reference: &ImageReference) -> Result<(String, Vec<u8>)> {
        let digest = match (&reference.digest, &reference.tag) {
            (Some(digest), _) => digest.clone(),
            (None, Some(tag)) => self
                .tags
                .lock()
                .get(tag)
                .cloned()
                .ok_or_else(|| InspectError::registry("ghcr.io", format!("tag {} not found", tag)))?,
            (None, None) => return Err(InspectError::InvalidReference(reference.to_string())),
        };
        let data = self
            .manifests
            .lock()
            .get(&digest)
            .cloned()
            .ok_or_else(|| InspectError::registry("ghcr.io", format!("manifest {} unknown", digest)))?;
        Ok((digest, data))
    }
}

fn target(reference: &ImageReference) -> String {
    reference
        .digest
        .clone()
        .or_else(|| reference.tag.clone())
        .unwrap_or_default()
}

#[async_trait]
impl RegistryTransport for MockRegistry {
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor> {
        self.record("resolve", &target(reference))?;
        let (digest, data) = self.lookup(reference)?;
        Ok(Descriptor {
            media_type: detect_media_type(&data),
            digest,
            size: data.len() as i64,
            ..Default::default()
        })
    }

    async fn get_manifest(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        self.record("manifest", &target(reference))?;
        Ok(self.lookup(reference)?.1)
    }

    async fn get_blob(&self, _repository: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        self.record("blob", digest)?;
        self.blobs
            .lock()
            .get(digest)
            .cloned()
            .ok_or_else(|| InspectError::registry("ghcr.io", format!("blob {} unknown", digest)))
    }

    async fn get_referrers(
        &self,
        _repository: &ImageReference,
        digest: &str,
    ) -> Result<Vec<Descriptor>> {
        self.record("referrers", digest)?;
        if !*self.referrers_supported.lock() {
            return Err(InspectError::ReferrersUnsupported("ghcr.io returned 404".to_string()));
        }
        Ok(self.referrers.lock().get(digest).cloned().unwrap_or_default())
    }

    async fn list_tags(&self, _repository: &ImageReference) -> Result<Vec<String>> {
        self.record("tags", REPO)?;
        let mut tags: Vec<String> = self.tags.lock().keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }
}

/// Manifest layer carrying a single annotation.
pub fn layer(digest: &str, size: i64, key: &str, value: &str) -> Value {
    let mut annotations = serde_json::Map::new();
    annotations.insert(key.to_string(), Value::from(value));
    json!({
        "mediaType": "application/vnd.in-toto+json",
        "digest": digest,
        "size": size,
        "annotations": annotations
    })
}

pub fn manifest_json(layers: &[Value]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.empty.v1+json",
            "digest": "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
            "size": 2
        },
        "layers": layers
    }))
    .unwrap()
}

/// Runnable image manifest whose config blob is `config_digest`.
pub fn image_json(config_digest: &str, layers: &[Value]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config_digest,
            "size": 1469
        },
        "layers": layers
    }))
    .unwrap()
}

/// Image config blob for `os`/`architecture` with one history step.
pub fn config_json(os: &str, architecture: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "created": "2024-05-01T10:00:00Z",
        "architecture": architecture,
        "os": os,
        "config": {
            "User": "app",
            "Env": ["PATH=/usr/local/bin:/usr/bin"],
            "Entrypoint": ["/app"],
            "WorkingDir": "/srv",
            "ExposedPorts": { "8080/tcp": {} },
            "Labels": { "org.opencontainers.image.source": "https://github.com/a3s-lab/app" }
        },
        "rootfs": { "type": "layers", "diff_ids": ["sha256:d1ff"] },
        "history": [{ "created": "2024-05-01T10:00:00Z", "created_by": "COPY app /app" }]
    }))
    .unwrap()
}

pub fn index_json(manifests: &[Value]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": manifests
    }))
    .unwrap()
}

pub fn platform_entry(digest: &str, os: &str, architecture: &str) -> Value {
    json!({
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "digest": digest,
        "size": 1000,
        "platform": { "os": os, "architecture": architecture }
    })
}

/// BuildKit attestation manifest entry describing `platform_digest`.
pub fn attestation_entry(digest: &str, platform_digest: &str, size: i64) -> Value {
    json!({
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "digest": digest,
        "size": size,
        "annotations": {
            "vnd.docker.reference.digest": platform_digest,
            "vnd.docker.reference.type": "attestation-manifest"
        },
        "platform": { "os": "unknown", "architecture": "unknown" }
    })
}

/// Referrer descriptor as returned by the referrers API.
pub fn descriptor(digest: &str, artifact_type: &str) -> Descriptor {
    Descriptor {
        media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
        digest: digest.to_string(),
        size: 512,
        artifact_type: Some(artifact_type.to_string()),
        annotations: BTreeMap::new(),
        platform: None,
    }
}
