//! Registry transport.
//!
//! [`RegistryTransport`] is the seam between discovery and the network.
//! [`OciTransport`] implements it with the `oci-distribution` client for
//! manifests, blobs and tags, and a plain `reqwest` client for the OCI 1.1
//! referrers endpoint, which `oci-distribution` does not expose.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use a3s_inspect_core::annotations::{
    DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, OCI_IMAGE_INDEX, OCI_IMAGE_MANIFEST,
};
use a3s_inspect_core::config::{RegistryConfig, RegistryProtocol};
use a3s_inspect_core::error::{InspectError, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::{Client, Reference, RegistryOperation};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::credentials::RegistryAuth;
use super::manifest::{detect_media_type, truncate_digest, Descriptor, ImageIndex, ImageManifest};
use super::reference::ImageReference;

/// Manifest media types requested from registries.
const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_IMAGE_INDEX,
    DOCKER_MANIFEST_LIST,
    OCI_IMAGE_MANIFEST,
    DOCKER_MANIFEST,
];

/// Tags requested per page (`n`) when listing tags.
const TAG_PAGE_SIZE: usize = 1000;

/// Registry operations consumed by referrer discovery.
///
/// All calls are reference- or digest-addressed and stateless from the
/// caller's perspective.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Resolve a reference to its top-level descriptor (digest, media type, size).
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor>;

    /// Raw manifest bytes for a tag or digest reference.
    async fn get_manifest(&self, reference: &ImageReference) -> Result<Vec<u8>>;

    /// Blob bytes for `digest` in the reference's repository.
    async fn get_blob(&self, repository: &ImageReference, digest: &str) -> Result<Vec<u8>>;

    /// `GET /v2/<name>/referrers/<digest>`.
    async fn get_referrers(
        &self,
        repository: &ImageReference,
        digest: &str,
    ) -> Result<Vec<Descriptor>>;

    /// Tags in the reference's repository.
    async fn list_tags(&self, repository: &ImageReference) -> Result<Vec<String>>;

    async fn get_image_index(&self, reference: &ImageReference) -> Result<ImageIndex> {
        let data = self.get_manifest(reference).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn get_image_manifest(&self, reference: &ImageReference) -> Result<ImageManifest> {
        let data = self.get_manifest(reference).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Registry transport over HTTPS (or HTTP for configured registries).
pub struct OciTransport {
    client: Client,
    http: reqwest::Client,
    config: RegistryConfig,
    auth: Option<RegistryAuth>,
    /// Bearer tokens for the referrers endpoint, keyed by `registry/repository`.
    tokens: Mutex<HashMap<String, String>>,
    /// Resolved credentials, keyed by registry host.
    auths: Mutex<HashMap<String, RegistryAuth>>,
}

impl OciTransport {
    /// Create a transport resolving credentials per registry.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let protocol = match config.protocol {
            RegistryProtocol::Http => ClientProtocol::Http,
            RegistryProtocol::Https if config.http_registries.is_empty() => ClientProtocol::Https,
            RegistryProtocol::Https => ClientProtocol::HttpsExcept(config.http_registries.clone()),
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                InspectError::ConfigError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            http,
            config,
            auth: None,
            tokens: Mutex::new(HashMap::new()),
            auths: Mutex::new(HashMap::new()),
        })
    }

    /// Use `auth` for every registry instead of resolving per registry.
    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Credentials for `registry`, resolved once and then served from cache.
    fn auth_for(&self, registry: &str) -> RegistryAuth {
        if let Some(auth) = &self.auth {
            return auth.clone();
        }
        self.auths
            .lock()
            .entry(registry.to_string())
            .or_insert_with(|| RegistryAuth::resolve(registry, &self.config))
            .clone()
    }

    /// Apply the configured per-request timeout to `fut`.
    async fn timed<T, F>(&self, registry: &str, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(InspectError::registry(
                registry,
                format!("{} timed out after {}s", what, timeout.as_secs()),
            )),
        }
    }

    async fn pull_manifest(&self, reference: &ImageReference) -> Result<(Vec<u8>, String)> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry).to_oci_auth();

        self.timed(&reference.registry, "manifest fetch", async {
            self.client
                .pull_manifest_raw(&oci_ref, &auth, MANIFEST_MEDIA_TYPES)
                .await
                .map_err(|e| {
                    InspectError::registry(
                        &reference.registry,
                        format!("Failed to pull manifest {}: {}", reference, e),
                    )
                })
        })
        .await
    }

    fn base_url(&self, registry: &str) -> String {
        let scheme = match self.config.protocol_for(registry) {
            RegistryProtocol::Http => "http",
            RegistryProtocol::Https => "https",
        };
        format!("{}://{}", scheme, api_host(registry))
    }

    /// GET `url`, answering a bearer or basic challenge once if the registry
    /// asks for one.
    async fn get_with_challenge(
        &self,
        url: &str,
        repository: &ImageReference,
        auth: &RegistryAuth,
    ) -> Result<reqwest::Response> {
        let registry = &repository.registry;
        let cache_key = repository.repository_name();
        let send = |token: Option<&str>, basic: bool| {
            let mut request = self.http.get(url).header(ACCEPT, OCI_IMAGE_INDEX);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            } else if basic {
                if let Some((username, password)) = auth.basic_credentials() {
                    request = request.basic_auth(username, Some(password));
                }
            }
            request.send()
        };

        let cached = self.tokens.lock().get(&cache_key).cloned();
        let response = send(cached.as_deref(), false)
            .await
            .map_err(|e| InspectError::registry(registry, format!("Request to {} failed: {}", url, e)))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();

        let retry = match parse_challenge(&challenge) {
            Some(Challenge::Bearer { realm, service, scope }) => {
                let scope = scope
                    .unwrap_or_else(|| format!("repository:{}:pull", repository.repository));
                let token = self
                    .fetch_token(registry, &realm, service.as_deref(), &scope, auth)
                    .await?;
                self.tokens.lock().insert(cache_key, token.clone());
                send(Some(&token), false).await
            }
            Some(Challenge::Basic) => send(None, true).await,
            None => return Ok(response),
        };

        retry.map_err(|e| InspectError::registry(registry, format!("Request to {} failed: {}", url, e)))
    }

    async fn fetch_token(
        &self,
        registry: &str,
        realm: &str,
        service: Option<&str>,
        scope: &str,
        auth: &RegistryAuth,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            token: Option<String>,
            #[serde(default)]
            access_token: Option<String>,
        }

        let mut query = vec![("scope", scope)];
        if let Some(service) = service {
            query.push(("service", service));
        }
        let mut request = self.http.get(realm).query(&query);
        if let Some((username, password)) = auth.basic_credentials() {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| {
            InspectError::registry(registry, format!("Token request to {} failed: {}", realm, e))
        })?;
        if !response.status().is_success() {
            return Err(InspectError::registry(
                registry,
                format!("Token request to {} returned {}", realm, response.status()),
            ));
        }
        let body: TokenResponse = response.json().await.map_err(|e| {
            InspectError::registry(registry, format!("Invalid token response: {}", e))
        })?;

        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| InspectError::registry(registry, "Token response carried no token"))
    }
}

#[async_trait]
impl RegistryTransport for OciTransport {
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor> {
        let (data, digest) = self.pull_manifest(reference).await?;
        let media_type = detect_media_type(&data);

        tracing::debug!(
            reference = %reference,
            digest = %truncate_digest(&digest),
            media_type = %media_type,
            "Resolved image reference"
        );

        Ok(Descriptor {
            media_type,
            digest,
            size: data.len() as i64,
            ..Default::default()
        })
    }

    async fn get_manifest(&self, reference: &ImageReference) -> Result<Vec<u8>> {
        let (data, _digest) = self.pull_manifest(reference).await?;
        Ok(data)
    }

    async fn get_blob(&self, repository: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        let registry = &repository.registry;
        let oci_ref = to_oci_reference(&repository.with_digest(digest))?;
        let auth = self.auth_for(registry).to_oci_auth();
        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };

        let data = self
            .timed(registry, "blob fetch", async {
                self.client
                    .auth(&oci_ref, &auth, RegistryOperation::Pull)
                    .await
                    .map_err(|e| {
                        InspectError::registry(registry, format!("Authentication failed: {}", e))
                    })?;

                let mut data: Vec<u8> = Vec::new();
                self.client
                    .pull_blob(&oci_ref, &descriptor, &mut data)
                    .await
                    .map_err(|e| {
                        InspectError::registry(
                            registry,
                            format!("Failed to pull blob {}: {}", truncate_digest(digest), e),
                        )
                    })?;
                Ok(data)
            })
            .await?;

        verify_digest(digest, &data).map_err(|message| InspectError::registry(registry, message))?;

        tracing::debug!(
            digest = %truncate_digest(digest),
            size = data.len(),
            "Pulled blob"
        );
        Ok(data)
    }

    async fn get_referrers(
        &self,
        repository: &ImageReference,
        digest: &str,
    ) -> Result<Vec<Descriptor>> {
        let url = format!(
            "{}/v2/{}/referrers/{}",
            self.base_url(&repository.registry),
            repository.repository,
            digest
        );
        let auth = self.auth_for(&repository.registry);

        tracing::debug!(url = %url, "Querying referrers API");

        let response = self
            .timed(&repository.registry, "referrers query", async {
                self.get_with_challenge(&url, repository, &auth).await
            })
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(InspectError::ReferrersUnsupported(format!(
                "{} returned 404 for {}",
                repository.registry, url
            )));
        }
        if !status.is_success() {
            return Err(InspectError::registry(
                &repository.registry,
                format!("Referrers API returned {}", status),
            ));
        }

        let body = response.bytes().await.map_err(|e| {
            InspectError::registry(&repository.registry, format!("Failed to read response: {}", e))
        })?;
        let index: ImageIndex = serde_json::from_slice(&body)?;

        tracing::debug!(
            digest = %truncate_digest(digest),
            count = index.manifests.len(),
            "Referrers API answered"
        );
        Ok(index.manifests)
    }

    async fn list_tags(&self, repository: &ImageReference) -> Result<Vec<String>> {
        let registry = &repository.registry;
        let oci_ref = to_oci_reference(&repository.with_tag("latest"))?;
        let auth = self.auth_for(registry).to_oci_auth();
        let (oci_ref, auth) = (&oci_ref, &auth);

        let tags = collect_tag_pages(move |last| async move {
            self.timed(registry, "tag listing", async {
                self.client
                    .list_tags(oci_ref, auth, Some(TAG_PAGE_SIZE), last.as_deref())
                    .await
                    .map(|response| response.tags)
                    .map_err(|e| {
                        InspectError::registry(registry, format!("Failed to list tags: {}", e))
                    })
            })
            .await
        })
        .await?;

        tracing::debug!(
            repository = %repository.repository_name(),
            count = tags.len(),
            "Listed tags"
        );
        Ok(tags)
    }
}

/// Follow `n`/`last` tag pagination. `fetch` receives the last tag of the
/// previous page. Stops on an empty page, or when a page ends on the same
/// tag as its predecessor (a registry ignoring `last`).
async fn collect_tag_pages<F, Fut>(mut fetch: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<String>>>,
{
    let mut tags = Vec::new();
    let mut last: Option<String> = None;
    loop {
        let page = fetch(last.clone()).await?;
        let Some(tail) = page.last().cloned() else {
            break;
        };
        if last.as_deref() == Some(tail.as_str()) {
            break;
        }
        tags.extend(page);
        last = Some(tail);
    }
    Ok(tags)
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = if let Some(ref digest) = reference.digest {
        format!("{}@{}", reference.repository_name(), digest)
    } else if let Some(ref tag) = reference.tag {
        format!("{}:{}", reference.repository_name(), tag)
    } else {
        format!("{}:latest", reference.repository_name())
    };

    ref_str.parse::<Reference>().map_err(|e| {
        InspectError::InvalidReference(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Host serving the registry API. Docker Hub's API lives on a different
/// host than its canonical name.
fn api_host(registry: &str) -> &str {
    match registry {
        "docker.io" | "index.docker.io" => "registry-1.docker.io",
        other => other,
    }
}

/// Check `data` against a `sha256:` digest. Other algorithms pass through.
fn verify_digest(digest: &str, data: &[u8]) -> std::result::Result<(), String> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(data));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(format!(
            "Digest mismatch: expected {}, got sha256:{}",
            truncate_digest(digest),
            &actual[..12]
        ))
    }
}

/// Authentication challenge from a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let params = parse_auth_params(params);
    Some(Challenge::Bearer {
        realm: params.get("realm").cloned()?,
        service: params.get("service").cloned(),
        scope: params.get("scope").cloned(),
    })
}

/// Parse `key="value",key=value` pairs. Quoted values may contain commas.
fn parse_auth_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim(), &after[end..]),
                None => (after.trim(), ""),
            }
        };

        params.insert(key, value.to_string());
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    params
}
