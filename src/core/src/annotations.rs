//! Vendor annotation keys and media types the discovery engine relies on.
//!
//! These strings are matched bit-exact against registry content.

/// BuildKit: marks an index entry as an attestation manifest.
pub const DOCKER_REFERENCE_TYPE: &str = "vnd.docker.reference.type";

/// Value of [`DOCKER_REFERENCE_TYPE`] for BuildKit attestation manifests.
pub const ATTESTATION_MANIFEST: &str = "attestation-manifest";

/// BuildKit: digest of the platform manifest an entry describes. Also used to
/// link every discovered referrer to its platform (or the index).
pub const DOCKER_REFERENCE_DIGEST: &str = "vnd.docker.reference.digest";

/// in-toto predicate type on attestation layers.
pub const IN_TOTO_PREDICATE_TYPE: &str = "in-toto.io/predicate-type";

/// Cosign's alternate predicate type key.
pub const COSIGN_PREDICATE_TYPE: &str = "predicateType";

/// Sigstore bundle predicate type.
pub const SIGSTORE_BUNDLE_PREDICATE_TYPE: &str = "dev.sigstore.bundle.predicateType";

/// Sigstore bundle content kind.
pub const SIGSTORE_BUNDLE_CONTENT: &str = "dev.sigstore.bundle.content";

/// Value of [`SIGSTORE_BUNDLE_CONTENT`] for plain message signatures.
pub const MESSAGE_SIGNATURE: &str = "message-signature";

/// PEM signing certificate on cosign signature layers.
pub const COSIGN_CERTIFICATE: &str = "dev.sigstore.cosign/certificate";

/// Artifact type reported for signatures found through the cosign tag scheme.
pub const COSIGN_SIGNATURE_ARTIFACT_TYPE: &str = "application/vnd.dev.cosign.simplesigning.v1+json";

/// OCI image index media type.
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// OCI image manifest media type.
pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Docker manifest list media type.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Docker image manifest media type.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Whether `media_type` names a multi-platform index.
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == OCI_IMAGE_INDEX || media_type == DOCKER_MANIFEST_LIST
}
