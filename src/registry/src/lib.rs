//! A3S Inspect Registry - supply-chain referrer discovery.
//!
//! Finds the signatures, SBOMs, provenance attestations, VEX documents and
//! vulnerability scans attached to a container image, across the four
//! mechanisms registries use to expose them: the OCI 1.1 referrers API, the
//! referrers tag fallback, cosign `.sig`/`.att` tags and BuildKit attestation
//! manifests embedded in the image index.

#![allow(clippy::result_large_err)]

pub mod attestation;
pub mod classify;
pub mod content;
pub mod discovery;
pub mod envelope;
pub mod oci;
pub mod signature;

#[cfg(test)]
pub(crate) mod mock;

// Re-export common types
pub use attestation::AttestationExtractor;
pub use classify::classify;
pub use content::{ContentLookup, SbomContent};
pub use discovery::{ImageInspection, PlatformManifest, ReferrerDiscovery};
pub use envelope::{pretty_json, unwrap_envelope, Envelope};
pub use oci::{
    Descriptor, ImageConfig, ImageIndex, ImageManifest, ImageReference, OciTransport, Platform,
    RegistryAuth, RegistryTransport,
};
pub use signature::{signature_info_from_pem, SignatureEnricher};
