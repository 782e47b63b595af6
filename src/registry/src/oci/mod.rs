//! OCI registry access for referrer discovery.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     RegistryTransport                        │
//! │                                                              │
//! │  resolve ──────────► top-level digest + media type           │
//! │  get_manifest ─────► image index / image manifest bytes      │
//! │  get_blob ─────────► layers and configs (sha256 verified)    │
//! │  get_referrers ────► GET /v2/<name>/referrers/<digest>       │
//! │  list_tags ────────► GET /v2/<name>/tags/list                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod credentials;
pub mod manifest;
pub mod reference;
pub mod transport;

pub use config::{ContainerConfig, HistoryEntry, ImageConfig, RootFs};
pub use credentials::{DockerKeychain, RegistryAuth};
pub use manifest::{
    cosign_tag, referrers_tag, truncate_digest, CosignSuffix, Descriptor, ImageIndex,
    ImageManifest, Platform,
};
pub use reference::ImageReference;
pub use transport::{OciTransport, RegistryTransport};
