//! A3S Inspect Core - Shared Types
//!
//! Errors, configuration, the referrer data model and the OpenVEX document
//! model used across the A3S Inspect crates.

pub mod annotations;
pub mod config;
pub mod error;
pub mod log;
pub mod referrer;
pub mod vex;

// Re-export commonly used types
pub use config::{DiscoveryConfig, InspectConfig, RegistryConfig, RegistryProtocol};
pub use error::{InspectError, Result};
pub use referrer::{DiscoveryMechanism, Referrer, ReferrerKind, ReferrerSet, SignatureInfo};
pub use vex::{VexDocument, VexProduct, VexStatement, VexStatus, VexVulnerability};

/// A3S Inspect version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
