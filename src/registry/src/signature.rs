//! Signature enrichment.
//!
//! Keyless cosign signatures carry their Fulcio signing certificate as a PEM
//! annotation on the signature layer. The signer identity lives in the
//! certificate's subject alternative names and the OIDC issuer in a Sigstore
//! extension. Nothing here verifies the signature or the chain.

use std::sync::Arc;

use a3s_inspect_core::annotations::COSIGN_CERTIFICATE;
use a3s_inspect_core::error::{InspectError, Result};
use a3s_inspect_core::SignatureInfo;
use base64::Engine;
use der::Decode;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::Certificate;

use crate::oci::{truncate_digest, ImageReference, RegistryTransport};

/// Subject alternative name extension.
const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";

/// Fulcio OIDC issuer, raw bytes (deprecated).
const OID_ISSUER_V1: &str = "1.3.6.1.4.1.57264.1.1";

/// Fulcio OIDC issuer, DER UTF8String.
const OID_ISSUER_V2: &str = "1.3.6.1.4.1.57264.1.8";

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Reads signer details from cosign signature manifests.
#[derive(Clone)]
pub struct SignatureEnricher {
    transport: Arc<dyn RegistryTransport>,
}

impl SignatureEnricher {
    pub fn new(transport: Arc<dyn RegistryTransport>) -> Self {
        Self { transport }
    }

    /// Signer identity and issuer for the signature manifest at `digest`.
    ///
    /// Returns `None` when the manifest has no certificate, the certificate
    /// names neither an identity nor an issuer, or anything fails along the
    /// way.
    pub async fn enrich(&self, repository: &ImageReference, digest: &str) -> Option<SignatureInfo> {
        match self.certificate_info(repository, digest).await {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(
                    digest = %truncate_digest(digest),
                    error = %e,
                    "Signature enrichment failed"
                );
                None
            }
        }
    }

    async fn certificate_info(
        &self,
        repository: &ImageReference,
        digest: &str,
    ) -> Result<Option<SignatureInfo>> {
        let manifest = self
            .transport
            .get_image_manifest(&repository.with_digest(digest))
            .await?;

        let Some(pem) = manifest
            .layers
            .iter()
            .find_map(|layer| layer.annotation(COSIGN_CERTIFICATE))
        else {
            return Ok(None);
        };

        signature_info_from_pem(pem)
    }
}

/// Extract identity and issuer from a PEM signing certificate.
///
/// Identity is the first email SAN, else the first URI SAN. Issuer comes from
/// the first Sigstore issuer extension found. `Ok(None)` when both are absent.
pub fn signature_info_from_pem(pem: &str) -> Result<Option<SignatureInfo>> {
    let der = pem_to_der(pem)?;
    let cert = Certificate::from_der(&der)
        .map_err(|e| InspectError::ParseError(format!("Failed to parse certificate: {}", e)))?;

    let mut identity = None;
    let mut issuer = None;

    if let Some(extensions) = &cert.tbs_certificate.extensions {
        for ext in extensions.iter() {
            let oid = ext.extn_id.to_string();
            let value = ext.extn_value.as_bytes();

            if oid == OID_SUBJECT_ALT_NAME {
                identity = identity_from_san(value)?;
            } else if issuer.is_none() && (oid == OID_ISSUER_V1 || oid == OID_ISSUER_V2) {
                issuer = Some(decode_issuer(value));
            }
        }
    }

    let info = SignatureInfo {
        issuer: issuer.unwrap_or_default(),
        identity: identity.unwrap_or_default(),
    };
    if info.issuer.is_empty() && info.identity.is_empty() {
        return Ok(None);
    }
    Ok(Some(info))
}

fn identity_from_san(value: &[u8]) -> Result<Option<String>> {
    let san = SubjectAltName::from_der(value).map_err(|e| {
        InspectError::ParseError(format!("Failed to parse subject alternative names: {}", e))
    })?;

    let email = san.0.iter().find_map(|name| match name {
        GeneralName::Rfc822Name(email) => Some(email.to_string()),
        _ => None,
    });
    let uri = || {
        san.0.iter().find_map(|name| match name {
            GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
            _ => None,
        })
    };
    Ok(email.or_else(uri))
}

/// UTF8String first, raw bytes otherwise.
fn decode_issuer(value: &[u8]) -> String {
    String::from_der(value).unwrap_or_else(|_| String::from_utf8_lossy(value).into_owned())
}

/// Decode the first certificate block of a PEM bundle to DER.
fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let start = pem
        .find(PEM_BEGIN)
        .ok_or_else(|| InspectError::ParseError("No PEM certificate block".to_string()))?;
    let body = &pem[start + PEM_BEGIN.len()..];
    let end = body
        .find(PEM_END)
        .ok_or_else(|| InspectError::ParseError("Unterminated PEM certificate block".to_string()))?;

    let b64: String = body[..end]
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| InspectError::ParseError(format!("Failed to decode PEM certificate: {}", e)))
}
