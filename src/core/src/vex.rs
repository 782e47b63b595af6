//! OpenVEX document model.
//!
//! Decoding is lenient about the shapes older OpenVEX revisions used: a
//! vulnerability or product may be a bare string instead of an object.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

/// An OpenVEX document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VexDocument {
    #[serde(rename = "@context", default)]
    pub context: String,
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooling: Option<String>,
    #[serde(default)]
    pub statements: Vec<VexStatement>,
}

impl VexDocument {
    /// Parse a VEX document from raw JSON.
    pub fn from_slice(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Document timestamp, if it is valid RFC 3339.
    pub fn issued_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.timestamp).ok()
    }

    /// Human-readable warnings for statements that are well-formed but
    /// incomplete.
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (i, statement) in self.statements.iter().enumerate() {
            if statement.status == VexStatus::NotAffected
                && statement.justification.is_none()
                && statement.impact_statement.is_none()
            {
                warnings.push(format!(
                    "statement {} ({}): not_affected without justification or impact statement",
                    i, statement.vulnerability.name
                ));
            }
            if statement.status == VexStatus::Affected && statement.action_statement.is_none() {
                warnings.push(format!(
                    "statement {} ({}): affected without action statement",
                    i, statement.vulnerability.name
                ));
            }
        }
        warnings
    }
}

/// Exploitability status of a vulnerability for a set of products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VexStatus {
    Affected,
    NotAffected,
    Fixed,
    UnderInvestigation,
}

/// A single VEX statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VexStatement {
    #[serde(deserialize_with = "vulnerability_or_name")]
    pub vulnerability: VexVulnerability,
    #[serde(default, deserialize_with = "products_or_ids", skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<VexProduct>,
    pub status: VexStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VexVulnerability {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VexProduct {
    #[serde(rename = "@id", default)]
    pub id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VulnerabilityRepr {
    Name(String),
    Full(VexVulnerability),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProductRepr {
    Id(String),
    Full(VexProduct),
}

fn vulnerability_or_name<'de, D>(deserializer: D) -> std::result::Result<VexVulnerability, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match VulnerabilityRepr::deserialize(deserializer)? {
        VulnerabilityRepr::Name(name) => VexVulnerability {
            name,
            ..Default::default()
        },
        VulnerabilityRepr::Full(v) => v,
    })
}

fn products_or_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<VexProduct>, D::Error>
where
    D: Deserializer<'de>,
{
    let products = Vec::<ProductRepr>::deserialize(deserializer)?;
    Ok(products
        .into_iter()
        .map(|p| match p {
            ProductRepr::Id(id) => VexProduct { id },
            ProductRepr::Full(p) => p,
        })
        .collect())
}
