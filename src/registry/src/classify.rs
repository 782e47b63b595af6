//! Artifact classification.
//!
//! Maps an artifact type and its annotations to a [`ReferrerKind`]. The
//! precedence lives in the rule tables below and is evaluated top to bottom,
//! first match wins:
//!
//! 1. artifact-type rules (signature, sbom, vex, vulnerability scan)
//! 2. predicate-type hint from the annotations
//! 3. sigstore bundle content annotation
//! 4. generic attestation artifact types
//! 5. `artifact`
//!
//! All matching is case-insensitive substring matching.

use std::collections::BTreeMap;

use a3s_inspect_core::annotations::{
    COSIGN_PREDICATE_TYPE, IN_TOTO_PREDICATE_TYPE, MESSAGE_SIGNATURE, SIGSTORE_BUNDLE_CONTENT,
    SIGSTORE_BUNDLE_PREDICATE_TYPE,
};
use a3s_inspect_core::ReferrerKind;

/// Selects `kind` when any needle occurs in the (lowercased) subject.
struct Rule {
    needles: &'static [&'static str],
    kind: ReferrerKind,
}

impl Rule {
    fn matches(&self, subject: &str) -> bool {
        self.needles.iter().any(|needle| subject.contains(needle))
    }
}

/// Rules applied to the declared artifact type.
const ARTIFACT_TYPE_RULES: &[Rule] = &[
    Rule {
        needles: &["signature", "notary", "cosign"],
        kind: ReferrerKind::Signature,
    },
    Rule {
        needles: &["sbom", "cyclonedx", "spdx"],
        kind: ReferrerKind::Sbom,
    },
    Rule {
        needles: &["vex", "openvex"],
        kind: ReferrerKind::Vex,
    },
    Rule {
        needles: &["vuln", "scan"],
        kind: ReferrerKind::VulnerabilityScan,
    },
];

/// Annotation keys carrying a predicate type, in lookup order.
const PREDICATE_TYPE_KEYS: &[&str] = &[
    IN_TOTO_PREDICATE_TYPE,
    SIGSTORE_BUNDLE_PREDICATE_TYPE,
    COSIGN_PREDICATE_TYPE,
];

/// Rules applied to the predicate-type hint.
const PREDICATE_TYPE_RULES: &[Rule] = &[
    Rule {
        needles: &["vex", "openvex"],
        kind: ReferrerKind::Vex,
    },
    Rule {
        needles: &["sbom", "cyclonedx", "spdx"],
        kind: ReferrerKind::Sbom,
    },
    Rule {
        needles: &["provenance", "slsa"],
        kind: ReferrerKind::Attestation,
    },
    Rule {
        needles: &["vuln"],
        kind: ReferrerKind::VulnerabilityScan,
    },
];

const SIGSTORE_BUNDLE: &str = "sigstore.bundle";

/// Rules applied to the artifact type once no hint matched.
const GENERIC_RULES: &[Rule] = &[Rule {
    needles: &["attestation", "in-toto", "provenance"],
    kind: ReferrerKind::Attestation,
}];

fn first_match(rules: &[Rule], subject: &str) -> Option<ReferrerKind> {
    rules.iter().find(|rule| rule.matches(subject)).map(|rule| rule.kind)
}

/// First non-empty predicate type among [`PREDICATE_TYPE_KEYS`].
pub fn predicate_type_hint(annotations: &BTreeMap<String, String>) -> Option<&str> {
    PREDICATE_TYPE_KEYS
        .iter()
        .filter_map(|key| annotations.get(*key))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}

/// Classify a bare predicate type, as found on an attestation layer.
pub fn classify_predicate_type(predicate_type: &str) -> ReferrerKind {
    let hint = BTreeMap::from([(
        IN_TOTO_PREDICATE_TYPE.to_string(),
        predicate_type.to_string(),
    )]);
    classify("", &hint)
}

/// Classify an artifact. Total and deterministic.
pub fn classify(artifact_type: &str, annotations: &BTreeMap<String, String>) -> ReferrerKind {
    let artifact_type = artifact_type.to_lowercase();

    if let Some(kind) = first_match(ARTIFACT_TYPE_RULES, &artifact_type) {
        return kind;
    }

    if let Some(hint) = predicate_type_hint(annotations) {
        if let Some(kind) = first_match(PREDICATE_TYPE_RULES, &hint.to_lowercase()) {
            return kind;
        }
    }

    if artifact_type.contains(SIGSTORE_BUNDLE) {
        let is_message_signature = annotations
            .get(SIGSTORE_BUNDLE_CONTENT)
            .is_some_and(|content| content.to_lowercase().contains(MESSAGE_SIGNATURE));
        return if is_message_signature {
            ReferrerKind::Signature
        } else {
            ReferrerKind::Attestation
        };
    }

    first_match(GENERIC_RULES, &artifact_type).unwrap_or(ReferrerKind::Artifact)
}
