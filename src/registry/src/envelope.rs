//! Attestation envelope unwrapping.
//!
//! Attestation layers arrive in one of three shapes:
//!
//! - a DSSE envelope whose base64 `payload` is an in-toto statement
//! - a bare in-toto statement with a `predicate` field
//! - the raw document itself
//!
//! [`unwrap_envelope`] peels whichever wrapping is present and returns the
//! predicate bytes exactly as they appear in the statement.

use base64::Engine;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::value::RawValue;

/// An unwrapped predicate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// `predicateType` of the statement, empty for raw documents.
    pub predicate_type: String,
    /// Predicate bytes, byte-identical to the source.
    pub predicate: Vec<u8>,
}

impl Envelope {
    fn raw(data: &[u8]) -> Self {
        Self {
            predicate_type: String::new(),
            predicate: data.to_vec(),
        }
    }

    /// Whether any wrapping was removed.
    pub fn is_wrapped(&self) -> bool {
        !self.predicate_type.is_empty()
    }
}

/// Union of the in-toto statement and DSSE envelope fields we read.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Wrapper<'a> {
    #[serde(default)]
    predicate_type: Option<String>,
    #[serde(default, borrow)]
    predicate: Option<&'a RawValue>,
    #[serde(default)]
    payload: Option<String>,
}

/// Unwrap a DSSE envelope or in-toto statement. Never fails: input that is
/// neither comes back unchanged with an empty predicate type.
pub fn unwrap_envelope(data: &[u8]) -> Envelope {
    let wrapper: Wrapper<'_> = match serde_json::from_slice(data) {
        Ok(w) => w,
        Err(_) => return Envelope::raw(data),
    };

    if let Some(payload) = wrapper.payload.as_deref().filter(|p| !p.is_empty()) {
        let Some(decoded) = decode_payload(payload) else {
            tracing::debug!("DSSE payload is not valid base64, treating as raw document");
            return Envelope::raw(data);
        };
        return match serde_json::from_slice::<Wrapper<'_>>(&decoded) {
            Ok(Wrapper {
                predicate: Some(predicate),
                predicate_type,
                ..
            }) => Envelope {
                predicate_type: predicate_type.unwrap_or_default(),
                predicate: predicate.get().as_bytes().to_vec(),
            },
            _ => Envelope {
                predicate_type: String::new(),
                predicate: decoded,
            },
        };
    }

    match wrapper.predicate {
        Some(predicate) => Envelope {
            predicate_type: wrapper.predicate_type.unwrap_or_default(),
            predicate: predicate.get().as_bytes().to_vec(),
        },
        None => Envelope::raw(data),
    }
}

/// Standard alphabet first, URL-safe as a fallback.
fn decode_payload(payload: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};

    let payload = payload.trim();
    STANDARD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .or_else(|_| URL_SAFE_NO_PAD.decode(payload))
        .ok()
}

/// Indent JSON by two spaces. Tokens are copied byte for byte, so key order,
/// number spelling and string escapes survive. Input that is not JSON is
/// returned unchanged.
pub fn pretty_json(data: &[u8]) -> Vec<u8> {
    if serde_json::from_slice::<IgnoredAny>(data).is_err() {
        return data.to_vec();
    }

    let mut out = Vec::with_capacity(data.len() + data.len() / 2);
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        i += 1;

        if in_string {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                out.push(byte);
            }
            b'{' | b'[' => {
                out.push(byte);
                let close = if byte == b'{' { b'}' } else { b']' };
                match data[i..].iter().position(|c| !c.is_ascii_whitespace()) {
                    Some(offset) if data[i + offset] == close => {
                        out.push(close);
                        i += offset + 1;
                    }
                    _ => {
                        depth += 1;
                        newline(&mut out, depth);
                    }
                }
            }
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                newline(&mut out, depth);
                out.push(byte);
            }
            b',' => {
                out.push(byte);
                newline(&mut out, depth);
            }
            b':' => out.extend_from_slice(b": "),
            _ => out.push(byte),
        }
    }
    out
}

fn newline(out: &mut Vec<u8>, depth: usize) {
    out.push(b'\n');
    out.resize(out.len() + depth * 2, b' ');
}
