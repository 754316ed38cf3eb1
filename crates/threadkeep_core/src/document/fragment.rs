//! Canonical serialization and fragmenting of documents

use serde_json::Value as JsonValue;

use crate::{CoreError, Result};

/// Opening decoration around each fragment record
pub const FRAGMENT_PREFIX: &str = "```json\n";
/// Closing decoration around each fragment record
pub const FRAGMENT_SUFFIX: &str = "\n```";

/// Canonical text form of a document.
///
/// Keys come out sorted (serde_json's default map is ordered) with two-space
/// indentation, so equal documents always serialize identically.
pub fn to_canonical(value: &JsonValue) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| CoreError::serialization("document", e))
}

/// Parse document text, reporting failures against `document`
pub fn parse_document(document: &str, text: &str) -> Result<JsonValue> {
    serde_json::from_str(text).map_err(|e| CoreError::validation(document, e))
}

/// Split `text` into fragments of at most `max_len` characters.
///
/// Splits only after a newline; every fragment keeps its lines' trailing
/// newlines so concatenating the fragments gives back `text` exactly. A single
/// line longer than `max_len` cannot be placed and fails with
/// `SizeLimitExceeded`.
pub fn chunk(text: &str, max_len: usize) -> Result<Vec<String>> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let len = line.chars().count();
        if len > max_len {
            return Err(CoreError::size_limit("a document line", max_len, len));
        }
        if current_len + len > max_len {
            fragments.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(line);
        current_len += len;
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    Ok(fragments)
}

/// Wrap a fragment in the record decoration
pub fn wrap(fragment: &str) -> String {
    format!("{FRAGMENT_PREFIX}{fragment}{FRAGMENT_SUFFIX}")
}

/// Strip the record decoration; `None` if `content` is not a wrapped fragment
pub fn unwrap_fragment(content: &str) -> Option<&str> {
    content
        .strip_prefix(FRAGMENT_PREFIX)
        .and_then(|inner| inner.strip_suffix(FRAGMENT_SUFFIX))
}
