//! Dynamic JSON envelope normalization (§9 Dynamic JSON envelopes)
//!
//! The PBX side-channel is schema-loose: `extraData` is base64 of a
//! not-quite-JSON blob using bare `key=value` pairs instead of proper
//! JSON, and the same logical field (caller number, direction) shows up
//! under different casings and nesting depths across PBX variants. This
//! module normalizes both into `serde_json::Value`s the rest of the
//! gateway can treat uniformly.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;

/// Decode and normalize the `extraData` side-channel blob. Returns
/// `None` on any decode failure — never fatal per §4.1.
pub fn parse_extra_data(b64: &str) -> Option<Value> {
    let raw = STANDARD.decode(b64).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let normalized = normalize_keyvalue_blob(&text);
    serde_json::from_str(&normalized).ok()
}

/// Decode the `czdata` side-channel: strict base64 JSON, no
/// normalization needed.
pub fn parse_czdata(b64: &str) -> Option<Value> {
    let raw = STANDARD.decode(b64).ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Turn a `key=value, key2=value2` blob into a JSON object literal: wrap
/// bare keys in quotes, quote every bare value as a JSON string (a
/// digit-only caller number is still a string, never a number, per
/// §4.1), and strip a trailing comma before the closing brace.
fn normalize_keyvalue_blob(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        // Already JSON-ish; still fix trailing commas before parsing.
        return strip_trailing_comma(trimmed);
    }

    let mut fields = Vec::new();
    for pair in trimmed.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let json_value =
            if value.is_empty() { "null".to_string() } else { format!("\"{}\"", value.replace('"', "\\\"")) };
        fields.push(format!("\"{}\":{}", key.replace('"', "\\\""), json_value));
    }
    format!("{{{}}}", fields.join(","))
}

fn strip_trailing_comma(s: &str) -> String {
    let mut out = s.to_string();
    if let Some(pos) = out.rfind(',') {
        let after_comma = out[pos + 1..].trim_start();
        if after_comma.starts_with('}') {
            out.remove(pos);
        }
    }
    out
}

/// Resolve a logical field (e.g. caller number) by trying a ranked list
/// of JSON pointer-style paths across several candidate documents, in
/// order. The first path that resolves to a non-null scalar wins.
pub fn resolve_field<'a>(candidates: &[&'a Value], paths: &[&str]) -> Option<String> {
    for path in paths {
        for doc in candidates {
            if let Some(value) = pointer_get(doc, path) {
                if let Some(s) = value_to_string(value) {
                    return Some(s);
                }
            }
        }
    }
    None
}

fn pointer_get<'a>(doc: &'a Value, dotted_path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in dotted_path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keyvalue_blob() {
        let raw = "CallCli=9876543210, Direction=inbound, Extra=";
        let b64 = STANDARD.encode(raw);
        let parsed = parse_extra_data(&b64).unwrap();
        assert_eq!(parsed["CallCli"], "9876543210");
        assert_eq!(parsed["Direction"], "inbound");
        assert!(parsed["Extra"].is_null());
    }

    #[test]
    fn parses_strict_json_czdata() {
        let raw = r#"{"caller_id":"123","did":"456"}"#;
        let b64 = STANDARD.encode(raw);
        let parsed = parse_czdata(&b64).unwrap();
        assert_eq!(parsed["caller_id"], "123");
    }

    #[test]
    fn bad_base64_yields_none() {
        assert!(parse_extra_data("not-base64!!!").is_none());
        assert!(parse_czdata("not-base64!!!").is_none());
    }

    #[test]
    fn resolve_field_tries_ranked_paths_in_order() {
        let primary: Value = serde_json::json!({"data": {"start": {}}});
        let fallback: Value = serde_json::json!({"urlParams": {"caller_id": "555"}});
        let resolved = resolve_field(&[&primary, &fallback], &["data.start.from", "urlParams.caller_id"]);
        assert_eq!(resolved, Some("555".to_string()));
    }
}
