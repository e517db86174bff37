//! Payload format parsers.
//!
//! Each parser turns raw bytes into one or more structured payload maps.
//! CSV input yields one payload per data row; every other format yields a
//! single payload (JSON arrays yield one per element, matching how polled
//! APIs page collections).

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use inflow_core::Payload;

use crate::error::NormalizeError;
use crate::syslog;

/// Wire format of a raw payload, configured per source.
///
/// Unit variants deserialize from plain strings (`format: json`); the
/// regex variant takes its pattern inline (`format: { regex: { pattern: "…" } }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    Json,
    Yaml,
    /// CSV with a header row; one payload per data row.
    Csv,
    /// XML flattened to a nested map; attributes become `@name` keys,
    /// repeated sibling elements become arrays.
    Xml,
    /// RFC 3164-style syslog line.
    Syslog,
    /// Regex with named capture groups; each group becomes a payload key.
    Regex { pattern: String },
    /// Whole input as a single `message` field.
    Plain,
}

impl PayloadFormat {
    /// Validate configuration that can fail independent of input, so
    /// adapters can reject a bad format during `start` instead of
    /// discovering it on the first event.
    pub fn validate(&self) -> Result<(), NormalizeError> {
        if let Self::Regex { pattern } = self {
            Regex::new(pattern).map_err(|e| NormalizeError::InvalidRegex {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Hex-encoded SHA-256 of arbitrary bytes, used as the fallback dedup key.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Walk a dot-separated path (`data.items.0.name`) through a JSON value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        if part.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Decode raw bytes into structured payloads using the given format.
pub fn decode(format: &PayloadFormat, bytes: &[u8]) -> Result<Vec<Payload>, NormalizeError> {
    if bytes.is_empty() {
        return Err(NormalizeError::Empty);
    }

    match format {
        PayloadFormat::Json => {
            let value: Value = serde_json::from_slice(bytes)?;
            Ok(value_to_payloads(value))
        }
        PayloadFormat::Yaml => {
            let value: Value = serde_yaml::from_slice(bytes)?;
            Ok(value_to_payloads(value))
        }
        PayloadFormat::Csv => decode_csv(bytes),
        PayloadFormat::Xml => {
            let text = std::str::from_utf8(bytes)?;
            Ok(vec![xml_to_map(text)?])
        }
        PayloadFormat::Syslog => {
            let text = std::str::from_utf8(bytes)?;
            Ok(vec![syslog::parse_line(text.trim_end())?])
        }
        PayloadFormat::Regex { pattern } => {
            let text = std::str::from_utf8(bytes)?;
            Ok(vec![regex_extract(pattern, text.trim_end())?])
        }
        PayloadFormat::Plain => {
            let text = std::str::from_utf8(bytes)?;
            let mut map = Payload::new();
            map.insert(
                "message".to_string(),
                Value::String(text.trim_end().to_string()),
            );
            Ok(vec![map])
        }
    }
}

/// Coerce a decoded JSON value into payload maps.
///
/// Objects map directly; arrays yield one payload per element; scalars are
/// wrapped under a `value` key so nothing is silently lost.
fn value_to_payloads(value: Value) -> Vec<Payload> {
    match value {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.into_iter().map(wrap_scalar).collect(),
        other => vec![wrap_scalar(other)],
    }
}

fn wrap_scalar(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

// ── CSV ─────────────────────────────────────────────────────────────

fn decode_csv(bytes: &[u8]) -> Result<Vec<Payload>, NormalizeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let mut payloads = Vec::new();

    for record in reader.records() {
        let record = record?;
        let mut map = Payload::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            map.insert(header.to_string(), parse_csv_field(field));
        }
        payloads.push(map);
    }

    Ok(payloads)
}

/// CSV fields are untyped; recover numbers and booleans where unambiguous.
fn parse_csv_field(field: &str) -> Value {
    if let Ok(n) = field.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = field.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match field {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(field.to_string()),
    }
}

// ── XML ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct XmlNode {
    map: Payload,
    text: String,
}

fn xml_node_value(node: XmlNode) -> Value {
    if node.map.is_empty() {
        Value::String(node.text)
    } else {
        let mut map = node.map;
        if !node.text.is_empty() {
            map.insert("#text".to_string(), Value::String(node.text));
        }
        Value::Object(map)
    }
}

/// Insert a child value, turning repeated sibling keys into an array.
fn insert_multi(map: &mut Payload, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

fn xml_to_map(input: &str) -> Result<Payload, NormalizeError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(input);
    reader.trim_text(true);

    let mut stack: Vec<(String, XmlNode)> = Vec::new();
    let mut out = Payload::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let mut node = XmlNode::default();
                for attr in start.attributes() {
                    let attr = attr.map_err(|e| NormalizeError::Xml(e.to_string()))?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .unescape_value()
                        .map_err(|e| NormalizeError::Xml(e.to_string()))?
                        .to_string();
                    node.map.insert(key, Value::String(value));
                }
                stack.push((name, node));
            }
            Ok(Event::Empty(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let mut node = XmlNode::default();
                for attr in start.attributes() {
                    let attr = attr.map_err(|e| NormalizeError::Xml(e.to_string()))?;
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    let value = attr
                        .unescape_value()
                        .map_err(|e| NormalizeError::Xml(e.to_string()))?
                        .to_string();
                    node.map.insert(key, Value::String(value));
                }
                let value = xml_node_value(node);
                match stack.last_mut() {
                    Some((_, parent)) => insert_multi(&mut parent.map, name, value),
                    None => insert_multi(&mut out, name, value),
                }
            }
            Ok(Event::Text(text)) => {
                if let Some((_, node)) = stack.last_mut() {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| NormalizeError::Xml(e.to_string()))?;
                    node.text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some((_, node)) = stack.last_mut() {
                    node.text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let (name, node) = stack
                    .pop()
                    .ok_or_else(|| NormalizeError::Xml("unbalanced end tag".to_string()))?;
                let value = xml_node_value(node);
                match stack.last_mut() {
                    Some((_, parent)) => insert_multi(&mut parent.map, name, value),
                    None => insert_multi(&mut out, name, value),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {} // declarations, comments, processing instructions
            Err(e) => return Err(NormalizeError::Xml(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(NormalizeError::Xml("unclosed element".to_string()));
    }
    if out.is_empty() {
        return Err(NormalizeError::Empty);
    }
    Ok(out)
}

// ── Regex extraction ────────────────────────────────────────────────

fn regex_extract(pattern: &str, text: &str) -> Result<Payload, NormalizeError> {
    let regex = Regex::new(pattern).map_err(|e| NormalizeError::InvalidRegex {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let captures = regex.captures(text).ok_or(NormalizeError::Unmatched)?;

    let mut map = Payload::new();
    for name in regex.capture_names().flatten() {
        if let Some(m) = captures.name(name) {
            map.insert(name.to_string(), Value::String(m.as_str().to_string()));
        }
    }

    if map.is_empty() {
        // Pattern matched but has no named groups; keep the full match.
        map.insert(
            "message".to_string(),
            Value::String(captures[0].to_string()),
        );
    }
    Ok(map)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object() {
        let payloads = decode(&PayloadFormat::Json, br#"{"a": 1, "b": "x"}"#).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["a"], 1);
        assert_eq!(payloads[0]["b"], "x");
    }

    #[test]
    fn json_array_yields_one_payload_per_element() {
        let payloads = decode(&PayloadFormat::Json, br#"[{"n":1},{"n":2},3]"#).unwrap();
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0]["n"], 1);
        assert_eq!(payloads[2]["value"], 3);
    }

    #[test]
    fn json_invalid_is_error() {
        assert!(decode(&PayloadFormat::Json, b"{not json").is_err());
    }

    #[test]
    fn yaml_document() {
        let payloads = decode(&PayloadFormat::Yaml, b"name: web-1\nload: 0.7\n").unwrap();
        assert_eq!(payloads[0]["name"], "web-1");
        assert_eq!(payloads[0]["load"], 0.7);
    }

    #[test]
    fn csv_with_header() {
        let input = b"id,name,active\n1,alpha,true\n2,beta,false\n";
        let payloads = decode(&PayloadFormat::Csv, input).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["id"], 1);
        assert_eq!(payloads[0]["name"], "alpha");
        assert_eq!(payloads[0]["active"], true);
        assert_eq!(payloads[1]["name"], "beta");
    }

    #[test]
    fn xml_nested_with_attributes() {
        let input = br#"<order id="7"><item>widget</item><item>bolt</item><qty>2</qty></order>"#;
        let payloads = decode(&PayloadFormat::Xml, input).unwrap();
        let order = payloads[0]["order"].as_object().unwrap();
        assert_eq!(order["@id"], "7");
        assert_eq!(order["qty"], "2");
        let items = order["item"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], "widget");
    }

    #[test]
    fn xml_unbalanced_is_error() {
        assert!(decode(&PayloadFormat::Xml, b"<a><b></a>").is_err());
    }

    #[test]
    fn regex_named_captures() {
        let format = PayloadFormat::Regex {
            pattern: r"^(?P<level>\w+) (?P<msg>.+)$".to_string(),
        };
        let payloads = decode(&format, b"ERROR disk full\n").unwrap();
        assert_eq!(payloads[0]["level"], "ERROR");
        assert_eq!(payloads[0]["msg"], "disk full");
    }

    #[test]
    fn regex_no_match_is_error() {
        let format = PayloadFormat::Regex {
            pattern: r"^\d+$".to_string(),
        };
        assert!(matches!(
            decode(&format, b"not a number"),
            Err(NormalizeError::Unmatched)
        ));
    }

    #[test]
    fn validate_rejects_bad_regex() {
        let format = PayloadFormat::Regex {
            pattern: "(unclosed".to_string(),
        };
        assert!(format.validate().is_err());
        assert!(PayloadFormat::Json.validate().is_ok());
    }

    #[test]
    fn plain_wraps_message() {
        let payloads = decode(&PayloadFormat::Plain, b"hello world\n").unwrap();
        assert_eq!(payloads[0]["message"], "hello world");
    }

    #[test]
    fn empty_input_is_error() {
        assert!(matches!(
            decode(&PayloadFormat::Json, b""),
            Err(NormalizeError::Empty)
        ));
    }

    #[test]
    fn lookup_path_walks_objects_and_arrays() {
        let value = serde_json::json!({"data": {"items": [{"name": "a"}, {"name": "b"}]}});
        assert_eq!(
            lookup_path(&value, "data.items.1.name").unwrap(),
            &Value::String("b".to_string())
        );
        assert!(lookup_path(&value, "data.missing").is_none());
        assert!(lookup_path(&value, "data.items.x").is_none());
    }

    #[test]
    fn sha256_hex_is_stable() {
        let a = sha256_hex(b"payload");
        let b = sha256_hex(b"payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sha256_hex(b"other"));
    }
}
