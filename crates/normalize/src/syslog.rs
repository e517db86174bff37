//! RFC 3164-style syslog line parsing.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use inflow_core::Payload;

use crate::error::NormalizeError;

/// `<PRI>Mmm dd hh:mm:ss host tag[pid]: message` with PRI and pid optional.
fn line_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"^(?:<(?P<pri>\d{1,3})>)?(?P<timestamp>[A-Z][a-z]{2}\s+\d{1,2} \d{2}:\d{2}:\d{2}) (?P<host>\S+) (?P<tag>[^:\[\s]+)(?:\[(?P<pid>\d+)\])?: ?(?P<message>.*)$",
        )
        .expect("syslog regex is valid")
    })
}

/// Parse one syslog line into a payload map.
///
/// Produces `timestamp`, `host`, `tag`, `message`, plus `pid` when present
/// and `facility`/`severity` when a PRI prefix is present.
pub fn parse_line(line: &str) -> Result<Payload, NormalizeError> {
    let captures = line_regex()
        .captures(line)
        .ok_or(NormalizeError::SyslogUnmatched)?;

    let mut map = Payload::new();

    if let Some(pri) = captures.name("pri") {
        if let Ok(pri) = pri.as_str().parse::<u16>() {
            map.insert("facility".to_string(), Value::from(pri / 8));
            map.insert("severity".to_string(), Value::from(pri % 8));
        }
    }

    for field in ["timestamp", "host", "tag", "message"] {
        if let Some(m) = captures.name(field) {
            map.insert(field.to_string(), Value::String(m.as_str().to_string()));
        }
    }
    if let Some(pid) = captures.name("pid") {
        if let Ok(pid) = pid.as_str().parse::<u32>() {
            map.insert("pid".to_string(), Value::from(pid));
        }
    }

    Ok(map)
}
