use std::sync::OnceLock;

use regex::Regex;

use crate::{error::MonitorError, SensorKind};

/// A decoded sensor payload
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Number(f64),
    Text(String),
}

fn num_regex() -> &'static Regex {
    static NUM_REGEX: OnceLock<Regex> = OnceLock::new();
    NUM_REGEX.get_or_init(|| Regex::new(r"[-+]?(\d+(\.\d*)?|\.\d+)([eE][-+]?\d+)?").expect("Invalid number regex"))
}

/// Parse a payload for the given topic kind.
/// Numbers are tried verbatim first, then the first number found in the text is used
/// (the node sometimes sends units along, ex. `28.5 C`).
pub fn parse_reading(kind: SensorKind, payload: &str) -> Result<Reading, MonitorError> {
    let trimmed = payload.trim();
    if !kind.is_numeric() {
        return Ok(Reading::Text(trimmed.to_string()));
    }

    if let Ok(val) = trimmed.parse::<f64>() {
        if val.is_finite() {
            return Ok(Reading::Number(val));
        }
    }

    num_regex()
        .find(trimmed)
        .and_then(|cap| cap.as_str().parse::<f64>().ok())
        .filter(|val| val.is_finite())
        .map(Reading::Number)
        .ok_or_else(|| MonitorError::Parse {
            kind,
            payload: payload.to_string(),
        })
}
