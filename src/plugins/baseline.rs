//! Configuration baseline: per-section content hashes.
//!
//! The baseline file holds newline-delimited `section=hexhash` records plus one
//! `__full__` record for the whole normalized document. It is written only by
//! an explicit init; checks compare against it and never re-baseline.

use crate::core::error::WardenError;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Key under which the hash of the entire document is stored.
pub const FULL_DOCUMENT_KEY: &str = "__full__";

/// Top-level configuration sections whose drift is tracked individually.
pub const TRACKED_SECTIONS: &[&str] = &[
    "agents",
    "tools",
    "gateway",
    "channels",
    "hooks",
    "watchers",
    "constitution",
];

pub type Baseline = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub key: String,
    /// `None` when the baseline has no record for this key.
    pub expected: Option<String>,
    pub actual: String,
}

/// Recursively key-sorted copy, so hashes do not depend on map ordering.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex of the compact, key-sorted JSON rendering.
pub fn hash_value(value: &Value) -> String {
    let rendered = canonicalize(value).to_string();
    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash every tracked section (missing sections hash as `null`) and the full document.
pub fn compute(doc: &Value) -> Baseline {
    let mut baseline = Baseline::new();
    for section in TRACKED_SECTIONS {
        let value = doc.get(*section).unwrap_or(&Value::Null);
        baseline.insert((*section).to_string(), hash_value(value));
    }
    baseline.insert(FULL_DOCUMENT_KEY.to_string(), hash_value(doc));
    baseline
}

pub fn render(baseline: &Baseline) -> String {
    baseline
        .iter()
        .map(|(key, hash)| format!("{}={}\n", key, hash))
        .collect()
}

pub fn parse(content: &str) -> Result<Baseline, WardenError> {
    let mut baseline = Baseline::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, hash)) = line.split_once('=') else {
            return Err(WardenError::Config(format!(
                "baseline line {} is not `section=hash`",
                idx + 1
            )));
        };
        let hash = hash.trim();
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WardenError::Config(format!(
                "baseline line {} has an invalid hash",
                idx + 1
            )));
        }
        baseline.insert(key.trim().to_string(), hash.to_lowercase());
    }
    Ok(baseline)
}

/// Explicit baseline initialization. The only writer of the baseline file.
pub fn write_baseline(path: &Path, doc: &Value) -> Result<Baseline, WardenError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let baseline = compute(doc);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, render(&baseline))?;
    fs::rename(&tmp, path)?;
    Ok(baseline)
}

pub fn read_baseline(path: &Path) -> Result<Option<Baseline>, WardenError> {
    match fs::read_to_string(path) {
        Ok(content) => parse(&content).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Every key whose current hash differs from (or is missing in) the baseline.
pub fn compare(baseline: &Baseline, current: &Baseline) -> Vec<Drift> {
    current
        .iter()
        .filter_map(|(key, actual)| {
            let expected = baseline.get(key);
            if expected == Some(actual) {
                None
            } else {
                Some(Drift {
                    key: key.clone(),
                    expected: expected.cloned(),
                    actual: actual.clone(),
                })
            }
        })
        .collect()
}
