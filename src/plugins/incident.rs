//! Incident records.
//!
//! One JSON object per file, written once with `create_new` and never touched
//! again. The incident file is the source of truth whether or not an alert was
//! delivered.

use crate::core::error::WardenError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const INCIDENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub version: u32,
    pub timestamp: String,
    pub severity: Severity,
    pub check: String,
    pub config_path: String,
    pub details: String,
    pub hostname: String,
    pub guardian_pid: u32,
}

impl Incident {
    pub fn new(severity: Severity, check: &str, config_path: &Path, details: String) -> Self {
        Self {
            version: INCIDENT_VERSION,
            timestamp: time::now_iso(),
            severity,
            check: check.to_string(),
            config_path: config_path.display().to_string(),
            details,
            hostname: hostname(),
            guardian_pid: std::process::id(),
        }
    }

    /// `<UTC-timestamp>-<check-name>.json`
    fn file_stem(&self) -> String {
        let stamp = chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|ts| time::compact_stamp(&ts.to_utc()))
            .unwrap_or_else(|_| time::compact_stamp(&time::now()));
        format!("{}-{}", stamp, self.check)
    }
}

pub fn hostname() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // SAFETY: buf is valid for buf.len() bytes; gethostname NUL-terminates
        // on success when the name fits.
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
        if rc == 0 {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// Write a new incident file. Existing files are never overwritten; a numeric
/// suffix disambiguates same-second incidents for the same check.
pub fn write_incident(dir: &Path, incident: &Incident) -> Result<PathBuf, WardenError> {
    fs::create_dir_all(dir)?;
    let stem = incident.file_stem();
    let body = serde_json::to_string_pretty(incident)?;

    for attempt in 0..100u32 {
        let name = if attempt == 0 {
            format!("{}.json", stem)
        } else {
            format!("{}-{}.json", stem, attempt)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                f.write_all(body.as_bytes())?;
                f.write_all(b"\n")?;
                f.sync_all()?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(WardenError::Validation(format!(
        "could not allocate an incident file name for {}",
        stem
    )))
}

/// Incidents in `dir`, newest first. Unparseable files are skipped.
pub fn list_incidents(dir: &Path) -> Result<Vec<(PathBuf, Incident)>, WardenError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(incident) = serde_json::from_str::<Incident>(&content) {
            found.push((path, incident));
        }
    }
    found.sort_by(|a, b| b.0.file_name().cmp(&a.0.file_name()));
    Ok(found)
}
