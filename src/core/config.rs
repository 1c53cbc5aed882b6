//! Agent configuration document access.
//!
//! The agent's configuration is a JSON document. The guardian hashes it as raw
//! `serde_json::Value`; the validator and supervisor read typed views of the
//! `constitution` and `watchers` sections.

use crate::core::assets;
use crate::core::constitution::{self, ConstitutionConfig};
use crate::core::error::WardenError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const AGENT_CONFIG_ENV: &str = "WARDEN_AGENT_CONFIG";
pub const STATE_DIR_ENV: &str = "WARDEN_STATE_DIR";

/// One background watcher, as declared under `watchers.<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherSpec {
    #[serde(skip)]
    pub name: String,
    pub command: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Poll interval hint in seconds, passed to the watcher via its environment.
    #[serde(default)]
    pub interval: Option<f64>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub restart_delay_seconds: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

impl WatcherSpec {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            enabled: true,
            interval: None,
            cwd: None,
            env: BTreeMap::new(),
            restart_delay_seconds: None,
        }
    }

    /// Disabled or blank-command specs never enter the supervisor state machine.
    pub fn is_startable(&self) -> bool {
        self.enabled && !self.command.trim().is_empty()
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `--config` if given, else `$WARDEN_AGENT_CONFIG`, else `~/.openclaw/openclaw.json`.
pub fn resolve_agent_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(AGENT_CONFIG_ENV) {
        return PathBuf::from(path);
    }
    home_dir().join(".openclaw").join("openclaw.json")
}

/// `--state-dir` if given, else `$WARDEN_STATE_DIR`, else `~/.warden`.
pub fn resolve_state_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(STATE_DIR_ENV) {
        return PathBuf::from(path);
    }
    home_dir().join(".warden")
}

/// Read and parse the agent configuration. Unreadable or invalid JSON is a setup error.
pub fn load_document(path: &Path) -> Result<Value, WardenError> {
    let content = fs::read_to_string(path).map_err(|e| {
        WardenError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let doc: Value = serde_json::from_str(&content).map_err(|e| {
        WardenError::Config(format!("invalid JSON in {}: {}", path.display(), e))
    })?;
    if !doc.is_object() {
        return Err(WardenError::Config(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }
    Ok(doc)
}

/// Walk a dotted path (`gateway.auth.token`) through nested objects.
pub fn lookup<'a>(doc: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(doc, |node, key| node.as_object()?.get(key))
}

pub fn lookup_str<'a>(doc: &'a Value, dotted: &str) -> Option<&'a str> {
    lookup(doc, dotted).and_then(Value::as_str)
}

/// Watcher specs sorted by name. A malformed entry is a configuration error.
pub fn watcher_specs(doc: &Value) -> Result<Vec<WatcherSpec>, WardenError> {
    let Some(section) = doc.get("watchers") else {
        return Ok(Vec::new());
    };
    let Some(entries) = section.as_object() else {
        return Err(WardenError::Config(
            "`watchers` must be a mapping of name to spec".into(),
        ));
    };
    let mut specs = Vec::with_capacity(entries.len());
    for (name, raw) in entries {
        let mut spec: WatcherSpec = serde_json::from_value(raw.clone())
            .map_err(|e| WardenError::Config(format!("watcher '{}': {}", name, e)))?;
        spec.name = name.clone();
        specs.push(spec);
    }
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(specs)
}

/// The `constitution` block, or defaults when absent.
pub fn constitution_config(doc: &Value) -> Result<ConstitutionConfig, WardenError> {
    match doc.get("constitution") {
        None | Some(Value::Null) => Ok(ConstitutionConfig::default()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| WardenError::Config(format!("constitution: {}", e))),
    }
}

/// Identity documents read from the agent workspace, when present.
pub const IDENTITY_DOCS: &[&str] = &["AGENTS.md", "SOUL.md", "IDENTITY.md", "USER.md"];

/// Resolved system-prompt text: configured prompts plus workspace identity docs.
pub fn resolved_prompt_text(doc: &Value, workspace_override: Option<&Path>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(prompt) = lookup_str(doc, "agents.defaults.systemPrompt") {
        parts.push(prompt.to_string());
    }
    if let Some(list) = lookup(doc, "agents.list").and_then(Value::as_array) {
        for agent in list {
            if let Some(prompt) = agent.get("systemPrompt").and_then(Value::as_str) {
                parts.push(prompt.to_string());
            }
        }
    }

    let workspace = workspace_override
        .map(Path::to_path_buf)
        .or_else(|| lookup_str(doc, "agents.defaults.workspace").map(expand_home));
    if let Some(dir) = workspace {
        for name in IDENTITY_DOCS {
            let path = dir.join(name);
            match fs::read_to_string(&path) {
                Ok(content) => parts.push(content),
                Err(_) => debug!(path = %path.display(), "identity document not present"),
            }
        }
    }
    parts.join("\n\n")
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(raw),
    }
}

/// Load the operator phrase list, creating it from the embedded defaults on first use.
pub fn load_phrases(path: &Path) -> Result<Vec<String>, WardenError> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, assets::EMBEDDED_DEFAULT_PHRASES)?;
        info!(path = %path.display(), "created default constitutional phrases file");
    }
    let content = fs::read_to_string(path)?;
    Ok(constitution::parse_phrases(&content))
}
