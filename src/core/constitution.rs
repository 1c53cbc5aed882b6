//! Constitution Validator
//!
//! Applies the rule engine to a resolved system prompt before each agent run:
//! - Resolves caller configuration against defaults (all rules on, `block`)
//! - Evaluates every enabled rule (one finding per rule at most)
//! - Applies the caller's severity, never the catalog constant
//! - Produces a verdict plus a single-line audit rendering
//!
//! The validator is synchronous and side-effect free. Persisting the audit line
//! is the caller's job.

use crate::core::output::compact_line;
use crate::core::rules::{self, RuleId, RuleSeverity};
use crate::core::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    #[default]
    Block,
    Warn,
}

/// A rule entry as written by an operator. Ids are free text so that an
/// unknown id can be skipped instead of failing the whole configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSpecInput {
    pub id: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub severity: Option<RuleSeverity>,
}

/// Operator configuration, possibly partial. Missing fields take defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstitutionConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub action: Option<ActionMode>,
    #[serde(default)]
    pub rules: Vec<RuleSpecInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConstitutionRuleSpec {
    pub id: RuleId,
    pub enabled: bool,
    pub severity: RuleSeverity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub enabled: bool,
    pub action: ActionMode,
    pub rules: Vec<ConstitutionRuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstitutionViolation {
    pub rule_id: RuleId,
    pub severity: RuleSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstitutionResult {
    pub pass: bool,
    pub violations: Vec<ConstitutionViolation>,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub action: ActionMode,
    /// True when validation was skipped because the constitution is disabled.
    pub disabled: bool,
}

/// Caller-supplied labels for the audit rendering.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub label: String,
    pub run_id: Option<String>,
}

impl ConstitutionConfig {
    /// Merge with defaults. Catalog order is preserved; unknown ids are dropped.
    pub fn resolve(&self) -> ResolvedConfig {
        let rules = rules::CATALOG
            .iter()
            .map(|def| {
                let overrides = self
                    .rules
                    .iter()
                    .filter(|input| RuleId::parse(&input.id) == Some(def.id))
                    .next_back();
                ConstitutionRuleSpec {
                    id: def.id,
                    enabled: overrides.and_then(|o| o.enabled).unwrap_or(true),
                    severity: overrides
                        .and_then(|o| o.severity)
                        .unwrap_or(def.default_severity),
                }
            })
            .collect();
        ResolvedConfig {
            enabled: self.enabled.unwrap_or(true),
            action: self.action.unwrap_or_default(),
            rules,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConstitutionConfig::default().resolve()
    }
}

/// Validate a resolved prompt. Never fails; identical inputs give identical verdicts.
pub fn validate(prompt: &str, config: Option<&ConstitutionConfig>) -> ConstitutionResult {
    let resolved = config.map(ConstitutionConfig::resolve).unwrap_or_default();
    validate_resolved(prompt, &resolved)
}

pub fn validate_resolved(prompt: &str, config: &ResolvedConfig) -> ConstitutionResult {
    let started = Instant::now();
    let timestamp = time::now();

    if !config.enabled {
        return ConstitutionResult {
            pass: true,
            violations: Vec::new(),
            timestamp,
            duration: started.elapsed(),
            action: config.action,
            disabled: true,
        };
    }

    let violations: Vec<ConstitutionViolation> = config
        .rules
        .iter()
        .filter(|spec| spec.enabled)
        .filter_map(|spec| {
            let def = rules::rule_def(spec.id);
            (def.check)(prompt).map(|message| ConstitutionViolation {
                rule_id: spec.id,
                severity: spec.severity,
                message,
            })
        })
        .collect();

    let pass = match config.action {
        ActionMode::Warn => true,
        ActionMode::Block => !violations
            .iter()
            .any(|v| v.severity == RuleSeverity::Error),
    };

    ConstitutionResult {
        pass,
        violations,
        timestamp,
        duration: started.elapsed(),
        action: config.action,
        disabled: false,
    }
}

/// One PASS/BLOCK summary line followed by one line per violation.
pub fn format_audit_log(result: &ConstitutionResult, context: &AuditContext) -> String {
    let verdict = if result.pass { "PASS" } else { "BLOCK" };
    let mut summary = format!(
        "{} constitution {} context={}",
        time::iso_seconds(&result.timestamp),
        verdict,
        if context.label.is_empty() {
            "-"
        } else {
            context.label.as_str()
        }
    );
    if let Some(run_id) = &context.run_id {
        summary.push_str(&format!(" run={}", run_id));
    }
    summary.push_str(&format!(
        " action={} violations={} duration_us={}",
        match result.action {
            ActionMode::Block => "block",
            ActionMode::Warn => "warn",
        },
        result.violations.len(),
        result.duration.as_micros()
    ));
    if result.disabled {
        summary.push_str(" (constitution disabled)");
    }

    let mut lines = vec![summary];
    for v in &result.violations {
        lines.push(format!(
            "  - [{}] {}: {}",
            v.severity.as_str(),
            v.rule_id,
            compact_line(&v.message, 200)
        ));
    }
    lines.join("\n")
}

/// Parse a phrases file: one phrase per line, `#` comments, blanks ignored.
pub fn parse_phrases(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Phrases not contained in `text`, compared case-insensitively.
pub fn missing_phrases<'a>(text: &str, phrases: &'a [String]) -> Vec<&'a str> {
    let haystack = text.to_lowercase();
    phrases
        .iter()
        .filter(|phrase| !haystack.contains(&phrase.to_lowercase()))
        .map(String::as_str)
        .collect()
}
