//! Tool-policy configuration check.
//!
//! Flags configuration values that hand the agent more power than a default
//! install should: elevated execution on by default, unrestricted exec
//! security, open direct messages, and a network-exposed gateway without
//! authentication. Each condition is independent.

use crate::core::config::{lookup, lookup_str};
use serde_json::Value;

const LOOPBACK_BINDS: &[&str] = &["loopback", "localhost", "127.0.0.1", "::1", "[::1]"];

fn is_truthy_level(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "on" | "full" | "always"),
        _ => false,
    }
}

fn non_empty(doc: &Value, dotted: &str) -> bool {
    lookup_str(doc, dotted).is_some_and(|s| !s.trim().is_empty())
}

/// Human-readable findings; empty when the policy is acceptable.
pub fn tool_policy_findings(doc: &Value) -> Vec<String> {
    let mut findings = Vec::new();

    if let Some(level) = lookup(doc, "agents.defaults.elevatedDefault")
        && is_truthy_level(level)
    {
        findings.push(format!(
            "agents.defaults.elevatedDefault is {}: elevated execution is enabled by default",
            level
        ));
    }

    for path in ["agents.defaults.tools.exec.security", "tools.exec.security"] {
        if lookup_str(doc, path) == Some("full") {
            findings.push(format!(
                "{} is \"full\": exec runs without an allowlist",
                path
            ));
        }
    }

    if lookup_str(doc, "gateway.dmPolicy") == Some("open") {
        findings.push("gateway.dmPolicy is \"open\": anyone can message the agent".to_string());
    }
    if let Some(channels) = doc.get("channels").and_then(Value::as_object) {
        for (name, channel) in channels {
            if channel.get("dmPolicy").and_then(Value::as_str) == Some("open") {
                findings.push(format!(
                    "channels.{}.dmPolicy is \"open\": anyone can message the agent",
                    name
                ));
            }
        }
    }

    let bind = lookup_str(doc, "gateway.bind").unwrap_or("loopback");
    if !LOOPBACK_BINDS.contains(&bind.trim()) {
        let auth_disabled = lookup_str(doc, "gateway.auth.mode") == Some("none");
        let has_secret = non_empty(doc, "gateway.auth.token") || non_empty(doc, "gateway.auth.password");
        if auth_disabled || !has_secret {
            findings.push(format!(
                "gateway.bind is \"{}\" (non-loopback) with no authentication configured",
                bind
            ));
        }
    }

    findings
}
