//! Constitution rule engine.
//!
//! Pure functions mapping prompt text to at most one finding per rule. No I/O,
//! no state. The catalog is a closed table of `(id, default severity, checker)`
//! entries; adding a rule means appending one entry to `CATALOG`.

use crate::core::assets;
use crate::core::output::compact_line;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::LazyLock;

/// Longest excerpt of matched prompt text carried into a violation message.
const MATCH_EXCERPT_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    SafetySectionPresent,
    SafetySectionUnmodified,
    NoIgnoreSafety,
    NoExfiltrationInstructions,
    NoRemoveToolRestrictions,
    NoOverrideConstitution,
    NoImpersonateSystem,
}

impl RuleId {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleId::SafetySectionPresent => "safety-section-present",
            RuleId::SafetySectionUnmodified => "safety-section-unmodified",
            RuleId::NoIgnoreSafety => "no-ignore-safety",
            RuleId::NoExfiltrationInstructions => "no-exfiltration-instructions",
            RuleId::NoRemoveToolRestrictions => "no-remove-tool-restrictions",
            RuleId::NoOverrideConstitution => "no-override-constitution",
            RuleId::NoImpersonateSystem => "no-impersonate-system",
        }
    }

    /// Parse a rule id; unknown ids yield `None` and are skipped by callers.
    pub fn parse(id: &str) -> Option<RuleId> {
        CATALOG
            .iter()
            .map(|rule| rule.id)
            .find(|rule_id| rule_id.as_str() == id.trim())
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Error` blocks in block mode; `Warn` never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Error,
    Warn,
}

impl RuleSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleSeverity::Error => "error",
            RuleSeverity::Warn => "warn",
        }
    }
}

pub type Checker = fn(&str) -> Option<String>;

pub struct RuleDef {
    pub id: RuleId,
    pub default_severity: RuleSeverity,
    pub check: Checker,
}

/// The closed rule catalog, in evaluation order.
pub const CATALOG: &[RuleDef] = &[
    RuleDef {
        id: RuleId::SafetySectionPresent,
        default_severity: RuleSeverity::Error,
        check: check_safety_section_present,
    },
    RuleDef {
        id: RuleId::SafetySectionUnmodified,
        default_severity: RuleSeverity::Error,
        check: check_safety_section_unmodified,
    },
    RuleDef {
        id: RuleId::NoIgnoreSafety,
        default_severity: RuleSeverity::Error,
        check: check_no_ignore_safety,
    },
    RuleDef {
        id: RuleId::NoExfiltrationInstructions,
        default_severity: RuleSeverity::Error,
        check: check_no_exfiltration,
    },
    RuleDef {
        id: RuleId::NoRemoveToolRestrictions,
        default_severity: RuleSeverity::Error,
        check: check_no_remove_tool_restrictions,
    },
    RuleDef {
        id: RuleId::NoOverrideConstitution,
        default_severity: RuleSeverity::Error,
        check: check_no_override_constitution,
    },
    RuleDef {
        id: RuleId::NoImpersonateSystem,
        default_severity: RuleSeverity::Warn,
        check: check_no_impersonate_system,
    },
];

pub fn rule_def(id: RuleId) -> &'static RuleDef {
    CATALOG
        .iter()
        .find(|rule| rule.id == id)
        .unwrap_or(&CATALOG[0])
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("constitution rule pattern must compile"))
        .collect()
}

static IGNORE_SAFETY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(ignore|disregard|forget|override)\s+(all\s+|any\s+|the\s+|your\s+|of\s+)*(previous\s+|prior\s+|above\s+|earlier\s+)?(safety|instructions|rules|guidelines|guardrails)\b",
        r"(?i)\byou\s+are\s+now\s+(free|freed|released|liberated)\s+(from|of)\s+(all\s+|any\s+|your\s+)*(restrictions|rules|constraints|limitations|guidelines)\b",
    ])
});

static EXFILTRATION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(send|upload|forward|copy|leak|post|transmit)\s+(all\s+|any\s+|the\s+|your\s+|my\s+|of\s+|user\s+)*(secrets?|data|credentials?|api[\s_-]?keys?|tokens?|passwords?|private\s+keys?)\b[^.\n]{0,80}?\bto\b",
        r"(?i)\bexfiltrat(e|es|ed|ing|ion)\b",
    ])
});

static REMOVE_TOOL_RESTRICTIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(remove|disable|bypass|ignore|lift)\s+(all\s+|any\s+|the\s+|your\s+)*tool\s+(restrictions?|limits?|limitations|polic(y|ies)|allowlists?)\b",
        r"(?i)\ball\s+tools\s+are\s+(now\s+)?(enabled|unrestricted|allowed|permitted)\b",
    ])
});

static OVERRIDE_CONSTITUTION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(disable|bypass|ignore|override|suspend)\s+(the\s+|your\s+|this\s+)?constitution\b",
        r"(?i)\bconstitution\s+(is|has\s+been|was)\s+(now\s+)?(disabled|suspended|revoked|lifted|void)\b",
    ])
});

static IMPERSONATE_SYSTEM: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\[\s*system(\s+(message|prompt|notice))?\s*\]",
        r"(?i)<\|\s*im_start\s*\|>\s*system",
        r"(?i)<\|\s*system\s*\|>",
        r"<<\s*SYS\s*>>",
        r"(?i)<\s*/?\s*system(_message)?\s*>",
        r"(?i)\b(BEGIN|END)\s+SYSTEM\s+(MESSAGE|PROMPT)\b",
    ])
});

fn first_match(patterns: &[Regex], prompt: &str, what: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.find(prompt).map(|m| {
            format!(
                "{}: \"{}\"",
                what,
                compact_line(m.as_str(), MATCH_EXCERPT_CHARS)
            )
        })
    })
}

fn normalized(prompt: &str) -> Cow<'_, str> {
    if prompt.contains('\r') {
        Cow::Owned(prompt.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(prompt)
    }
}

fn has_safety_header(prompt: &str) -> bool {
    let header = assets::safety_header();
    prompt.lines().any(|line| line.trim_end() == header)
}

pub fn check_safety_section_present(prompt: &str) -> Option<String> {
    if has_safety_header(prompt) {
        None
    } else {
        Some(format!(
            "Safety section header \"{}\" is missing from the prompt",
            assets::safety_header()
        ))
    }
}

static CANONICAL_SECTION: LazyLock<String> = LazyLock::new(assets::canonical_safety_section);

/// The header must be followed directly by the canonical body, line for line.
pub fn check_safety_section_unmodified(prompt: &str) -> Option<String> {
    if !has_safety_header(prompt) {
        // Absence is reported by safety-section-present.
        return None;
    }
    let prompt = normalized(prompt);
    if prompt.contains(CANONICAL_SECTION.as_str()) {
        return None;
    }

    let header = assets::safety_header();
    let body = assets::safety_body();
    let following: Vec<&str> = prompt
        .lines()
        .skip_while(|line| line.trim_end() != header)
        .skip(1)
        .collect();
    let divergent = body
        .lines()
        .enumerate()
        .find(|(idx, line)| following.get(*idx).map(|l| l.trim_end()) != Some(line.trim_end()))
        .map(|(_, line)| line)
        .unwrap_or(body);
    Some(format!(
        "Safety section is present but its canonical text was altered; first divergent line: \"{}\"",
        compact_line(divergent, MATCH_EXCERPT_CHARS)
    ))
}

pub fn check_no_ignore_safety(prompt: &str) -> Option<String> {
    first_match(&IGNORE_SAFETY, prompt, "Instruction to ignore safety guidance")
}

pub fn check_no_exfiltration(prompt: &str) -> Option<String> {
    first_match(&EXFILTRATION, prompt, "Data exfiltration instruction")
}

pub fn check_no_remove_tool_restrictions(prompt: &str) -> Option<String> {
    first_match(
        &REMOVE_TOOL_RESTRICTIONS,
        prompt,
        "Instruction to remove tool restrictions",
    )
}

pub fn check_no_override_constitution(prompt: &str) -> Option<String> {
    first_match(
        &OVERRIDE_CONSTITUTION,
        prompt,
        "Instruction to override the constitution",
    )
}

pub fn check_no_impersonate_system(prompt: &str) -> Option<String> {
    first_match(
        &IMPERSONATE_SYSTEM,
        prompt,
        "Fake system-message delimiter",
    )
}
