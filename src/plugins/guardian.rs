//! Config Integrity Guardian
//!
//! Runs as its own process, independent of the agent and the supervisor. A
//! check pass loads the live configuration and runs four independent checks:
//! constitutional text, tool policy, integrity (baseline drift), and file
//! permissions. Every failing check writes its own incident and triggers the
//! dispatcher; checks never short-circuit each other.

use crate::core::config;
use crate::core::constitution;
use crate::core::error::{EXIT_FAIL, EXIT_PASS, WardenError};
use crate::core::output::compact_line;
use crate::core::shutdown::ShutdownSignal;
use crate::plugins::alert::{self, GatewayControl, PauseOutcome, StopStrategy};
use crate::plugins::baseline::{self, Baseline};
use crate::plugins::incident::{self, Incident, Severity};
use crate::plugins::policy;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const CHECK_CONSTITUTION: &str = "constitution";
pub const CHECK_TOOL_POLICY: &str = "tool-policy";
pub const CHECK_INTEGRITY: &str = "integrity";
pub const CHECK_FILE_PERMISSIONS: &str = "file-permissions";

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Optional `guardian.toml` in the state directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardianSettingsFile {
    pub alert_cmd: Option<PathBuf>,
    pub pause_on_critical: Option<bool>,
    pub check_interval_secs: Option<u64>,
    pub workspace_dir: Option<PathBuf>,
    pub gateway: Option<GatewayControl>,
}

/// Everything the guardian needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub workspace_dir: Option<PathBuf>,
    pub alert_cmd: Option<PathBuf>,
    pub pause_on_critical: bool,
    pub check_interval: Duration,
    pub gateway: GatewayControl,
}

impl GuardianConfig {
    pub fn new(config_path: &Path, state_dir: &Path) -> Self {
        Self {
            config_path: config_path.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
            workspace_dir: None,
            alert_cmd: None,
            pause_on_critical: false,
            check_interval: DEFAULT_CHECK_INTERVAL,
            gateway: GatewayControl::default(),
        }
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.state_dir.join("baseline.sha256")
    }

    pub fn incidents_dir(&self) -> PathBuf {
        self.state_dir.join("incidents")
    }

    pub fn phrases_path(&self) -> PathBuf {
        self.state_dir.join("constitution-phrases.txt")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("gateway.lock")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.state_dir.join("guardian.toml")
    }

    /// Layer `guardian.toml` (if present) over the current values.
    pub fn apply_settings_file(&mut self) -> Result<(), WardenError> {
        let path = self.settings_path();
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&path)?;
        let settings: GuardianSettingsFile = toml::from_str(&content)?;
        if let Some(cmd) = settings.alert_cmd {
            self.alert_cmd = Some(cmd);
        }
        if let Some(pause) = settings.pause_on_critical {
            self.pause_on_critical = pause;
        }
        if let Some(secs) = settings.check_interval_secs {
            self.check_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(dir) = settings.workspace_dir {
            self.workspace_dir = Some(dir);
        }
        if let Some(gateway) = settings.gateway {
            self.gateway = gateway;
        }
        Ok(())
    }

    /// Idempotent setup: create the state directories. Safe to repeat every pass.
    pub fn prepare(&self) -> Result<(), WardenError> {
        fs::create_dir_all(self.incidents_dir())?;
        Ok(())
    }

    /// Startup-only verification of external commands. A command that goes
    /// missing later is an alert failure, logged per incident.
    pub fn verify_startup(&self) -> Result<(), WardenError> {
        if let Some(cmd) = &self.alert_cmd {
            alert::ensure_alert_command(cmd)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub check: &'static str,
    pub incident: Option<RecordedIncident>,
}

#[derive(Debug, Clone)]
pub struct RecordedIncident {
    pub incident: Incident,
    pub path: PathBuf,
    pub alerted: Option<bool>,
    pub pause: Option<PauseOutcome>,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl PassReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.incident.is_none())
    }

    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.outcomes
            .iter()
            .filter(|o| o.incident.is_some())
            .map(|o| o.check)
            .collect()
    }

    pub fn incidents(&self) -> impl Iterator<Item = &RecordedIncident> {
        self.outcomes.iter().filter_map(|o| o.incident.as_ref())
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() { EXIT_PASS } else { EXIT_FAIL }
    }

    pub fn summary(&self) -> String {
        let failed = self.failed_checks();
        if failed.is_empty() {
            format!("guardian: PASS ({} checks)", self.outcomes.len())
        } else {
            format!(
                "guardian: FAIL ({}/{} checks failed: {})",
                failed.len(),
                self.outcomes.len(),
                failed.join(", ")
            )
        }
    }
}

pub struct Guardian {
    config: GuardianConfig,
    strategies: Vec<Box<dyn StopStrategy>>,
}

impl std::fmt::Debug for Guardian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardian")
            .field("config", &self.config)
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Guardian {
    pub fn new(config: GuardianConfig) -> Self {
        let strategies = alert::default_strategies(&config.gateway);
        Self { config, strategies }
    }

    pub fn with_strategies(config: GuardianConfig, strategies: Vec<Box<dyn StopStrategy>>) -> Self {
        Self { config, strategies }
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    /// Explicit baseline creation. Normal passes never call this.
    pub fn init_baseline(&self) -> Result<Baseline, WardenError> {
        self.config.verify_startup()?;
        self.config.prepare()?;
        let doc = config::load_document(&self.config.config_path)?;
        let written = baseline::write_baseline(&self.config.baseline_path(), &doc)?;
        info!(
            baseline = %self.config.baseline_path().display(),
            entries = written.len(),
            "baseline initialized"
        );
        Ok(written)
    }

    /// One full check pass. Every finding is recorded and dispatched before any
    /// error is returned; `Err` means setup failed or an incident could not be
    /// written.
    pub fn run_once(&self) -> Result<PassReport, WardenError> {
        self.config.prepare()?;
        let doc = config::load_document(&self.config.config_path)?;
        let phrases = config::load_phrases(&self.config.phrases_path())?;

        let findings = [
            (CHECK_CONSTITUTION, self.check_constitution(&doc, &phrases)),
            (CHECK_TOOL_POLICY, self.check_tool_policy(&doc)),
            (CHECK_INTEGRITY, self.check_integrity(&doc)),
            (CHECK_FILE_PERMISSIONS, self.check_file_permissions()),
        ];

        let mut outcomes = Vec::with_capacity(findings.len());
        let mut first_error = None;
        for (check, finding) in findings {
            let incident = match finding {
                None => {
                    info!(check, "check passed");
                    None
                }
                Some((severity, details)) => match self.record(severity, check, details) {
                    Ok(recorded) => Some(recorded),
                    Err(e) => {
                        first_error.get_or_insert(e);
                        continue;
                    }
                },
            };
            outcomes.push(CheckOutcome { check, incident });
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(PassReport { outcomes }),
        }
    }

    fn check_constitution(
        &self,
        doc: &serde_json::Value,
        phrases: &[String],
    ) -> Option<(Severity, String)> {
        let text = config::resolved_prompt_text(doc, self.config.workspace_dir.as_deref());
        let missing = constitution::missing_phrases(&text, phrases);
        if missing.is_empty() {
            return None;
        }
        let mut details = format!(
            "{} of {} constitutional phrases missing from the resolved system prompt:",
            missing.len(),
            phrases.len()
        );
        for phrase in &missing {
            details.push_str(&format!("\n- {}", phrase));
        }
        if text.trim().is_empty() {
            details.push_str("\n(no system prompt or workspace identity documents were found)");
        }
        Some((Severity::High, details))
    }

    fn check_tool_policy(&self, doc: &serde_json::Value) -> Option<(Severity, String)> {
        let findings = policy::tool_policy_findings(doc);
        if findings.is_empty() {
            None
        } else {
            Some((Severity::High, findings.join("\n")))
        }
    }

    fn check_integrity(&self, doc: &serde_json::Value) -> Option<(Severity, String)> {
        let path = self.config.baseline_path();
        let stored = match baseline::read_baseline(&path) {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                return Some((
                    Severity::High,
                    format!(
                        "no baseline at {}; run with --init-baseline to record one",
                        path.display()
                    ),
                ));
            }
            Err(e) => {
                return Some((
                    Severity::Critical,
                    format!("baseline at {} is unreadable or corrupt: {}", path.display(), e),
                ));
            }
        };

        let drift = baseline::compare(&stored, &baseline::compute(doc));
        if drift.is_empty() {
            return None;
        }
        let lines: Vec<String> = drift
            .iter()
            .map(|d| match &d.expected {
                Some(expected) => format!(
                    "section '{}' changed (baseline {}, current {})",
                    d.key,
                    &expected[..expected.len().min(12)],
                    &d.actual[..d.actual.len().min(12)]
                ),
                None => format!("section '{}' has no baseline record", d.key),
            })
            .collect();
        Some((Severity::Critical, lines.join("\n")))
    }

    fn check_file_permissions(&self) -> Option<(Severity, String)> {
        let candidates = [
            self.config.config_path.clone(),
            self.config.baseline_path(),
            self.config.phrases_path(),
            self.config.settings_path(),
        ];
        let flagged: Vec<String> = candidates
            .iter()
            .filter(|path| is_world_writable(path))
            .map(|path| format!("{} is world-writable", path.display()))
            .collect();
        if flagged.is_empty() {
            None
        } else {
            Some((Severity::Medium, flagged.join("\n")))
        }
    }

    /// Persist the incident, then alert and (for critical) pause. The pause is
    /// attempted even when the incident file could not be written.
    fn record(
        &self,
        severity: Severity,
        check: &'static str,
        details: String,
    ) -> Result<RecordedIncident, WardenError> {
        let incident = Incident::new(severity, check, &self.config.config_path, details);
        let written = incident::write_incident(&self.config.incidents_dir(), &incident);
        let path = match &written {
            Ok(path) => {
                warn!(
                    check,
                    severity = %severity,
                    incident = %path.display(),
                    details = %compact_line(&incident.details, 160),
                    "check failed"
                );
                Some(path.clone())
            }
            Err(e) => {
                error!(
                    check,
                    severity = %severity,
                    error = %e,
                    details = %compact_line(&incident.details, 160),
                    "check failed and its incident could not be written"
                );
                None
            }
        };

        let alerted = match (&self.config.alert_cmd, &path) {
            (Some(cmd), Some(path)) => Some(alert::send_alert(cmd, path)),
            _ => None,
        };

        let pause = if severity == Severity::Critical && self.config.pause_on_critical {
            match alert::pause_gateway(
                &self.strategies,
                &self.config.lock_path(),
                &format!("critical {} incident", check),
                path.as_deref(),
            ) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(check, error = %e, "failed to pause gateway or write pause lock");
                    None
                }
            }
        } else {
            None
        };

        let path = written?;
        Ok(RecordedIncident {
            incident,
            path,
            alerted,
            pause,
        })
    }
}

#[cfg(unix)]
fn is_world_writable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o002 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_world_writable(_path: &Path) -> bool {
    false
}

/// Repeat check passes until SIGTERM/SIGINT. One pass in flight at a time; the
/// interval is slept after each completed pass. Only setup errors end the loop.
pub async fn watch(guardian: Arc<Guardian>) -> Result<(), WardenError> {
    let mut shutdown = ShutdownSignal::register()?;
    let interval = guardian.config().check_interval;
    info!(interval_secs = interval.as_secs(), "guardian watch loop started");

    loop {
        let pass_guardian = Arc::clone(&guardian);
        let report = tokio::task::spawn_blocking(move || pass_guardian.run_once())
            .await
            .map_err(|e| WardenError::Validation(format!("check pass panicked: {}", e)))??;
        if report.passed() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.recv() => break,
        }
    }
    info!("guardian watch loop stopped");
    Ok(())
}
