//! Alert/Pause Dispatcher
//!
//! Two outward actions consumed by the guardian:
//! - Alert: run an operator command with the incident file path as its only
//!   argument. Its exit status is logged, never fatal.
//! - Pause: try each gateway stop strategy in order, falling through on
//!   failure. If all fail, write a lock file so startup logic can refuse to
//!   proceed. A pause never fails silently.

use crate::core::error::WardenError;
use crate::core::output::compact_line;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{error, info, warn};

/// How to reach the gateway process on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayControl {
    /// Gateway CLI that understands `gateway stop`.
    pub cli: String,
    /// Pid file of the running gateway, for direct signalling.
    pub pid_file: Option<PathBuf>,
    /// systemd user unit / service name.
    pub service_unit: String,
    /// launchd label (macOS).
    pub launchd_label: String,
}

impl Default for GatewayControl {
    fn default() -> Self {
        Self {
            cli: "openclaw".to_string(),
            pid_file: None,
            service_unit: "openclaw-gateway".to_string(),
            launchd_label: "ai.openclaw.gateway".to_string(),
        }
    }
}

pub trait StopStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn attempt(&self) -> Result<(), WardenError>;
}

fn run_command(program: &str, args: &[&str]) -> Result<(), WardenError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WardenError::MissingDependency(format!("{} not found", program))
            } else {
                WardenError::IoError(e)
            }
        })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(WardenError::Validation(format!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            compact_line(&String::from_utf8_lossy(&output.stderr), 160)
        )))
    }
}

/// `<cli> gateway stop`
pub struct ControlCommand {
    pub cli: String,
}

impl StopStrategy for ControlCommand {
    fn name(&self) -> &str {
        "control-command"
    }

    fn attempt(&self) -> Result<(), WardenError> {
        run_command(&self.cli, &["gateway", "stop"])
    }
}

/// SIGTERM to the pid recorded in the gateway pid file.
pub struct PidSignal {
    pub pid_file: Option<PathBuf>,
}

impl StopStrategy for PidSignal {
    fn name(&self) -> &str {
        "pid-signal"
    }

    fn attempt(&self) -> Result<(), WardenError> {
        let Some(pid_file) = &self.pid_file else {
            return Err(WardenError::NotFound("no gateway pid file configured".into()));
        };
        let raw = fs::read_to_string(pid_file)?;
        let pid: i32 = raw.trim().parse().map_err(|_| {
            WardenError::Validation(format!("{} does not hold a pid", pid_file.display()))
        })?;
        if pid <= 1 {
            return Err(WardenError::Validation(format!("refusing to signal pid {}", pid)));
        }
        signal_pid(pid)
    }
}

#[cfg(unix)]
fn signal_pid(pid: i32) -> Result<(), WardenError> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().into())
    }
}

#[cfg(not(unix))]
fn signal_pid(_pid: i32) -> Result<(), WardenError> {
    Err(WardenError::MissingDependency(
        "process signalling is unsupported on this platform".into(),
    ))
}

/// `systemctl --user stop <unit>`
pub struct ServiceManager {
    pub unit: String,
}

impl StopStrategy for ServiceManager {
    fn name(&self) -> &str {
        "service-manager"
    }

    fn attempt(&self) -> Result<(), WardenError> {
        run_command("systemctl", &["--user", "stop", &self.unit])
    }
}

/// launchd on macOS, `service <unit> stop` elsewhere.
pub struct OsService {
    pub unit: String,
    pub launchd_label: String,
}

impl StopStrategy for OsService {
    fn name(&self) -> &str {
        "os-service"
    }

    fn attempt(&self) -> Result<(), WardenError> {
        if cfg!(target_os = "macos") {
            // SAFETY: getuid(2) cannot fail and touches no caller memory.
            #[cfg(unix)]
            let uid = unsafe { libc::getuid() };
            #[cfg(not(unix))]
            let uid = 0;
            let target = format!("gui/{}/{}", uid, self.launchd_label);
            run_command("launchctl", &["bootout", &target])
        } else {
            run_command("service", &[&self.unit, "stop"])
        }
    }
}

/// Strategies in escalation order.
pub fn default_strategies(control: &GatewayControl) -> Vec<Box<dyn StopStrategy>> {
    vec![
        Box::new(ControlCommand {
            cli: control.cli.clone(),
        }),
        Box::new(PidSignal {
            pid_file: control.pid_file.clone(),
        }),
        Box::new(ServiceManager {
            unit: control.service_unit.clone(),
        }),
        Box::new(OsService {
            unit: control.service_unit.clone(),
            launchd_label: control.launchd_label.clone(),
        }),
    ]
}

/// Durable record of a pause that could not be carried out directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseLock {
    pub locked: bool,
    pub timestamp: String,
    pub reason: String,
    pub incident_path: Option<String>,
    pub attempted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseOutcome {
    Stopped { strategy: String },
    Locked { lock_path: PathBuf },
}

pub fn pause_gateway(
    strategies: &[Box<dyn StopStrategy>],
    lock_path: &Path,
    reason: &str,
    incident_path: Option<&Path>,
) -> Result<PauseOutcome, WardenError> {
    let mut attempted = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        match strategy.attempt() {
            Ok(()) => {
                info!(strategy = strategy.name(), "gateway paused");
                return Ok(PauseOutcome::Stopped {
                    strategy: strategy.name().to_string(),
                });
            }
            Err(e) => {
                warn!(strategy = strategy.name(), error = %e, "gateway stop strategy failed");
                attempted.push(format!("{}: {}", strategy.name(), e));
            }
        }
    }

    let lock = PauseLock {
        locked: true,
        timestamp: time::now_iso(),
        reason: reason.to_string(),
        incident_path: incident_path.map(|p| p.display().to_string()),
        attempted,
    };
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(lock_path, serde_json::to_string_pretty(&lock)?)?;
    error!(
        lock = %lock_path.display(),
        "every gateway stop strategy failed; wrote pause lock"
    );
    Ok(PauseOutcome::Locked {
        lock_path: lock_path.to_path_buf(),
    })
}

pub fn read_lock(lock_path: &Path) -> Result<Option<PauseLock>, WardenError> {
    match fs::read_to_string(lock_path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove the pause lock. Returns whether a lock was present.
pub fn clear_lock(lock_path: &Path) -> Result<bool, WardenError> {
    match fs::remove_file(lock_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Setup check: the alert command must resolve to something executable.
pub fn ensure_alert_command(alert_cmd: &Path) -> Result<(), WardenError> {
    let found = if alert_cmd.components().count() > 1 {
        alert_cmd.is_file()
    } else {
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(alert_cmd).is_file()))
            .unwrap_or(false)
    };
    if found {
        Ok(())
    } else {
        Err(WardenError::MissingDependency(format!(
            "alert command {} not found",
            alert_cmd.display()
        )))
    }
}

/// Run the alert command. Returns whether it exited successfully; failures are
/// logged and never propagated.
pub fn send_alert(alert_cmd: &Path, incident_path: &Path) -> bool {
    match Command::new(alert_cmd)
        .arg(incident_path)
        .stdin(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {
            info!(alert = %alert_cmd.display(), incident = %incident_path.display(), "alert delivered");
            true
        }
        Ok(status) => {
            error!(alert = %alert_cmd.display(), %status, "alert command failed");
            false
        }
        Err(e) => {
            error!(alert = %alert_cmd.display(), error = %e, "alert command could not run");
            false
        }
    }
}
