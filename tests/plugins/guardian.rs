use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{TempDir, tempdir};
use warden::core::assets;
use warden::core::error::WardenError;
use warden::plugins::alert::{self, PauseLock, PauseOutcome, StopStrategy};
use warden::plugins::guardian::{
    CHECK_CONSTITUTION, CHECK_FILE_PERMISSIONS, CHECK_INTEGRITY, CHECK_TOOL_POLICY, Guardian,
    GuardianConfig,
};
use warden::plugins::incident::{self, Severity};

struct Unavailable(&'static str);

impl StopStrategy for Unavailable {
    fn name(&self) -> &str {
        self.0
    }
    fn attempt(&self) -> Result<(), WardenError> {
        Err(WardenError::MissingDependency(format!("{} not installed", self.0)))
    }
}

fn unavailable_strategies() -> Vec<Box<dyn StopStrategy>> {
    vec![
        Box::new(Unavailable("control-command")),
        Box::new(Unavailable("pid-signal")),
        Box::new(Unavailable("service-manager")),
        Box::new(Unavailable("os-service")),
    ]
}

fn healthy_config() -> Value {
    json!({
        "agents": {
            "defaults": {
                "systemPrompt": format!("You are a home assistant.\n\n{}", assets::canonical_safety_section()),
                "tools": {"exec": {"security": "allowlist"}}
            }
        },
        "gateway": {"bind": "loopback", "dmPolicy": "pairing"},
        "channels": {"telegram": {"dmPolicy": "pairing"}},
        "watchers": {"inbox": {"command": "true"}}
    })
}

struct Fixture {
    _tmp: TempDir,
    config_path: PathBuf,
    state_dir: PathBuf,
}

impl Fixture {
    fn new(doc: &Value) -> Self {
        let tmp = tempdir().unwrap();
        let config_path = tmp.path().join("openclaw.json");
        let state_dir = tmp.path().join("state");
        write_config(&config_path, doc);
        Self {
            _tmp: tmp,
            config_path,
            state_dir,
        }
    }

    fn settings(&self) -> GuardianConfig {
        GuardianConfig::new(&self.config_path, &self.state_dir)
    }

    fn guardian(&self) -> Guardian {
        Guardian::with_strategies(self.settings(), unavailable_strategies())
    }

    fn incident_count(&self) -> usize {
        incident::list_incidents(&self.settings().incidents_dir())
            .unwrap()
            .len()
    }
}

fn write_config(path: &Path, doc: &Value) {
    fs::write(path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
}

#[test]
fn test_unchanged_config_produces_no_incidents() {
    let fx = Fixture::new(&healthy_config());
    let guardian = fx.guardian();
    guardian.init_baseline().unwrap();

    for _ in 0..2 {
        let report = guardian.run_once().unwrap();
        assert!(report.passed(), "failed: {:?}", report.failed_checks());
        assert_eq!(report.outcomes.len(), 4);
    }
    assert_eq!(fx.incident_count(), 0);
}

#[test]
fn test_section_change_yields_one_drift_incident() {
    let fx = Fixture::new(&healthy_config());
    let guardian = fx.guardian();
    guardian.init_baseline().unwrap();

    let mut changed = healthy_config();
    changed["channels"]["discord"] = json!({"dmPolicy": "pairing"});
    write_config(&fx.config_path, &changed);

    let report = guardian.run_once().unwrap();
    assert_eq!(report.failed_checks(), vec![CHECK_INTEGRITY]);
    let incidents = incident::list_incidents(&fx.settings().incidents_dir()).unwrap();
    assert_eq!(incidents.len(), 1);
    let (_, record) = &incidents[0];
    assert_eq!(record.check, CHECK_INTEGRITY);
    assert_eq!(record.severity, Severity::Critical);
    assert!(record.details.contains("'channels'"));
    assert!(!record.details.contains("'gateway'"));

    // Pausing is opt-in.
    assert!(report.incidents().all(|r| r.pause.is_none()));
    assert!(!fx.settings().lock_path().exists());
}

#[test]
fn test_open_dm_policy_is_high_severity() {
    let mut doc = healthy_config();
    doc["gateway"]["dmPolicy"] = json!("open");
    let fx = Fixture::new(&doc);
    let guardian = fx.guardian();
    guardian.init_baseline().unwrap();

    let report = guardian.run_once().unwrap();
    assert_eq!(report.failed_checks(), vec![CHECK_TOOL_POLICY]);
    let recorded = report.incidents().next().unwrap();
    assert_eq!(recorded.incident.severity, Severity::High);
    assert!(recorded.incident.details.contains("open"));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_full_exec_security_is_reported() {
    let mut doc = healthy_config();
    doc["agents"]["defaults"]["tools"]["exec"]["security"] = json!("full");
    let fx = Fixture::new(&doc);
    let guardian = fx.guardian();
    guardian.init_baseline().unwrap();

    let report = guardian.run_once().unwrap();
    let recorded = report.incidents().next().unwrap();
    assert_eq!(recorded.incident.check, CHECK_TOOL_POLICY);
    assert!(recorded.incident.details.contains("full"));
}

#[test]
fn test_critical_incident_with_no_stop_method_writes_lock() {
    let fx = Fixture::new(&healthy_config());
    let mut settings = fx.settings();
    settings.pause_on_critical = true;
    let guardian = Guardian::with_strategies(settings, unavailable_strategies());
    guardian.init_baseline().unwrap();

    let mut changed = healthy_config();
    changed["gateway"]["bind"] = json!("loopback ");
    write_config(&fx.config_path, &changed);

    let report = guardian.run_once().unwrap();
    let recorded = report.incidents().next().unwrap();
    assert_eq!(recorded.incident.severity, Severity::Critical);
    assert!(matches!(recorded.pause, Some(PauseOutcome::Locked { .. })));

    let lock = alert::read_lock(&fx.settings().lock_path()).unwrap().unwrap();
    assert!(lock.locked);
    assert_eq!(lock.attempted.len(), 4);
    assert_eq!(
        lock.incident_path.as_deref(),
        Some(recorded.path.display().to_string().as_str())
    );
}

#[test]
fn test_missing_baseline_is_reported_not_created() {
    let fx = Fixture::new(&healthy_config());
    let report = fx.guardian().run_once().unwrap();
    let recorded = report.incidents().next().unwrap();
    assert_eq!(recorded.incident.check, CHECK_INTEGRITY);
    assert_eq!(recorded.incident.severity, Severity::High);
    assert!(!fx.settings().baseline_path().exists());
}

#[test]
fn test_checks_do_not_short_circuit() {
    let doc = json!({"gateway": {"dmPolicy": "open"}});
    let fx = Fixture::new(&doc);
    let report = fx.guardian().run_once().unwrap();
    assert_eq!(
        report.failed_checks(),
        vec![CHECK_CONSTITUTION, CHECK_TOOL_POLICY, CHECK_INTEGRITY]
    );
    assert_eq!(fx.incident_count(), 3);
    // First pass creates the default phrases file.
    assert!(fx.settings().phrases_path().exists());
}

#[test]
fn test_workspace_identity_docs_satisfy_phrases() {
    let mut doc = healthy_config();
    doc["agents"]["defaults"]
        .as_object_mut()
        .unwrap()
        .remove("systemPrompt");
    let fx = Fixture::new(&doc);
    let workspace = fx.config_path.parent().unwrap().join("workspace");
    fs::create_dir_all(&workspace).unwrap();
    fs::write(workspace.join("SOUL.md"), assets::canonical_safety_section()).unwrap();

    let mut settings = fx.settings();
    settings.workspace_dir = Some(workspace);
    let guardian = Guardian::with_strategies(settings, unavailable_strategies());
    guardian.init_baseline().unwrap();
    assert!(guardian.run_once().unwrap().passed());
}

#[cfg(unix)]
#[test]
fn test_world_writable_config_is_medium() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new(&healthy_config());
    let guardian = fx.guardian();
    guardian.init_baseline().unwrap();
    fs::set_permissions(&fx.config_path, fs::Permissions::from_mode(0o666)).unwrap();

    let report = guardian.run_once().unwrap();
    assert_eq!(report.failed_checks(), vec![CHECK_FILE_PERMISSIONS]);
    assert_eq!(
        report.incidents().next().unwrap().incident.severity,
        Severity::Medium
    );
}

#[test]
fn test_invalid_config_is_setup_error() {
    let fx = Fixture::new(&healthy_config());
    fs::write(&fx.config_path, "{ not json").unwrap();
    assert!(matches!(
        fx.guardian().run_once(),
        Err(WardenError::Config(_))
    ));
    assert_eq!(fx.incident_count(), 0);
}

fn warden(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_warden"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to execute warden")
}

#[test]
fn test_guard_cli_exit_codes() {
    let fx = Fixture::new(&healthy_config());
    let config = fx.config_path.to_str().unwrap();
    let state = fx.state_dir.to_str().unwrap();

    let out = warden(&["guard", "--config", config, "--state-dir", state, "--init-baseline"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(fx.settings().baseline_path().exists());

    let out = warden(&["guard", "--config", config, "--state-dir", state]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stdout));

    let mut changed = healthy_config();
    changed["hooks"] = json!({"onStart": "curl example.invalid"});
    write_config(&fx.config_path, &changed);
    let out = warden(&["guard", "--config", config, "--state-dir", state]);
    assert_eq!(out.status.code(), Some(1));

    let out = warden(&["incidents", "--state-dir", state]);
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("integrity"));

    let out = warden(&[
        "guard",
        "--config",
        config,
        "--state-dir",
        state,
        "--alert-cmd",
        "/nonexistent/page-oncall",
    ]);
    assert_eq!(out.status.code(), Some(2));

    fs::write(&fx.config_path, "[]").unwrap();
    let out = warden(&["guard", "--config", config, "--state-dir", state]);
    assert_eq!(out.status.code(), Some(2));
}

#[cfg(unix)]
#[test]
fn test_alert_command_receives_incident_path() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new(&healthy_config());
    let root = fx.config_path.parent().unwrap();
    let received = root.join("received.txt");
    let hook = root.join("alert.sh");
    fs::write(
        &hook,
        format!("#!/bin/sh\necho \"$1\" > '{}'\n", received.display()),
    )
    .unwrap();
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();

    let mut settings = fx.settings();
    settings.alert_cmd = Some(hook);
    let guardian = Guardian::with_strategies(settings, unavailable_strategies());
    // No baseline yet: one integrity incident.
    let report = guardian.run_once().unwrap();
    let recorded = report.incidents().next().unwrap();
    assert_eq!(recorded.alerted, Some(true));
    assert_eq!(
        fs::read_to_string(&received).unwrap().trim(),
        recorded.path.display().to_string()
    );
}

#[cfg(unix)]
#[test]
fn test_deleted_alert_hook_does_not_stop_the_pass() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new(&healthy_config());
    let hook = fx.config_path.parent().unwrap().join("alert.sh");
    fs::write(&hook, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();

    let mut settings = fx.settings();
    settings.alert_cmd = Some(hook.clone());
    let guardian = Guardian::with_strategies(settings, unavailable_strategies());
    guardian.config().verify_startup().unwrap();
    guardian.init_baseline().unwrap();
    assert!(guardian.run_once().unwrap().passed());

    let mut tampered = healthy_config();
    tampered["gateway"]["dmPolicy"] = json!("open");
    write_config(&fx.config_path, &tampered);
    fs::remove_file(&hook).unwrap();

    let report = guardian.run_once().unwrap();
    assert_eq!(
        report.failed_checks(),
        vec![CHECK_TOOL_POLICY, CHECK_INTEGRITY]
    );
    assert!(report.incidents().all(|r| r.alerted == Some(false)));
    assert_eq!(fx.incident_count(), 2);
}

#[test]
fn test_missing_alert_hook_at_startup_is_setup_error() {
    let fx = Fixture::new(&healthy_config());
    let mut settings = fx.settings();
    settings.alert_cmd = Some(PathBuf::from("/nonexistent/page-oncall"));
    assert!(matches!(
        settings.verify_startup(),
        Err(WardenError::MissingDependency(_))
    ));
    let guardian = Guardian::with_strategies(settings, unavailable_strategies());
    assert!(guardian.init_baseline().is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn test_unwritable_incident_still_dispatches_later_checks() {
    // The incidents directory resolves into procfs, where file creation fails
    // even for root.
    let fx = Fixture::new(&json!({}));
    let mut settings = fx.settings();
    settings.pause_on_critical = true;
    let guardian = Guardian::with_strategies(settings, unavailable_strategies());
    guardian.init_baseline().unwrap();

    write_config(&fx.config_path, &json!({"hooks": {"onStart": "true"}}));
    fs::remove_dir_all(fx.settings().incidents_dir()).unwrap();
    std::os::unix::fs::symlink("/proc/self", fx.settings().incidents_dir()).unwrap();

    // Constitution fails first (no prompt), then integrity drifts.
    assert!(guardian.run_once().is_err());
    let lock = alert::read_lock(&fx.settings().lock_path()).unwrap().unwrap();
    assert!(lock.locked);
    assert!(lock.reason.contains(CHECK_INTEGRITY));
    assert_eq!(lock.incident_path, None);
}

#[cfg(unix)]
#[test]
fn test_watch_mode_repeats_passes_and_exits_cleanly_on_sigterm() {
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let mut doc = healthy_config();
    doc["gateway"]["dmPolicy"] = json!("open");
    let fx = Fixture::new(&doc);
    let config = fx.config_path.to_str().unwrap();
    let state = fx.state_dir.to_str().unwrap();
    assert_eq!(
        warden(&["guard", "--config", config, "--state-dir", state, "--init-baseline"])
            .status
            .code(),
        Some(0)
    );

    let mut child = Command::new(env!("CARGO_BIN_EXE_warden"))
        .args([
            "guard",
            "--config",
            config,
            "--state-dir",
            state,
            "--watch",
            "--check-interval",
            "1",
        ])
        .env("RUST_LOG", "off")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(15);
    while fx.incident_count() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }
    let seen = fx.incident_count();
    if seen < 2 {
        let _ = child.kill();
        panic!("watch loop recorded only {} incidents", seen);
    }
    assert!(child.try_wait().unwrap().is_none(), "watch loop exited early");

    let pid = i32::try_from(child.id()).unwrap();
    // SAFETY: plain kill(2) on our own child.
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(0));
}

#[test]
fn test_pause_cli_status_and_clear() {
    let fx = Fixture::new(&healthy_config());
    let state = fx.state_dir.to_str().unwrap();
    let lock_path = fx.settings().lock_path();

    let out = warden(&["pause", "status", "--state-dir", state]);
    assert_eq!(out.status.code(), Some(0));

    fs::create_dir_all(&fx.state_dir).unwrap();
    let lock = PauseLock {
        locked: true,
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        reason: "critical integrity incident".to_string(),
        incident_path: None,
        attempted: vec!["control-command: not installed".to_string()],
    };
    fs::write(&lock_path, serde_json::to_string(&lock).unwrap()).unwrap();

    let out = warden(&["pause", "status", "--state-dir", state]);
    assert_eq!(out.status.code(), Some(1));

    let out = warden(&["pause", "clear", "--state-dir", state]);
    assert_eq!(out.status.code(), Some(0));
    assert!(!lock_path.exists());
}
