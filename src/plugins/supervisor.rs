//! Watcher Process Supervisor
//!
//! Runs each enabled watcher as its own child process, outside the agent's
//! reasoning loop, and keeps it alive:
//! - One task per watcher owns the child and its state machine
//!   (`Starting -> Running -> Restarting -> Starting ...`, any -> `Stopped`)
//! - Exits inside the rapid-exit window grow an exponential restart delay,
//!   capped at a ceiling
//! - The restart wait is a cancellable sleep owned by that task, so `stop()`
//!   can never race a pending restart
//! - `stop()` signals every watcher first, then joins them all
//!
//! Watcher stdout/stderr is forwarded to the log line by line and never parsed.

use crate::core::config::WatcherSpec;
use crate::core::error::WardenError;
use crate::core::shutdown::ShutdownSignal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Environment variable carrying the watcher's name into its process.
pub const WATCHER_NAME_ENV: &str = "WARDEN_WATCHER_NAME";
/// Environment variable carrying the poll interval hint (seconds).
pub const WATCHER_INTERVAL_ENV: &str = "WARDEN_WATCHER_INTERVAL";

const DEFAULT_POLL_INTERVAL_SECS: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Base restart delay when a spec does not override it.
    pub default_restart_delay: Duration,
    /// Exits sooner than this after start count as rapid exits.
    pub rapid_exit_threshold: Duration,
    /// Ceiling for the exponential restart delay.
    pub max_restart_delay: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub stop_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            default_restart_delay: Duration::from_secs(5),
            rapid_exit_threshold: Duration::from_secs(10),
            max_restart_delay: Duration::from_secs(300),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// `base * 2^(max(rapid_exits - 1, 0))`, never above `ceiling`.
pub fn restart_delay(base: Duration, rapid_exits: u32, ceiling: Duration) -> Duration {
    let exponent = rapid_exits.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .unwrap_or(ceiling)
        .min(ceiling)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherPhase {
    Starting,
    Running,
    Restarting,
    Stopped,
}

#[derive(Debug)]
struct WatcherState {
    phase: WatcherPhase,
    pid: Option<u32>,
    rapid_exits: u32,
    restarts: u32,
    last_start: Option<Instant>,
    last_delay: Option<Duration>,
    stopped: bool,
}

impl WatcherState {
    fn new() -> Self {
        Self {
            phase: WatcherPhase::Starting,
            pid: None,
            rapid_exits: 0,
            restarts: 0,
            last_start: None,
            last_delay: None,
            stopped: false,
        }
    }

    fn is_running(&self) -> bool {
        self.phase == WatcherPhase::Running && self.pid.is_some() && !self.stopped
    }
}

/// Point-in-time view of one watcher. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherStatus {
    pub name: String,
    pub phase: WatcherPhase,
    pub pid: Option<u32>,
    pub rapid_exits: u32,
    pub restarts: u32,
    pub last_delay: Option<Duration>,
    pub uptime: Option<Duration>,
}

struct WatcherSlot {
    state: Arc<Mutex<WatcherState>>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    options: SupervisorOptions,
    working_dir: PathBuf,
    slots: Mutex<BTreeMap<String, WatcherSlot>>,
    /// Serializes `stop` and `update_config` against each other.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slots = self
            .slots
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for slot in slots.values() {
            slot.stop_tx.send_replace(true);
        }
    }
}

/// Handle to a running supervisor. Cheap to clone. Dropping the last handle
/// without `stop()` still signals every watcher to terminate, but does not
/// wait for them.
#[derive(Clone)]
pub struct WatcherSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WatcherSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherSupervisor")
            .field("working_dir", &self.inner.working_dir)
            .field("watchers", &self.list_running())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WatcherSupervisor {
    /// Start every startable spec. Must be called inside a tokio runtime.
    pub fn start(specs: &[WatcherSpec], working_dir: &Path) -> Self {
        Self::start_with_options(specs, working_dir, SupervisorOptions::default())
    }

    pub fn start_with_options(
        specs: &[WatcherSpec],
        working_dir: &Path,
        options: SupervisorOptions,
    ) -> Self {
        let supervisor = Self {
            inner: Arc::new(Inner {
                options,
                working_dir: working_dir.to_path_buf(),
                slots: Mutex::new(BTreeMap::new()),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        };
        supervisor.launch_all(specs);
        supervisor
    }

    fn launch_all(&self, specs: &[WatcherSpec]) {
        let mut slots = lock(&self.inner.slots);
        for spec in specs {
            if !spec.is_startable() {
                info!(watcher = %spec.name, enabled = spec.enabled, "skipping watcher");
                continue;
            }
            if slots.contains_key(&spec.name) {
                warn!(watcher = %spec.name, "duplicate watcher name; keeping the first");
                continue;
            }
            let state = Arc::new(Mutex::new(WatcherState::new()));
            let (stop_tx, stop_rx) = watch::channel(false);
            let task = tokio::spawn(run_watcher(
                spec.clone(),
                self.inner.working_dir.clone(),
                self.inner.options.clone(),
                Arc::clone(&state),
                stop_rx,
            ));
            slots.insert(
                spec.name.clone(),
                WatcherSlot {
                    state,
                    stop_tx,
                    task,
                },
            );
        }
    }

    /// Stop every watcher (graceful, then forceful) and wait for all of them.
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.stop_all().await;
    }

    async fn stop_all(&self) {
        let drained: Vec<(String, WatcherSlot)> =
            std::mem::take(&mut *lock(&self.inner.slots)).into_iter().collect();
        if drained.is_empty() {
            return;
        }

        for (_, slot) in &drained {
            lock(&slot.state).stopped = true;
            slot.stop_tx.send_replace(true);
        }
        for (name, slot) in drained {
            if let Err(e) = slot.task.await {
                error!(watcher = %name, error = %e, "watcher task ended abnormally");
            }
        }
        info!("all watchers stopped");
    }

    /// Full stop followed by a fresh start with `specs`. No incremental diffing.
    pub async fn update_config(&self, specs: &[WatcherSpec]) {
        let _guard = self.inner.lifecycle.lock().await;
        self.stop_all().await;
        self.launch_all(specs);
    }

    /// Names of watchers with a live process at the instant of the call.
    pub fn list_running(&self) -> Vec<String> {
        lock(&self.inner.slots)
            .iter()
            .filter(|(_, slot)| lock(&slot.state).is_running())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<WatcherStatus> {
        lock(&self.inner.slots)
            .iter()
            .map(|(name, slot)| {
                let state = lock(&slot.state);
                WatcherStatus {
                    name: name.clone(),
                    phase: state.phase,
                    pid: state.pid,
                    rapid_exits: state.rapid_exits,
                    restarts: state.restarts,
                    last_delay: state.last_delay,
                    uptime: state
                        .last_start
                        .filter(|_| state.is_running())
                        .map(|started| started.elapsed()),
                }
            })
            .collect()
    }
}

async fn run_watcher(
    spec: WatcherSpec,
    working_dir: PathBuf,
    options: SupervisorOptions,
    state: Arc<Mutex<WatcherState>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let base_delay = spec
        .restart_delay_seconds
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(options.default_restart_delay);

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let started = Instant::now();
        {
            let mut st = lock(&state);
            st.phase = WatcherPhase::Starting;
            st.last_start = Some(started);
        }

        match spawn_child(&spec, &working_dir) {
            Ok(mut child) => {
                let pid = child.id();
                {
                    let mut st = lock(&state);
                    st.phase = WatcherPhase::Running;
                    st.pid = pid;
                }
                info!(watcher = %spec.name, pid = pid.unwrap_or_default(), "watcher started");
                forward_output(&spec.name, &mut child);

                tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) => warn!(watcher = %spec.name, %status, "watcher exited"),
                        Err(e) => error!(watcher = %spec.name, error = %e, "failed waiting on watcher"),
                    },
                    _ = stop_rx.changed() => {
                        terminate(&spec.name, &mut child, options.stop_timeout).await;
                        break;
                    }
                }
            }
            Err(e) => error!(watcher = %spec.name, error = %e, "failed to start watcher"),
        }

        let elapsed = started.elapsed();
        let delay = {
            let mut st = lock(&state);
            st.pid = None;
            if elapsed < options.rapid_exit_threshold {
                st.rapid_exits += 1;
            } else {
                st.rapid_exits = 0;
            }
            let delay = restart_delay(base_delay, st.rapid_exits, options.max_restart_delay);
            st.last_delay = Some(delay);
            st.restarts += 1;
            st.phase = WatcherPhase::Restarting;
            delay
        };
        info!(
            watcher = %spec.name,
            delay_ms = delay.as_millis() as u64,
            uptime_ms = elapsed.as_millis() as u64,
            "scheduling watcher restart"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => break,
        }
    }

    let mut st = lock(&state);
    st.phase = WatcherPhase::Stopped;
    st.pid = None;
    st.stopped = true;
}

fn resolve_cwd(spec: &WatcherSpec, working_dir: &Path) -> PathBuf {
    match &spec.cwd {
        Some(cwd) if cwd.is_absolute() => cwd.clone(),
        Some(cwd) => working_dir.join(cwd),
        None => working_dir.to_path_buf(),
    }
}

fn spawn_child(spec: &WatcherSpec, working_dir: &Path) -> Result<Child, WardenError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&spec.command)
        .current_dir(resolve_cwd(spec, working_dir))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (k, v) in &spec.env {
        cmd.env(k, v);
    }
    cmd.env(WATCHER_NAME_ENV, &spec.name).env(
        WATCHER_INTERVAL_ENV,
        spec.interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS).to_string(),
    );

    // Own process group so signals reach anything the shell spawned.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
        .map_err(|e| WardenError::Spawn(format!("watcher '{}': {}", spec.name, e)))
}

fn forward_output(name: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(watcher = %name, "{}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(watcher = %name, "{}", line);
            }
        });
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pgid only
    // yields ESRCH.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

/// SIGTERM to the process group, wait up to `timeout`, then SIGKILL.
async fn terminate(name: &str, child: &mut Child, timeout: Duration) {
    let Some(pid) = child.id() else {
        return;
    };

    #[cfg(unix)]
    signal_group(pid, libc::SIGTERM);
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(_) => info!(watcher = %name, pid, "watcher stopped"),
        Err(_) => {
            warn!(watcher = %name, pid, "watcher ignored graceful stop; killing");
            #[cfg(unix)]
            signal_group(pid, libc::SIGKILL);
            if let Err(e) = child.kill().await {
                error!(watcher = %name, error = %e, "failed to kill watcher");
            }
        }
    }
}

/// Run the supervisor in the foreground until SIGTERM/SIGINT, then stop it.
pub async fn run_until_signal(
    specs: &[WatcherSpec],
    working_dir: &Path,
) -> Result<(), WardenError> {
    let mut shutdown = ShutdownSignal::register()?;
    let supervisor = WatcherSupervisor::start(specs, working_dir);
    info!(
        watchers = specs.iter().filter(|s| s.is_startable()).count(),
        "watcher supervisor running"
    );
    shutdown.recv().await;
    supervisor.stop().await;
    Ok(())
}
