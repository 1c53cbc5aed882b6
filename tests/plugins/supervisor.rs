use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use warden::core::config::WatcherSpec;
use warden::plugins::supervisor::{SupervisorOptions, WatcherPhase, WatcherSupervisor};

fn fast_options() -> SupervisorOptions {
    SupervisorOptions {
        default_restart_delay: Duration::from_millis(50),
        rapid_exit_threshold: Duration::from_secs(10),
        max_restart_delay: Duration::from_millis(400),
        stop_timeout: Duration::from_millis(500),
    }
}

fn count_lines(path: &Path) -> usize {
    fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
}

async fn wait_until<F: Fn() -> bool>(cond: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn test_disabled_and_blank_watchers_never_run() {
    let tmp = tempdir().unwrap();
    let mut disabled = WatcherSpec::new("disabled", "sleep 30");
    disabled.enabled = false;
    let blank = WatcherSpec::new("blank", "   ");
    let live = WatcherSpec::new("live", "sleep 30");

    let sup =
        WatcherSupervisor::start_with_options(&[disabled, blank, live], tmp.path(), fast_options());
    assert!(wait_until(|| sup.list_running() == vec!["live".to_string()], Duration::from_secs(5)).await);
    let names: Vec<_> = sup.statuses().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["live".to_string()]);
    sup.stop().await;
}

#[tokio::test]
async fn test_rapid_exits_back_off_monotonically_up_to_ceiling() {
    let tmp = tempdir().unwrap();
    let spec = WatcherSpec::new("crashy", "exit 3");
    let options = fast_options();
    let ceiling = options.max_restart_delay;
    let sup = WatcherSupervisor::start_with_options(&[spec], tmp.path(), options);

    let mut delays: Vec<Duration> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if let Some(delay) = sup.statuses().first().and_then(|s| s.last_delay)
            && delays.last() != Some(&delay)
        {
            delays.push(delay);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    sup.stop().await;

    assert!(delays.len() >= 3, "observed delays: {:?}", delays);
    assert!(delays.windows(2).all(|w| w[1] > w[0]), "not monotonic: {:?}", delays);
    assert!(delays.iter().all(|d| *d <= ceiling));
    assert_eq!(*delays.last().unwrap(), ceiling);
}

#[tokio::test]
async fn test_no_restarts_after_stop() {
    let tmp = tempdir().unwrap();
    let counter = tmp.path().join("starts.log");
    let spec = WatcherSpec::new(
        "counter",
        &format!("echo start >> '{}'; exit 1", counter.display()),
    );
    let sup = WatcherSupervisor::start_with_options(&[spec], tmp.path(), fast_options());

    assert!(wait_until(|| count_lines(&counter) >= 2, Duration::from_secs(5)).await);
    sup.stop().await;
    assert!(sup.list_running().is_empty());
    assert!(sup.statuses().is_empty());

    let after_stop = count_lines(&counter);
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(count_lines(&counter), after_stop);
}

#[tokio::test]
async fn test_update_config_replaces_running_set() {
    let tmp = tempdir().unwrap();
    let sup = WatcherSupervisor::start_with_options(
        &[
            WatcherSpec::new("alpha", "sleep 30"),
            WatcherSpec::new("beta", "sleep 30"),
        ],
        tmp.path(),
        fast_options(),
    );
    assert!(wait_until(|| sup.list_running().len() == 2, Duration::from_secs(5)).await);

    sup.update_config(&[
        WatcherSpec::new("beta", "sleep 30"),
        WatcherSpec::new("gamma", "sleep 30"),
    ])
    .await;
    assert!(
        wait_until(
            || sup.list_running() == vec!["beta".to_string(), "gamma".to_string()],
            Duration::from_secs(5)
        )
        .await
    );
    sup.stop().await;
    assert!(sup.list_running().is_empty());
}

#[tokio::test]
async fn test_stop_force_kills_watchers_ignoring_sigterm() {
    let tmp = tempdir().unwrap();
    let spec = WatcherSpec::new("stubborn", "trap '' TERM; while true; do sleep 1; done");
    let sup = WatcherSupervisor::start_with_options(&[spec], tmp.path(), fast_options());
    assert!(wait_until(|| !sup.list_running().is_empty(), Duration::from_secs(5)).await);
    // Give the shell time to install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), sup.stop()).await;
    assert!(stopped.is_ok(), "stop did not complete");
    assert!(sup.list_running().is_empty());
}

#[tokio::test]
async fn test_watcher_receives_name_and_cwd() {
    let tmp = tempdir().unwrap();
    let work = tmp.path().join("work");
    fs::create_dir_all(&work).unwrap();
    let mut spec = WatcherSpec::new("inbox", "echo \"$WARDEN_WATCHER_NAME $GREETING\" > out.txt; sleep 30");
    spec.cwd = Some("work".into());
    spec.env.insert("GREETING".to_string(), "hello".to_string());

    let sup = WatcherSupervisor::start_with_options(&[spec], tmp.path(), fast_options());
    let out = work.join("out.txt");
    assert!(wait_until(|| fs::read_to_string(&out).is_ok_and(|s| s.contains("hello")), Duration::from_secs(5)).await);
    assert_eq!(fs::read_to_string(&out).unwrap().trim(), "inbox hello");
    let status = sup.statuses().remove(0);
    assert_eq!(status.phase, WatcherPhase::Running);
    assert!(status.pid.is_some());
    sup.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_dropping_last_handle_terminates_watchers() {
    let tmp = tempdir().unwrap();
    let pid_file = tmp.path().join("pid");
    let spec = WatcherSpec::new(
        "orphan",
        &format!("echo $$ > '{}'; exec sleep 30", pid_file.display()),
    );
    let sup = WatcherSupervisor::start_with_options(&[spec], tmp.path(), fast_options());
    assert!(
        wait_until(
            || fs::read_to_string(&pid_file).is_ok_and(|s| s.trim().parse::<i32>().is_ok()),
            Duration::from_secs(5)
        )
        .await
    );
    let pid: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();

    drop(sup);

    // SAFETY: signal 0 only checks whether the pid still exists.
    let alive = || unsafe { libc::kill(pid, 0) } == 0;
    assert!(wait_until(|| !alive(), Duration::from_secs(5)).await, "watcher {} outlived its supervisor", pid);
}
