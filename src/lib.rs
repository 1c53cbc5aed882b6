//! Warden: a safety layer for a self-hosted agent gateway.
//!
//! Three cooperating pieces:
//!
//! - **Constitution validator** ([`core::constitution`], [`core::rules`]):
//!   checks a resolved system prompt against a catalog of safety rules before
//!   each run and renders an audit record.
//! - **Watcher supervisor** ([`plugins::supervisor`]): keeps configured
//!   background commands alive with exponential restart backoff and clean
//!   shutdown.
//! - **Config integrity guardian** ([`plugins::guardian`]): an independent
//!   process that detects constitutional, tool-policy, integrity and
//!   permission problems in the agent configuration, writes incident files,
//!   alerts an operator and can pause the gateway.
//!
//! # Examples
//!
//! ```bash
//! # Record the trusted configuration once
//! warden guard --init-baseline
//!
//! # One check pass (exit 0 = clean, 1 = incidents, 2 = setup error)
//! warden guard --alert-cmd /usr/local/bin/page-oncall --pause-gateway
//!
//! # Validate a prompt file
//! warden prompt check --file prompt.txt --audit-log audit.log
//!
//! # Supervise watchers in the foreground
//! warden watchers run
//! ```

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{
    Cli, Command, GuardCli, IncidentsCli, PauseCli, PauseCommand, PromptCommand, WatchersCommand,
};
use crate::core::constitution::{self, AuditContext, ConstitutionConfig};
use crate::core::error::{EXIT_FAIL, EXIT_PASS, WardenError};
use crate::core::{config, logging};
use crate::plugins::guardian::{self, Guardian, GuardianConfig};
use crate::plugins::{alert, incident, supervisor};

use clap::Parser;
use colored::Colorize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Parse arguments, dispatch, and return the process exit code.
pub fn run() -> Result<i32, WardenError> {
    let cli = Cli::parse();
    logging::init(cli.quiet, cli.log_json);

    match cli.command {
        Command::Guard(guard) => run_guard(guard),
        Command::Prompt(prompt) => match prompt.command {
            PromptCommand::Check {
                file,
                config,
                audit_log,
                context,
                format,
            } => run_prompt_check(
                &file,
                config.as_deref(),
                audit_log.as_deref(),
                &context,
                &format,
            ),
        },
        Command::Watchers(watchers) => match watchers.command {
            WatchersCommand::Run {
                config,
                working_dir,
            } => run_watchers(config.as_deref(), working_dir.as_deref()),
            WatchersCommand::List { config } => list_watchers(config.as_deref()),
        },
        Command::Pause(pause) => run_pause(pause),
        Command::Incidents(incidents) => run_incidents(incidents),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, WardenError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn run_guard(args: GuardCli) -> Result<i32, WardenError> {
    let config_path = config::resolve_agent_config_path(args.config.as_deref());
    let state_dir = config::resolve_state_dir(args.state_dir.as_deref());

    let mut settings = GuardianConfig::new(&config_path, &state_dir);
    settings.apply_settings_file()?;
    if let Some(workspace) = args.workspace {
        settings.workspace_dir = Some(workspace);
    }
    if let Some(cmd) = args.alert_cmd {
        settings.alert_cmd = Some(cmd);
    }
    if args.pause_gateway {
        settings.pause_on_critical = true;
    }
    if let Some(secs) = args.check_interval {
        settings.check_interval = Duration::from_secs(secs.max(1));
    }

    let guardian = Guardian::new(settings);
    guardian.config().verify_startup()?;

    if args.init_baseline {
        let written = guardian.init_baseline()?;
        println!(
            "baseline written to {} ({} entries)",
            guardian.config().baseline_path().display(),
            written.len()
        );
        return Ok(EXIT_PASS);
    }

    if args.watch {
        runtime()?.block_on(guardian::watch(Arc::new(guardian)))?;
        return Ok(EXIT_PASS);
    }

    let report = guardian.run_once()?;
    for recorded in report.incidents() {
        println!(
            "{} [{}] {} -> {}",
            "INCIDENT".red().bold(),
            recorded.incident.severity,
            recorded.incident.check,
            recorded.path.display()
        );
    }
    if report.passed() {
        println!("{}", report.summary().green());
    } else {
        println!("{}", report.summary().red());
    }
    Ok(report.exit_code())
}

fn run_prompt_check(
    file: &Path,
    config_path: Option<&Path>,
    audit_log: Option<&Path>,
    context: &str,
    format: &str,
) -> Result<i32, WardenError> {
    let prompt = fs::read_to_string(file)
        .map_err(|e| WardenError::Config(format!("cannot read {}: {}", file.display(), e)))?;
    let settings: Option<ConstitutionConfig> = match config_path {
        Some(path) => Some(config::constitution_config(&config::load_document(path)?)?),
        None => None,
    };

    let result = constitution::validate(&prompt, settings.as_ref());
    if result.disabled {
        tracing::warn!(context, "constitution disabled; prompt not validated");
    }
    let audit = AuditContext {
        label: context.to_string(),
        run_id: Some(ulid::Ulid::new().to_string()),
    };
    let record = constitution::format_audit_log(&result, &audit);

    if let Some(path) = audit_log {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{}", record)?;
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            let mut lines = record.lines();
            if let Some(summary) = lines.next() {
                if result.pass {
                    println!("{}", summary.green());
                } else {
                    println!("{}", summary.red().bold());
                }
            }
            for line in lines {
                println!("{}", line.yellow());
            }
        }
    }

    Ok(if result.pass { EXIT_PASS } else { EXIT_FAIL })
}

fn run_watchers(config_path: Option<&Path>, working_dir: Option<&Path>) -> Result<i32, WardenError> {
    let path = config::resolve_agent_config_path(config_path);
    let specs = config::watcher_specs(&config::load_document(&path)?)?;
    let working_dir = match working_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    runtime()?.block_on(supervisor::run_until_signal(&specs, &working_dir))?;
    Ok(EXIT_PASS)
}

fn list_watchers(config_path: Option<&Path>) -> Result<i32, WardenError> {
    let path = config::resolve_agent_config_path(config_path);
    let specs = config::watcher_specs(&config::load_document(&path)?)?;
    if specs.is_empty() {
        println!("no watchers configured in {}", path.display());
        return Ok(EXIT_PASS);
    }
    for spec in &specs {
        let state = if spec.is_startable() {
            "enabled".green()
        } else {
            "skipped".dimmed()
        };
        println!("{:<24} {:<8} {}", spec.name, state, spec.command);
    }
    Ok(EXIT_PASS)
}

fn run_pause(args: PauseCli) -> Result<i32, WardenError> {
    let state_dir = config::resolve_state_dir(args.state_dir.as_deref());
    let lock_path = GuardianConfig::new(Path::new(""), &state_dir).lock_path();
    match args.command {
        PauseCommand::Status => match alert::read_lock(&lock_path)? {
            Some(lock) if lock.locked => {
                println!(
                    "{} since {}: {}",
                    "PAUSED".red().bold(),
                    lock.timestamp,
                    lock.reason
                );
                if let Some(incident) = &lock.incident_path {
                    println!("  incident: {}", incident);
                }
                for attempt in &lock.attempted {
                    println!("  tried {}", attempt);
                }
                Ok(EXIT_FAIL)
            }
            _ => {
                println!("{}", "not paused".green());
                Ok(EXIT_PASS)
            }
        },
        PauseCommand::Clear => {
            if alert::clear_lock(&lock_path)? {
                println!("removed {}", lock_path.display());
            } else {
                println!("no pause lock at {}", lock_path.display());
            }
            Ok(EXIT_PASS)
        }
    }
}

fn run_incidents(args: IncidentsCli) -> Result<i32, WardenError> {
    let state_dir = config::resolve_state_dir(args.state_dir.as_deref());
    let dir = GuardianConfig::new(Path::new(""), &state_dir).incidents_dir();
    let found = incident::list_incidents(&dir)?;
    if found.is_empty() {
        println!("no incidents in {}", dir.display());
        return Ok(EXIT_PASS);
    }
    for (path, record) in found.iter().take(args.limit) {
        let severity = match record.severity {
            incident::Severity::Critical => record.severity.as_str().red().bold(),
            incident::Severity::High => record.severity.as_str().red(),
            incident::Severity::Medium => record.severity.as_str().yellow(),
            incident::Severity::Low => record.severity.as_str().normal(),
        };
        println!(
            "{} {:<8} {:<16} {}",
            record.timestamp,
            severity,
            record.check,
            path.display()
        );
    }
    Ok(EXIT_PASS)
}
