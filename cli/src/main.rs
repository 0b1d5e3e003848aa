//! EduFoyer CLI - a terminal solver session.
//!
//! # Architecture
//!
//! ```text
//! main() -> Settings -> HttpDoubtApi + push listener -> Reconciler
//!                                                          |
//!                              stdout <- Subscription <----+----> ReconcilerHandle <- stdin commands
//! ```
//!
//! Availability changes are printed as they happen. Commands are read one per
//! line from stdin:
//!
//! - `list` - show the currently available doubts
//! - `accept <id>` - claim a doubt
//! - `refresh` - poll now
//! - `status` - show transport health
//! - `quit` - end the session (also on EOF or Ctrl-C)
//!
//! Logs go to `~/.edufoyer/logs/edufoyer.log`, never to the terminal.

use anyhow::{Context, Result, bail};
use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use edufoyer_client::{BackendEndpoint, HttpDoubtApi, PushOptions, http_client, spawn_push_listener};
use edufoyer_config::EduFoyerConfig;
use edufoyer_reconciler::{
    AvailabilityEvent, AvailableDoubt, Reconciler, ReconcilerError, ReconcilerHandle,
    ReconcilerOptions, TransportHealth,
};
use edufoyer_types::{AuthToken, DoubtId, SolverRegistration};

const PUSH_CHANNEL_CAPACITY: usize = 64;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than interleave logs with session output.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.edufoyer/logs/edufoyer.log
    if let Some(config_path) = EduFoyerConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("edufoyer.log"));
    }

    // Fallback: ./.edufoyer/logs/edufoyer.log
    candidates.push(PathBuf::from(".edufoyer").join("logs").join("edufoyer.log"));

    candidates
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionCommand {
    List,
    Accept(DoubtId),
    Refresh,
    Status,
    Quit,
    Help,
}

impl SessionCommand {
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "list" | "ls" => Self::List,
            "accept" => {
                let raw = words.next().ok_or("usage: accept <doubt-id>")?;
                let id = DoubtId::new(raw).map_err(|e| e.to_string())?;
                Self::Accept(id)
            }
            "refresh" => Self::Refresh,
            "status" => Self::Status,
            "quit" | "exit" => Self::Quit,
            "help" | "?" => Self::Help,
            other => return Err(format!("unknown command {other:?} (try `help`)")),
        };

        if words.next().is_some() {
            return Err(format!("too many arguments for `{verb}`"));
        }
        Ok(Some(command))
    }
}

fn format_doubt(doubt: &AvailableDoubt) -> String {
    let mut line = format!(
        "{} [{}] {}",
        doubt.id,
        doubt.subject,
        doubt.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(schedule) = &doubt.schedule {
        line.push_str(&format!(" (scheduled {} {})", schedule.date, schedule.time));
    }
    let description = doubt.description.trim();
    if !description.is_empty() {
        line.push_str(" - ");
        line.push_str(description);
    }
    line
}

fn format_event(event: &AvailabilityEvent) -> String {
    match event {
        AvailabilityEvent::Available(doubt) => format!("+ {}", format_doubt(doubt)),
        AvailabilityEvent::Withdrawn { id, reason } => format!("- {id} ({})", reason.as_str()),
    }
}

fn format_health(health: &TransportHealth) -> String {
    let last_poll = health.last_poll_ok.map_or_else(
        || "never".to_string(),
        |at| at.format("%H:%M:%S UTC").to_string(),
    );
    format!(
        "push: {} | last good poll: {last_poll} | consecutive poll failures: {}{}",
        if health.push_connected { "connected" } else { "disconnected" },
        health.consecutive_poll_failures,
        if health.auth_failed {
            " | credentials rejected"
        } else {
            ""
        }
    )
}

const HELP: &str = "commands: list | accept <id> | refresh | status | quit";

/// Returns `false` when the session should end.
async fn run_command(handle: &ReconcilerHandle, command: SessionCommand) -> Result<bool> {
    match command {
        SessionCommand::List => {
            let doubts = handle.snapshot().await?;
            if doubts.is_empty() {
                println!("no doubts available");
            }
            for doubt in &doubts {
                println!("  {}", format_doubt(doubt));
            }
        }
        SessionCommand::Accept(id) => match handle.accept_doubt(id).await {
            Ok(result) => println!("{}", result.user_message()),
            Err(ReconcilerError::Unauthorized) => {
                bail!("the backend rejected the session token; sign in again and restart");
            }
            Err(e) => println!("cannot accept: {e}"),
        },
        SessionCommand::Refresh => {
            handle.refresh()?;
            println!("refreshing");
        }
        SessionCommand::Status => println!("{}", format_health(&handle.health().borrow())),
        SessionCommand::Help => println!("{HELP}"),
        SessionCommand::Quit => return Ok(false),
    }
    Ok(true)
}

async fn run_session(handle: &ReconcilerHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                println!();
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match SessionCommand::parse(&line) {
            Ok(Some(command)) => {
                if !run_command(handle, command).await? {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(message) => println!("{message}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = EduFoyerConfig::load()
        .context("loading ~/.edufoyer/config.toml")?
        .unwrap_or_default();
    let settings = config.resolve()?;
    tracing::info!(?settings, "Settings resolved");

    let endpoint = BackendEndpoint::new(&settings.base_url, AuthToken::new(settings.token.clone()))?;
    let client = http_client().clone();
    let api = Arc::new(
        HttpDoubtApi::new(client.clone(), endpoint.clone())
            .with_request_timeout(settings.request_timeout),
    );

    let push = if settings.push_enabled {
        let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        let registration = SolverRegistration {
            user_id: settings.user_id.clone(),
            subjects: settings.subjects.clone(),
        };
        let options = PushOptions {
            idle_timeout: settings.push_idle_timeout,
            ..PushOptions::default()
        };
        spawn_push_listener(client, endpoint, registration, options, tx);
        Some(rx)
    } else {
        None
    };

    let handle = Reconciler::spawn(
        api,
        push,
        ReconcilerOptions {
            poll_interval: settings.poll_interval,
            subjects: settings.subjects.clone(),
            refresh_bus: None,
        },
    );

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", format_event(&event));
        }
    });

    println!(
        "EduFoyer solver {} watching {}",
        settings.user_id,
        if settings.subjects.is_empty() {
            "all subjects".to_string()
        } else {
            settings.subjects.join(", ")
        }
    );
    let outcome = run_session(&handle).await;

    handle.dispose().await;
    let _ = printer.await;
    outcome
}
