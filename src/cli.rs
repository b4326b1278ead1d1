// src/cli.rs
// Thin command-line surface over the daemon, hooks, and catch-up store

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use devlog::config::GlobalConfig;
use devlog::daemon::Daemon;
use devlog::daemon::status::DaemonStatus;
use devlog::llm::OllamaClient;
use devlog::store::{CatchUpStore, SummaryStatus};

#[derive(Parser)]
#[command(name = "devlog", version, about = "Knowledge consolidation daemon for coding assistants")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the consolidation daemon in the foreground
    Daemon,
    /// Assistant hook entry points (JSON on stdin, never fail the host)
    Hook {
        #[command(subcommand)]
        action: HookAction,
    },
    /// Print the last daemon status snapshot
    Status,
    /// Print the precomputed catch-up summary for a project
    Catchup {
        /// Project path (defaults to the current directory)
        project: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone, Copy)]
pub enum HookAction {
    /// Ingest one assistant turn
    Turn,
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookAction::Turn => write!(f, "turn"),
        }
    }
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run_daemon() -> Result<()> {
    devlog::paths::ensure_global_dir()?;
    let config = GlobalConfig::load();
    let llm = Arc::new(OllamaClient::from_config(&config));
    let daemon = Daemon::new(llm);
    let (_tx, rx) = devlog::daemon::shutdown_channel()?;
    daemon.run(rx).await?;
    Ok(())
}

/// Print the daemon status snapshot.
pub fn run_status() -> Result<()> {
    let path = devlog::paths::daemon_status_file();
    let Some(status) = DaemonStatus::read(&path) else {
        println!("No daemon status recorded (is the daemon running?)");
        return Ok(());
    };

    println!(
        "daemon: {} (pid {})",
        if status.running { "running" } else { "stopped" },
        status.pid
    );
    println!("started: {}", status.started_at.to_rfc3339());
    println!("sessions processed: {}", status.sessions_processed);
    if let Some(ts) = status.last_consolidation {
        println!("last consolidation: {}", ts.to_rfc3339());
    }
    if let Some(ts) = status.last_staleness_check {
        println!("last staleness check: {}", ts.to_rfc3339());
    }
    println!("projects: {}", status.projects.len());
    for (path, stats) in &status.projects {
        println!(
            "  {} - {} events, {} consolidations",
            path.display(),
            stats.events_processed,
            stats.memories_extracted
        );
    }
    Ok(())
}

/// Print the precomputed catch-up summary, including the stale note when the
/// last regeneration failed.
pub fn run_catchup(project: Option<PathBuf>) -> Result<()> {
    let project = match project {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let store = CatchUpStore::new(&project);

    let Some(summary) = store.read_precomputed()? else {
        println!("No catch-up summary yet for {}", project.display());
        return Ok(());
    };

    println!("{}", summary.summary);
    println!();
    println!("generated: {}", summary.generated_at.to_rfc3339());
    if summary.status == SummaryStatus::Stale {
        println!(
            "note: summary is stale ({})",
            summary.last_error.as_deref().unwrap_or("regeneration pending")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_hook_turn_parses() {
        let cli = Cli::parse_from(["devlog", "hook", "turn"]);
        assert!(matches!(
            cli.command,
            Commands::Hook {
                action: HookAction::Turn
            }
        ));
    }

    #[test]
    fn test_catchup_takes_optional_project() {
        let cli = Cli::parse_from(["devlog", "catchup", "/work/acme"]);
        match cli.command {
            Commands::Catchup { project } => {
                assert_eq!(project, Some(PathBuf::from("/work/acme")));
            }
            _ => panic!("expected catchup"),
        }
    }
}
