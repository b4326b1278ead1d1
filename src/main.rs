// src/main.rs
// devlog - knowledge consolidation daemon for coding assistants

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands, HookAction};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from the global dir only (never from CWD - a malicious repo
    // could override the model endpoint)
    if let Err(e) = dotenvy::from_path(devlog::paths::global_dir().join(".env")) {
        tracing::debug!("Failed to load global .env file: {}", e);
    }

    let cli = Cli::parse();

    // Set up logging based on command
    match &cli.command {
        Commands::Hook { .. } => {
            // Hooks: configurable via DEVLOG_HOOK_LOG_LEVEL (default: warn)
            // No timestamps or module targets since hooks are ephemeral processes
            let hook_level =
                std::env::var("DEVLOG_HOOK_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
            let level = match hook_level.to_lowercase().as_str() {
                "off" => None,
                "error" => Some(Level::ERROR),
                "warn" => Some(Level::WARN),
                "info" => Some(Level::INFO),
                "debug" | "trace" => Some(Level::DEBUG),
                other => {
                    eprintln!("[devlog] Unknown DEVLOG_HOOK_LOG_LEVEL={other:?}, using warn");
                    Some(Level::WARN)
                }
            };
            if let Some(level) = level {
                let subscriber = FmtSubscriber::builder()
                    .with_max_level(level)
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .without_time()
                    .with_target(false)
                    .finish();
                let _ = tracing::subscriber::set_global_default(subscriber);
            }
        }
        command => {
            let log_level = match command {
                Commands::Daemon => Level::INFO,
                _ => Level::WARN,
            };
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }

    match cli.command {
        Commands::Daemon => {
            cli::run_daemon().await?;
        }
        Commands::Hook { action } => {
            // Hooks must NEVER exit non-zero: the host assistant treats any
            // non-zero exit as a hook error. Catch errors AND panics, log to
            // stderr, and emit `{}` on stdout so the hook is silently
            // ignored rather than flagged as broken.
            use std::io::Write;
            let hook_name = action.to_string();
            let result = tokio::task::spawn_blocking(move || match action {
                HookAction::Turn => devlog::hooks::turn::run(),
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    eprintln!("[devlog] {hook_name} hook error (non-fatal): {e:#}");
                    let _ = writeln!(std::io::stdout(), "{{}}");
                }
                Err(join_err) => {
                    eprintln!("[devlog] {hook_name} hook panic (non-fatal): {join_err}");
                    let _ = writeln!(std::io::stdout(), "{{}}");
                }
            }
        }
        Commands::Status => {
            cli::run_status()?;
        }
        Commands::Catchup { project } => {
            cli::run_catchup(project)?;
        }
    }

    Ok(())
}
