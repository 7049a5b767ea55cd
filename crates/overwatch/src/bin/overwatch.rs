//! Overwatch CLI
//!
//! Runs the adaptive ops control plane against a stream of JSON lines on
//! stdin, and exposes the safety checker and effective config for operators.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use overwatch::exec::{CommandPolicy, PolicySafetyChecker, SafetyChecker};
use overwatch::telemetry::{self, LogFormat};
use overwatch::{
    AIEvent, AnalysisClient, AnalysisProvider, BasicAlert, CircuitBreaker, CircuitState,
    CliAnalysisProvider, HealthReport, Insight, KubectlExecutor, OverwatchConfig,
    RemediationEngine, Scheduler, SmartAlertManager, TaskPool,
};

/// Adaptive operations control plane
#[derive(Parser)]
#[command(name = "overwatch")]
#[command(about = "Adaptive operations control plane - gated AI analysis, smart alerts, safe remediation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "OVERWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log format
    #[arg(long, default_value = "text", global = true, env = "OVERWATCH_LOG_FORMAT")]
    log_format: LogFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and process JSON lines from stdin until EOF or Ctrl-C
    ///
    /// Each line is an object with a "kind" of "event", "alert" or "health".
    Run,
    /// Check a command against the safety policy
    Validate {
        /// Full command line, e.g. "kubectl rollout restart deployment/api"
        command: String,
    },
    /// Generate remediation actions for an issue and dry-run them
    Remediate {
        /// Issue description handed to the analysis provider
        issue: String,
    },
    /// Print the effective configuration as TOML
    Config,
}

/// One line of `run` input.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Input {
    Event(AIEvent),
    Alert(BasicAlert),
    Health(HealthReport),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.log_format)?;

    let config = OverwatchConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Validate { command } => validate(&config, &command),
        Commands::Remediate { issue } => remediate(config, &issue).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn analysis_client(config: &OverwatchConfig) -> Arc<dyn AnalysisProvider> {
    let breaker = CircuitBreaker::new("analysis", config.breaker.clone()).with_observer(Arc::new(
        |from: CircuitState, to: CircuitState| {
            warn!(%from, %to, "Analysis provider circuit changed state");
        },
    ));
    Arc::new(AnalysisClient::new(
        Arc::new(CliAnalysisProvider::new(config.provider.clone())),
        Arc::new(breaker),
        config.provider.timeout(),
    ))
}

fn safety_checker(config: &OverwatchConfig) -> PolicySafetyChecker {
    PolicySafetyChecker::new(
        CommandPolicy::from_config(&config.executor),
        config.remediation.min_high_risk_confidence,
    )
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to serialize output"),
    }
}

async fn run(config: OverwatchConfig) -> Result<()> {
    let provider = analysis_client(&config);
    let pool = TaskPool::new(&config.tasks);
    let scheduler = Scheduler::new(config.scheduler.clone(), Arc::clone(&provider), pool)?;
    let alerts = SmartAlertManager::new(Arc::clone(&provider), config.alerts.clone());

    scheduler
        .set_callbacks(
            Arc::new(|insight: Insight| print_json(&insight)),
            Arc::new(|insight: Insight| {
                eprintln!(
                    "{} {} analysis raised an alert ({} events)",
                    "ALERT".red().bold(),
                    insight.bucket,
                    insight.events.len()
                );
            }),
        )
        .await;
    scheduler.start().await;

    let cancel = CancellationToken::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Input>(&line) {
            Ok(Input::Event(event)) => {
                scheduler.trigger_event(event);
            }
            Ok(Input::Alert(alert)) => {
                let enriched = alerts.process_alert(&cancel, alert).await;
                print_json(&enriched);
            }
            Ok(Input::Health(report)) => {
                let queued = scheduler.ingest_health(&report);
                info!(queued, "Ingested health report");
            }
            Err(e) => warn!(error = %e, "Skipping malformed input line"),
        }
    }

    cancel.cancel();
    let drained = scheduler.shutdown(config.tasks.shutdown_grace()).await;
    if !drained {
        eprintln!("{}", "Some analyses were abandoned at shutdown".yellow());
    }
    Ok(())
}

fn validate(config: &OverwatchConfig, command: &str) -> Result<()> {
    match safety_checker(config).validate_command(command) {
        Ok(()) => {
            println!("{} {command}", "SAFE".green().bold());
            Ok(())
        }
        Err(reason) => {
            println!("{} {command}", "REJECTED".red().bold());
            println!("  {reason}");
            anyhow::bail!("command rejected by safety policy")
        }
    }
}

async fn remediate(config: OverwatchConfig, issue: &str) -> Result<()> {
    let pool = TaskPool::new(&config.tasks);
    let engine = RemediationEngine::new(
        analysis_client(&config),
        Arc::new(KubectlExecutor::new(&config.executor)),
        Arc::new(safety_checker(&config)),
        config.remediation.clone(),
        pool.clone(),
    );

    let cancel = CancellationToken::new();
    let actions = engine
        .generate_remediation(&cancel, issue, serde_json::Value::Null)
        .await?;
    if actions.is_empty() {
        println!("{}", "No safe remediation actions suggested".yellow());
    }

    for action in &actions {
        println!(
            "{} {} [{} risk, confidence {:.2}]{}",
            "ACTION".cyan().bold(),
            action.description,
            action.risk,
            action.confidence,
            if action.requires_approval {
                " (requires approval)".yellow().to_string()
            } else {
                String::new()
            }
        );
        let record = engine.execute_remediation(&cancel, action, true).await?;
        for line in record.result.lines() {
            println!("  {line}");
        }
        if let Some(rollback) = &record.rollback_cmd {
            println!("  {} {rollback}", "rollback:".dimmed());
        }
    }

    pool.shutdown(config.tasks.shutdown_grace()).await;
    Ok(())
}
