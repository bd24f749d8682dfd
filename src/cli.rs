//! Command-line interface: a thin `clap` surface over the library.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::client::ProductionGmailClient;
use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::exclusions::ExclusionManager;
use crate::label_manager::LabelManager;
use crate::models::Rule;
use crate::pipeline::{Executor, RunOptions, RunSummary};
use crate::rate_limiter::RateLimiter;
use crate::rule_store::RuleStore;

#[derive(Parser, Debug)]
#[command(name = "gmail-rule-pipeline")]
#[command(version = "0.1.0")]
#[command(about = "Declarative Gmail rule engine", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-rule-pipeline/token.json")]
    pub token_cache: PathBuf,

    /// Path to the exclusion list file
    #[arg(long, default_value = ".gmail-rule-pipeline/exclusions.json")]
    pub exclusions_file: PathBuf,

    /// Path to the run checkpoint file
    #[arg(long, default_value = ".gmail-rule-pipeline/checkpoint.json")]
    pub checkpoint_file: PathBuf,

    /// Path to the rollback log file
    #[arg(long, default_value = ".gmail-rule-pipeline/rollback.json")]
    pub rollback_file: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if a token exists
        #[arg(long)]
        force: bool,
    },

    /// Run enabled rules against the mailbox
    Run {
        /// Dry run mode: compute the run summary but make no changes
        #[arg(long)]
        dry_run: bool,

        /// Only run these rules (by id or name); default is all enabled rules
        #[arg(long)]
        rule: Vec<String>,

        /// Extra Gmail search query ANDed onto every rule's server query
        #[arg(long)]
        query: Option<String>,
    },

    /// List, inspect, or remove stored rules
    Rules {
        #[command(subcommand)]
        action: RuleCommand,
    },

    /// Generate an example configuration file
    InitConfig {
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum RuleCommand {
    /// List all stored rules
    List,
    /// Add a rule from a JSON file
    Add {
        /// Path to a JSON file containing one rule object
        file: PathBuf,
    },
    /// Delete a rule by id or name
    Delete { id_or_name: String },
}

/// Thin wrapper over `indicatif` for spinner/progress-bar output, kept
/// exactly in the teacher's style.
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap()
            .progress_chars("##-");

        Self {
            multi: MultiProgress::new(),
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  \u{2713} {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

async fn build_client(cli: &Cli, config: &Config) -> Result<Arc<ProductionGmailClient>> {
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    let rate_limiter = RateLimiter::new(config.rate_limit.to_policy());
    let circuit_breaker = CircuitBreaker::new(config.circuit_breaker.clone());
    Ok(Arc::new(ProductionGmailClient::new(hub, rate_limiter, circuit_breaker)))
}

/// Execute the `run` subcommand end to end: load config, authenticate,
/// build the executor, and run it to completion (or until ctrl-c).
pub async fn run_pipeline(
    cli: &Cli,
    dry_run: bool,
    rule_ids: Vec<String>,
    query: Option<String>,
) -> Result<RunSummary> {
    let reporter = ProgressReporter::new();

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let mut config = Config::load(&cli.config).await?;
    if dry_run {
        config.executor.dry_run = true;
    }
    reporter.finish_spinner(&config_spinner, &format!("Configuration loaded from {:?}", cli.config));

    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let client = build_client(cli, &config).await?;
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

    let label_manager = Arc::new(LabelManager::new(client.clone()));
    let rule_store = Arc::new(RuleStore::new(&config.store.path));

    let executor = Executor::new(
        client,
        label_manager,
        rule_store,
        cli.exclusions_file.clone(),
        cli.checkpoint_file.clone(),
        cli.rollback_file.clone(),
        config.executor.clone(),
    );

    let run_id = format!("run_{}", uuid::Uuid::new_v4().simple());
    let cancel = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.store(true, std::sync::atomic::Ordering::SeqCst);
            tracing::warn!("cancellation requested, finishing current candidate...");
        }
    });

    let run_spinner = reporter.add_spinner("Running rules against the mailbox...");
    let options = RunOptions {
        rule_ids: if rule_ids.is_empty() { None } else { Some(rule_ids) },
        user_query: query,
    };
    let summary = executor.run(&run_id, options, cancel).await?;
    reporter.finish_spinner(
        &run_spinner,
        &format!(
            "Scanned {} emails, {} matched a rule",
            summary.total_emails_scanned, summary.emails_matching_any_rule
        ),
    );

    Ok(summary)
}

pub async fn run_rules_command(config_path: &std::path::Path, action: RuleCommand) -> Result<()> {
    let config = Config::load(config_path).await?;
    let store = RuleStore::new(&config.store.path);

    match action {
        RuleCommand::List => {
            let rules = store.load().await?;
            if rules.is_empty() {
                println!("No rules stored.");
            }
            for rule in &rules {
                println!(
                    "{}  {}  [{}]  {} condition(s), {} action(s)",
                    rule.id,
                    rule.name,
                    if rule.enabled { "enabled" } else { "disabled" },
                    rule.conditions.len(),
                    rule.actions.len()
                );
            }
        }
        RuleCommand::Add { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| GmailError::StoreIo(format!("reading {}: {e}", file.display())))?;
            let rule: Rule = serde_json::from_str(&raw)?;
            let added = store.add(rule).await?;
            println!("Added rule '{}' ({})", added.name, added.id);
        }
        RuleCommand::Delete { id_or_name } => {
            store.delete(&id_or_name).await?;
            println!("Deleted rule '{}'", id_or_name);
        }
    }
    Ok(())
}

pub fn print_summary(summary: &RunSummary) {
    println!("\n========================================");
    println!("Run Summary{}", if summary.dry_run { " (dry run)" } else { "" });
    println!("========================================");
    println!("Emails scanned: {}", summary.total_emails_scanned);
    println!("Emails matching a rule: {}", summary.emails_matching_any_rule);
    for (rule, count) in &summary.rules_applied_counts {
        println!("  {} matched {} email(s)", rule, count);
    }
    println!("Actions planned or taken:");
    for (key, outcome) in &summary.actions_planned_or_taken {
        println!("  {}: {}", key, outcome.count);
    }
    if !summary.errors.is_empty() {
        println!("Errors: {}", summary.errors.len());
        for err in &summary.errors {
            println!("  - {}", err.message);
        }
    }
    println!("========================================");
}

/// Load (and lazily create) the exclusion manager at the configured path.
pub async fn load_exclusions(path: &std::path::Path) -> Result<ExclusionManager> {
    ExclusionManager::load(path).await
}
