//! CLI entry point for SkillScan.
//!
//! This binary provides the `skillscan` command with subcommands for
//! checking skills before install and managing the SecurityScan account
//! and local verdict cache.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use skillscan_api::Plan;
use skillscan_guard::{BillingSession, GuardConfig, Orchestrator};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{CacheAction, Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "info" });

    let config = GuardConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Check { skills } => cmd_check(&config, &skills).await,
        Commands::Register => cmd_register(&config).await.map(|()| ExitCode::SUCCESS),
        Commands::Usage => cmd_usage(&config).await.map(|()| ExitCode::SUCCESS),
        Commands::Report { skill } => cmd_report(&config, &skill).await.map(|()| ExitCode::SUCCESS),
        Commands::Upgrade { plan } => cmd_upgrade(&config, plan).await.map(|()| ExitCode::SUCCESS),
        Commands::Cache { action } => cmd_cache(&config, action).await.map(|()| ExitCode::SUCCESS),
    }
}

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr; stdout carries only command output.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn open_guard(config: &GuardConfig) -> Result<Orchestrator> {
    Orchestrator::open(config)
        .await
        .context("failed to open skill guard")
}

/// A token cancelled on the first Ctrl+C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling in-flight requests");
            token.cancel();
        }
    });
    cancel
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

async fn cmd_check(config: &GuardConfig, skills: &[String]) -> Result<ExitCode> {
    let guard = open_guard(config).await?.with_checkout_hook(print_checkout());
    let cancel = cancel_on_interrupt();

    let outcomes = guard.check_all(skills, &cancel).await;

    let mut blocked = 0usize;
    for outcome in &outcomes {
        println!("{}: {}", outcome.source, outcome.decision.log_line);
        if !outcome.permits_install() {
            blocked += 1;
        }
    }

    if blocked > 0 {
        eprintln!("{blocked} of {} skill(s) blocked", outcomes.len());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

// ---------------------------------------------------------------------------
// Subcommands: register, usage, report
// ---------------------------------------------------------------------------

async fn cmd_register(config: &GuardConfig) -> Result<()> {
    let guard = open_guard(config).await?;
    let credential = guard
        .ensure_credential()
        .await
        .context("failed to register agent")?;

    println!("API key:         {}", credential.masked_key());
    println!("Plan:            {}", credential.plan);
    println!("Scans remaining: {}", credential.scans_remaining);
    Ok(())
}

async fn cmd_usage(config: &GuardConfig) -> Result<()> {
    let guard = open_guard(config).await?;
    let usage = guard
        .refresh_usage()
        .await
        .context("failed to fetch usage")?;

    println!("Plan:            {}", usage.plan);
    if let Some(used) = usage.scans_used {
        println!("Scans used:      {used}");
    }
    println!("Scans remaining: {}", usage.scans_remaining);
    if let Some(limit) = usage.scans_limit {
        println!("Scan limit:      {limit}");
    }
    Ok(())
}

async fn cmd_report(config: &GuardConfig, skill: &str) -> Result<()> {
    let guard = open_guard(config).await?;
    let report = guard
        .report(skill)
        .await
        .with_context(|| format!("failed to fetch report for {skill}"))?;

    println!("Skill:          {}", report.skill_url);
    println!("Score:          {}/100 ({})", report.score, report.recommendation);
    match (&report.certified_at, &report.cert_hash) {
        (Some(at), Some(hash)) if report.certified => {
            println!("Certified:      yes, {at} ({hash})")
        }
        _ if report.certified => println!("Certified:      yes"),
        _ => println!("Certified:      no"),
    }
    let summary = &report.issues_summary;
    println!(
        "Issues:         {} critical, {} high, {} medium, {} low",
        summary.critical, summary.high, summary.medium, summary.low
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: upgrade
// ---------------------------------------------------------------------------

async fn cmd_upgrade(config: &GuardConfig, plan: Option<Plan>) -> Result<()> {
    if plan.is_some_and(|plan| !plan.is_paid()) {
        anyhow::bail!("only paid plans can be purchased");
    }

    let guard = open_guard(config).await?.with_checkout_hook(print_checkout());
    let cancel = cancel_on_interrupt();

    let status = guard
        .upgrade(plan, &cancel)
        .await
        .context("upgrade did not complete")?;

    println!("Upgrade confirmed.");
    println!("Plan:            {}", status.plan);
    if let Some(remaining) = status.scans_remaining {
        println!("Scans remaining: {remaining}");
    }
    Ok(())
}

fn print_checkout() -> skillscan_guard::CheckoutHook {
    Arc::new(|session: &BillingSession| {
        eprintln!(
            "Complete payment for {} at:\n  {}",
            session.target_plan, session.checkout_url
        );
    })
}

// ---------------------------------------------------------------------------
// Subcommand: cache
// ---------------------------------------------------------------------------

async fn cmd_cache(config: &GuardConfig, action: CacheAction) -> Result<()> {
    let guard = open_guard(config).await?;
    let cache = guard.cache();

    match action {
        CacheAction::Stats => {
            let summary = cache.summary().await.context("failed to read cache")?;
            println!("Entries:   {}", summary.entries);
            println!("Expired:   {}", summary.expired);
            println!("TTL:       {}s", cache.ttl().num_seconds());
            println!("Database:  {}", config.db_path().display());
        }
        CacheAction::Purge => {
            let removed = cache
                .purge_expired()
                .await
                .context("failed to purge cache")?;
            println!("Removed {removed} expired entr{}.", plural_y(removed));
        }
        CacheAction::Clear => {
            let removed = cache.clear().await.context("failed to clear cache")?;
            println!("Removed {removed} entr{}.", plural_y(removed));
        }
    }
    Ok(())
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 { "y" } else { "ies" }
}
