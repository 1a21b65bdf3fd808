//! CLI argument definitions for SkillScan.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use skillscan_api::Plan;
use skillscan_guard::config::DEFAULT_CONFIG_PATH;

/// SkillScan -- security gate for agent skill installs.
#[derive(Parser)]
#[command(
    name = "skillscan",
    version,
    about = "SkillScan -- security gate for agent skill installs",
    long_about = "Scans externally sourced skills with the SecurityScan service and decides \
                  whether they may be installed. Registration, quota recovery and result \
                  caching happen automatically."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decide whether one or more skills may be installed.
    ///
    /// Exits non-zero if any skill is blocked.
    Check {
        /// Skill repository URLs.
        #[arg(required = true)]
        skills: Vec<String>,
    },

    /// Register an agent account if none is stored and show it.
    Register,

    /// Show the current plan and remaining scans.
    Usage,

    /// Show the free public report for a skill.
    Report {
        /// Skill repository URL.
        skill: String,
    },

    /// Open a checkout session and wait for payment.
    Upgrade {
        /// Plan to purchase (PAY_PER_SCAN or PRO). Defaults to the configured
        /// upgrade plan.
        #[arg(long, short)]
        plan: Option<Plan>,
    },

    /// Inspect or maintain the local verdict cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Actions for the local verdict cache.
#[derive(Subcommand)]
pub enum CacheAction {
    /// Show entry counts and the freshness window.
    Stats,
    /// Delete entries older than the freshness window.
    Purge,
    /// Delete every cached verdict.
    Clear,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn check_accepts_several_skills() {
        let cli = Cli::parse_from([
            "skillscan",
            "check",
            "github.com/acme/one",
            "https://github.com/acme/two",
        ]);
        match cli.command {
            Commands::Check { skills } => assert_eq!(skills.len(), 2),
            _ => panic!("expected check"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.verbose);
    }

    #[test]
    fn check_requires_a_skill() {
        assert!(Cli::try_parse_from(["skillscan", "check"]).is_err());
    }

    #[test]
    fn upgrade_parses_plan() {
        let cli = Cli::parse_from(["skillscan", "upgrade", "--plan", "pro"]);
        match cli.command {
            Commands::Upgrade { plan } => assert_eq!(plan, Some(Plan::Pro)),
            _ => panic!("expected upgrade"),
        }
        assert!(Cli::try_parse_from(["skillscan", "upgrade", "--plan", "gold"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "skillscan",
            "cache",
            "stats",
            "--verbose",
            "--config",
            "x.toml",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Stats
            }
        ));
    }
}
