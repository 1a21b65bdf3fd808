//! Install guard for agent skills.
//!
//! Before a host agent installs an externally sourced skill it asks the
//! [`Orchestrator`] for a decision. The orchestrator obtains a verdict from
//! the local cache or the SecurityScan service, recovers from an exhausted
//! plan through the [`billing`] flow when it can, and hands the verdict to
//! [`decide`], the only component allowed to authorize an install.
//!
//! Anything that goes wrong along the way fails closed: the outcome is
//! ABORT and the error's [`ErrorKind`] is logged with the decision line.
//!
//! ```rust,no_run
//! use skillscan_guard::{GuardConfig, Orchestrator, config::DEFAULT_CONFIG_PATH};
//!
//! # async fn example() -> skillscan_guard::Result<()> {
//! let config = GuardConfig::load(DEFAULT_CONFIG_PATH)?;
//! let guard = Orchestrator::open(&config).await?;
//! let outcome = guard.check("https://github.com/acme/weather-skill").await;
//! if outcome.permits_install() {
//!     // hand the skill to the installer
//! }
//! # Ok(())
//! # }
//! ```

pub mod billing;
pub mod config;
pub mod decision;
pub mod error;
pub mod orchestrator;

pub use billing::{
    BillingMachine, BillingOutcome, BillingPolicy, BillingSession, BillingState, CheckoutHook,
};
pub use config::GuardConfig;
pub use decision::{Action, Decision, RecommendationMismatch, decide};
pub use error::{ErrorKind, GuardError, Result};
pub use orchestrator::{InstallOutcome, Orchestrator};
