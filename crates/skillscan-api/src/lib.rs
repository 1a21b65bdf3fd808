//! Client for the SecurityScan skill-scanning service.
//!
//! This crate owns the wire model shared by the rest of the workspace and a
//! thin HTTP transport over the service's documented endpoints:
//!
//! | Call | Endpoint | Auth |
//! |---|---|---|
//! | [`ScanApi::register`] | `POST /auth/register/agent` | none |
//! | [`ScanApi::scan`] | `POST /scan` | `X-API-Key` |
//! | [`ScanApi::report`] | `GET /report/{url}` | none |
//! | [`ScanApi::usage`] | `GET /usage` | `X-API-Key` |
//! | [`ScanApi::request_upgrade`] | `POST /billing/upgrade` | `X-API-Key` |
//! | [`ScanApi::billing_status`] | `GET /billing/status` | `X-API-Key` |
//!
//! # Example
//!
//! ```rust,no_run
//! use skillscan_api::{HttpScanClient, ScanApi, SkillIdentifier};
//!
//! # async fn example() -> skillscan_api::Result<()> {
//! let client = HttpScanClient::with_url("https://api.securityscan.dev")?;
//! let credential = client.register().await?;
//! let skill = SkillIdentifier::parse("https://github.com/acme/weather-skill")?;
//! let receipt = client.scan(&skill, &credential.api_key).await?;
//! println!("score = {}", receipt.verdict.score);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod types;

pub use client::{DEFAULT_BASE_URL, HttpScanClient, ScanApi};
pub use error::{ApiError, Result};
pub use types::{
    BillingStatus, CheckoutSession, Credential, Issue, IssuesSummary, Plan, PublicReport, Quota,
    Recommendation, ScanReceipt, Severity, SkillIdentifier, Usage, Verdict,
};
