//! Wire and domain types shared by every SkillScan crate.
//!
//! The shapes here follow the SecurityScan HTTP contract. Field names and
//! enum spellings (`FREE`, `PAY_PER_SCAN`, `CRITICAL`, ...) are exactly what
//! the service sends, so these types double as request/response bodies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{ApiError, Result};

// ---------------------------------------------------------------------------
// Plan and quota
// ---------------------------------------------------------------------------

/// Billing plan attached to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    /// Free tier with a small monthly scan allowance.
    Free,
    /// Prepaid credits, billed per scan.
    PayPerScan,
    /// Subscription with unlimited scans.
    Pro,
}

impl Plan {
    /// The spelling used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::PayPerScan => "PAY_PER_SCAN",
            Self::Pro => "PRO",
        }
    }

    /// Whether this plan is a paid upgrade over the free tier.
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FREE" => Ok(Self::Free),
            "PAY_PER_SCAN" => Ok(Self::PayPerScan),
            "PRO" => Ok(Self::Pro),
            other => Err(format!(
                "unknown plan `{other}` (expected FREE, PAY_PER_SCAN or PRO)"
            )),
        }
    }
}

/// Remaining scan allowance. The service encodes [`Quota::Unbounded`] as
/// `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum Quota {
    /// A finite number of scans left.
    Limited(u32),
    /// No limit under the current plan.
    Unbounded,
}

impl Quota {
    /// Whether at least one scan can still be issued.
    pub fn has_scans(&self) -> bool {
        match self {
            Self::Limited(n) => *n > 0,
            Self::Unbounded => true,
        }
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::Unbounded
    }
}

impl From<Option<u32>> for Quota {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Self::Unbounded, Self::Limited)
    }
}

impl From<Quota> for Option<u32> {
    fn from(value: Quota) -> Self {
        match value {
            Quota::Limited(n) => Some(n),
            Quota::Unbounded => None,
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{n}"),
            Self::Unbounded => f.write_str("unlimited"),
        }
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// The agent's API key together with the plan metadata last reported for it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque secret sent in the `X-API-Key` header.
    pub api_key: String,
    /// Current billing plan.
    pub plan: Plan,
    /// Scans left under `plan`.
    pub scans_remaining: Quota,
}

impl Credential {
    /// Build a credential from its parts.
    pub fn new(api_key: impl Into<String>, plan: Plan, scans_remaining: Quota) -> Self {
        Self {
            api_key: api_key.into(),
            plan,
            scans_remaining,
        }
    }

    /// The key with everything but a short prefix masked, safe to print.
    pub fn masked_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(8).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .field("plan", &self.plan)
            .field("scans_remaining", &self.scans_remaining)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Skill identifier
// ---------------------------------------------------------------------------

/// A normalized skill source locator.
///
/// `key` is the canonical form used for caching: scheme folded to `https`,
/// everything lower-cased, trailing slashes, fragments and a `.git` suffix
/// removed. `source` keeps the caller's spelling and is what gets sent to the
/// scanner, since the fetcher behind it may be case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillIdentifier {
    key: String,
    source: String,
}

impl SkillIdentifier {
    /// Parse and normalize a skill URL. Bare `host/path` input is treated as
    /// `https://host/path`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ApiError::InvalidSkillUrl {
                url: input.to_owned(),
                reason: "empty locator".to_owned(),
            });
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_owned()
        } else {
            format!("https://{trimmed}")
        };

        let mut url = Url::parse(&with_scheme).map_err(|e| ApiError::InvalidSkillUrl {
            url: input.to_owned(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::InvalidSkillUrl {
                url: input.to_owned(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        let host = url
            .host_str()
            .ok_or_else(|| ApiError::InvalidSkillUrl {
                url: input.to_owned(),
                reason: "missing host".to_owned(),
            })?
            .to_ascii_lowercase();

        url.set_fragment(None);

        let mut path = url.path().trim_end_matches('/').to_lowercase();
        if let Some(stripped) = path.strip_suffix(".git") {
            path = stripped.to_owned();
        }
        let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
        let query = url
            .query()
            .filter(|q| !q.is_empty())
            .map(|q| format!("?{}", q.to_lowercase()))
            .unwrap_or_default();

        let key = format!("https://{host}{port}{path}{query}");
        let source = url.as_str().trim_end_matches('/').to_owned();

        Ok(Self { key, source })
    }

    /// Canonical cache key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The URL as the caller wrote it (minus fragment and trailing slash).
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for SkillIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl FromStr for SkillIdentifier {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Ordinal threat level of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// HIGH and CRITICAL findings block installation in the caution band.
    pub fn is_blocking(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        })
    }
}

/// Qualitative recommendation attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Safe,
    Caution,
    Dangerous,
}

impl Recommendation {
    /// The band a score falls into, or `None` if the score is out of range.
    pub fn for_score(score: i32) -> Option<Self> {
        match score {
            80..=100 => Some(Self::Safe),
            40..=79 => Some(Self::Caution),
            0..=39 => Some(Self::Dangerous),
            _ => None,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Safe => "SAFE",
            Self::Caution => "CAUTION",
            Self::Dangerous => "DANGEROUS",
        })
    }
}

/// A single finding reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawIssue")]
pub struct Issue {
    pub severity: Severity,
    pub category: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// The scanner emits `type` and `line`; cached entries carry `category` and
/// `location`. Both shapes land here.
#[derive(Deserialize)]
struct RawIssue {
    severity: Severity,
    #[serde(alias = "type", default)]
    category: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    snippet: Option<String>,
}

impl From<RawIssue> for Issue {
    fn from(raw: RawIssue) -> Self {
        let location = raw
            .location
            .or_else(|| raw.line.filter(|l| *l > 0).map(|l| format!("line {l}")));
        Self {
            severity: raw.severity,
            category: raw.category,
            description: raw.description,
            location,
            snippet: raw.snippet.filter(|s| !s.is_empty()),
        }
    }
}

/// The security assessment for one skill. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// 0-100, higher is safer. Kept signed so out-of-range values from a
    /// misbehaving backend survive parsing and can be rejected downstream.
    pub score: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl Verdict {
    /// Issues with HIGH or CRITICAL severity, in report order.
    pub fn blocking_issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity.is_blocking())
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Distinguishes an absent field from an explicit `null`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Body of a successful `POST /auth/register/agent`.
#[derive(Debug, Deserialize)]
pub(crate) struct RegisterResponse {
    pub api_key: String,
    pub plan: Plan,
    #[serde(default)]
    pub scans_remaining: Option<u32>,
}

impl From<RegisterResponse> for Credential {
    fn from(r: RegisterResponse) -> Self {
        Self::new(r.api_key, r.plan, Quota::from(r.scans_remaining))
    }
}

/// Body of `POST /scan`.
#[derive(Debug, Serialize)]
pub(crate) struct ScanRequest<'a> {
    pub skill_url: &'a str,
}

/// Body of a successful `POST /scan`.
#[derive(Debug, Deserialize)]
pub(crate) struct ScanResponse {
    #[serde(default)]
    pub scan_id: Option<String>,
    #[serde(flatten)]
    pub verdict: Verdict,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, deserialize_with = "present")]
    pub scans_remaining: Option<Quota>,
}

/// A verdict plus the bookkeeping the scan endpoint returns with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReceipt {
    pub verdict: Verdict,
    /// Server-side scan identifier, when reported.
    pub scan_id: Option<String>,
    /// Whether the service answered from its own cache (no credit spent).
    pub cached: bool,
    /// Updated allowance, if the response carried one.
    pub scans_remaining: Option<Quota>,
}

impl From<ScanResponse> for ScanReceipt {
    fn from(r: ScanResponse) -> Self {
        Self {
            verdict: r.verdict,
            scan_id: r.scan_id,
            cached: r.cached,
            scans_remaining: r.scans_remaining,
        }
    }
}

/// Body of `GET /usage`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Usage {
    pub plan: Plan,
    #[serde(default)]
    pub scans_used: Option<u32>,
    #[serde(default)]
    pub scans_remaining: Quota,
    #[serde(default)]
    pub scans_limit: Option<u32>,
}

/// Body of `POST /billing/upgrade`.
#[derive(Debug, Serialize)]
pub(crate) struct UpgradeRequest {
    pub plan: Plan,
}

/// Body of a successful `POST /billing/upgrade`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    /// Where the external actor completes payment.
    pub checkout_url: String,
    pub plan: Plan,
}

/// Body of `GET /billing/status`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BillingStatus {
    pub plan: Plan,
    #[serde(default, deserialize_with = "present")]
    pub scans_remaining: Option<Quota>,
}

/// Per-severity issue counts in a public report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuesSummary {
    #[serde(rename = "CRITICAL", default)]
    pub critical: u32,
    #[serde(rename = "HIGH", default)]
    pub high: u32,
    #[serde(rename = "MEDIUM", default)]
    pub medium: u32,
    #[serde(rename = "LOW", default)]
    pub low: u32,
}

/// Body of `GET /report/{url}`: a free, public summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicReport {
    pub skill_url: String,
    pub score: i32,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub certified: bool,
    #[serde(default)]
    pub certified_at: Option<String>,
    #[serde(default)]
    pub cert_hash: Option<String>,
    #[serde(default)]
    pub issues_summary: IssuesSummary,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
