//! SecurityScan HTTP client.
//!
//! [`ScanApi`] is the seam the orchestrator talks to; [`HttpScanClient`] is
//! the production implementation over `reqwest`. The client issues exactly
//! one request per call. Retry policy belongs to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, Result};
use crate::types::{
    BillingStatus, CheckoutSession, Credential, Plan, PublicReport, RegisterResponse,
    ScanReceipt, ScanRequest, ScanResponse, SkillIdentifier, UpgradeRequest, Usage,
};

/// Default SecurityScan endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.securityscan.dev";

/// Header carrying the API key on authenticated calls.
const API_KEY_HEADER: &str = "X-API-Key";

const USER_AGENT: &str = concat!("skillscan/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The remote operations the install guard depends on.
#[async_trait]
pub trait ScanApi: Send + Sync {
    /// Create a fresh agent account. No auth, empty body.
    async fn register(&self) -> Result<Credential>;

    /// Scan a skill. Returns [`ApiError::LimitReached`] on HTTP 402.
    async fn scan(&self, skill: &SkillIdentifier, api_key: &str) -> Result<ScanReceipt>;

    /// Fetch the public report for a skill. Free and unauthenticated.
    async fn report(&self, skill: &SkillIdentifier) -> Result<PublicReport>;

    /// Current plan and allowance for `api_key`.
    async fn usage(&self, api_key: &str) -> Result<Usage>;

    /// Open a checkout session for `plan`.
    async fn request_upgrade(&self, api_key: &str, plan: Plan) -> Result<CheckoutSession>;

    /// The plan currently in effect for `api_key`.
    async fn billing_status(&self, api_key: &str) -> Result<BillingStatus>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// `reqwest`-backed [`ScanApi`].
#[derive(Debug, Clone)]
pub struct HttpScanClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpScanClient {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::ClientBuild {
                reason: e.to_string(),
            })?;
        Ok(Self { base_url, http })
    }

    /// Create a client for `base_url` with a 30 second timeout.
    pub fn with_url(base_url: impl Into<String>) -> Result<Self> {
        Self::new(base_url, Duration::from_secs(30))
    }

    /// The base URL requests are issued against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ScanApi for HttpScanClient {
    async fn register(&self) -> Result<Credential> {
        tracing::debug!(base_url = %self.base_url, "registering agent");

        let response = self.http.post(self.url("/auth/register/agent")).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::RegistrationFailed {
                status: status.as_u16(),
                body,
            });
        }

        let raw: RegisterResponse = decode("register", response).await?;
        let credential = Credential::from(raw);
        tracing::info!(
            plan = %credential.plan,
            scans_remaining = %credential.scans_remaining,
            "agent registered"
        );
        Ok(credential)
    }

    async fn scan(&self, skill: &SkillIdentifier, api_key: &str) -> Result<ScanReceipt> {
        tracing::debug!(skill = %skill, "requesting scan");

        let response = self
            .http
            .post(self.url("/scan"))
            .header(API_KEY_HEADER, api_key)
            .json(&ScanRequest {
                skill_url: skill.source(),
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            tracing::debug!(skill = %skill, "scan refused: limit reached");
            return Err(ApiError::LimitReached);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ScanFailed {
                status: status.as_u16(),
                reason: error_detail(&body),
            });
        }

        let raw: ScanResponse = decode("scan", response).await?;
        Ok(ScanReceipt::from(raw))
    }

    async fn report(&self, skill: &SkillIdentifier) -> Result<PublicReport> {
        let encoded: String =
            url::form_urlencoded::byte_serialize(skill.source().as_bytes()).collect();

        let response = self
            .http
            .get(self.url(&format!("/report/{encoded}")))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::ReportNotFound {
                skill: skill.source().to_owned(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::UnexpectedStatus {
                operation: "report",
                status: status.as_u16(),
                body,
            });
        }

        decode("report", response).await
    }

    async fn usage(&self, api_key: &str) -> Result<Usage> {
        let response = self
            .http
            .get(self.url("/usage"))
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::UnexpectedStatus {
                operation: "usage",
                status: status.as_u16(),
                body,
            });
        }

        decode("usage", response).await
    }

    async fn request_upgrade(&self, api_key: &str, plan: Plan) -> Result<CheckoutSession> {
        tracing::debug!(plan = %plan, "requesting upgrade checkout");

        let response = self
            .http
            .post(self.url("/billing/upgrade"))
            .header(API_KEY_HEADER, api_key)
            .json(&UpgradeRequest { plan })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::BillingRequestFailed {
                status: status.as_u16(),
                reason: error_detail(&body),
            });
        }

        decode("billing upgrade", response).await
    }

    async fn billing_status(&self, api_key: &str) -> Result<BillingStatus> {
        let response = self
            .http
            .get(self.url("/billing/status"))
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::UnexpectedStatus {
                operation: "billing status",
                status: status.as_u16(),
                body,
            });
        }

        decode("billing status", response).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read the body and parse it, keeping JSON errors apart from transport ones.
async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<T> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|source| ApiError::Decode { operation, source })
}

/// Pull a human-readable reason out of an error body.
///
/// The service answers errors as `{"detail": "..."}`, `{"detail": {"message":
/// "..."}}` or `{"error": "...", "message": "..."}`; anything else is returned
/// verbatim.
fn error_detail(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_owned();
    };

    let inner = value.get("detail").unwrap_or(&value);
    if let Some(s) = inner.as_str() {
        return s.to_owned();
    }
    inner
        .get("message")
        .or_else(|| inner.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| body.trim().to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
