//! Per-request install guard.
//!
//! [`Orchestrator::check`] runs one install request to a terminal decision:
//!
//! ```text
//! parse ─► cache ─┬─ hit ─────────────────────────────────────────► decide
//!                 └─ miss ─► credential ─► scan ─┬─ ok ─► store ──► decide
//!                                                └─ 402 ─► billing ─┬─ confirmed ─► scan (once)
//!                                                                   └─ otherwise ─► ABORT
//! ```
//!
//! The cache is consulted before the credential so a hit costs nothing: no
//! registration, no scan, no billing. Every failure other than the first
//! 402 ends the request with ABORT, and every request logs exactly one
//! decision line.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use skillscan_api::{
    BillingStatus, Credential, HttpScanClient, Plan, PublicReport, Quota, Recommendation,
    ScanApi, ScanReceipt, SkillIdentifier, Usage, Verdict,
};
use skillscan_store::{CredentialStore, Database, ResultCache};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::billing::{BillingMachine, BillingPolicy, CheckoutHook};
use crate::config::GuardConfig;
use crate::decision::{Action, Decision, decide};
use crate::error::{ErrorKind, GuardError, Result};

/// The result of one install request.
#[derive(Debug)]
pub struct InstallOutcome {
    /// The locator the host asked about, as given.
    pub source: String,
    /// Normalized identifier, when `source` parsed.
    pub skill: Option<SkillIdentifier>,
    pub decision: Decision,
    /// The verdict the decision was based on, if one was obtained.
    pub verdict: Option<Verdict>,
    /// Whether the verdict came from the local cache.
    pub from_cache: bool,
    /// Billing recoveries attempted (never more than one).
    pub billing_cycles: u32,
    /// Why the request ended without a verdict.
    pub error: Option<GuardError>,
}

impl InstallOutcome {
    pub fn action(&self) -> Action {
        self.decision.action
    }

    pub fn permits_install(&self) -> bool {
        self.decision.action.permits_install()
    }

    /// The taxonomy name behind an ABORT, if there is one.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.error {
            Some(err) => Some(err.kind()),
            None if self.decision.is_invalid_verdict() => Some(ErrorKind::InvalidVerdict),
            None => None,
        }
    }

    /// Emit the single decision line for this request.
    fn log(&self) {
        let line = &self.decision.log_line;
        match self.decision.action {
            Action::Install => info!(skill = %self.source, cached = self.from_cache, "{line}"),
            Action::InstallWithWarning => {
                warn!(skill = %self.source, cached = self.from_cache, "{line}")
            }
            Action::Abort => match (self.error_kind(), &self.error) {
                (Some(kind), Some(err)) => {
                    error!(skill = %self.source, error_kind = %kind, error = %err, "{line}")
                }
                (Some(kind), None) => error!(skill = %self.source, error_kind = %kind, "{line}"),
                (None, _) => error!(skill = %self.source, "{line}"),
            },
        }
    }
}

/// Bookkeeping gathered while a request runs.
#[derive(Default)]
struct Progress {
    skill: Option<SkillIdentifier>,
    from_cache: bool,
    billing_cycles: u32,
}

/// Runs install requests against shared credential and cache state.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and any
/// number of requests may run concurrently.
pub struct Orchestrator {
    api: Arc<dyn ScanApi>,
    credentials: Arc<CredentialStore>,
    cache: Arc<ResultCache>,
    billing: BillingPolicy,
    on_checkout: Option<CheckoutHook>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn ScanApi>,
        credentials: Arc<CredentialStore>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            api,
            credentials,
            cache,
            billing: BillingPolicy::default(),
            on_checkout: None,
        }
    }

    /// Wire up the HTTP client and on-disk state described by `config`.
    ///
    /// A pre-provisioned key from `config.api_key` seeds an empty credential
    /// store.
    pub async fn open(config: &GuardConfig) -> Result<Self> {
        let db = open_database(&config.data_dir, config.db_path()).await?;
        let credentials = Arc::new(CredentialStore::load(db.clone()).await?);
        let cache = Arc::new(
            ResultCache::builder(db)
                .ttl(config.cache_ttl())
                .max_capacity(config.cache_capacity)
                .build(),
        );
        let client = HttpScanClient::new(config.base_url.clone(), config.request_timeout())
            .map_err(|err| GuardError::Config {
                reason: err.to_string(),
            })?;
        let api: Arc<dyn ScanApi> = Arc::new(client);

        let orchestrator =
            Self::new(api, credentials, cache).with_billing_policy(config.billing_policy());
        if let Some(key) = &config.api_key {
            orchestrator.seed_credential(key).await?;
        }
        Ok(orchestrator)
    }

    pub fn with_billing_policy(mut self, policy: BillingPolicy) -> Self {
        self.billing = policy;
        self
    }

    /// Called with each checkout session the billing flow opens.
    pub fn with_checkout_hook(mut self, hook: CheckoutHook) -> Self {
        self.on_checkout = Some(hook);
        self
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    // -----------------------------------------------------------------------
    // Install checks
    // -----------------------------------------------------------------------

    /// Decide whether the skill at `source` may be installed.
    pub async fn check(&self, source: &str) -> InstallOutcome {
        self.check_with_cancel(source, &CancellationToken::new()).await
    }

    /// [`Orchestrator::check`], abandoned with ABORT as soon as `cancel`
    /// fires.
    #[instrument(skip(self, cancel))]
    pub async fn check_with_cancel(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> InstallOutcome {
        let mut progress = Progress::default();
        let result = self.obtain_verdict(source, cancel, &mut progress).await;

        let (decision, verdict, error) = match result {
            Ok(verdict) => {
                let decision = decide(&verdict);
                if let Some(mismatch) = decision.mismatch {
                    warn!(
                        score = verdict.score,
                        reported = %mismatch.reported,
                        expected = %mismatch.expected,
                        "recommendation disagrees with score band, using score"
                    );
                }
                (decision, Some(verdict), None)
            }
            Err(err) => (Decision::unverified(&err), None, Some(err)),
        };

        let outcome = InstallOutcome {
            source: source.to_string(),
            skill: progress.skill,
            decision,
            verdict,
            from_cache: progress.from_cache,
            billing_cycles: progress.billing_cycles,
            error,
        };
        outcome.log();
        outcome
    }

    /// Check several skills concurrently. Outcomes come back in input order.
    pub async fn check_all<S>(
        &self,
        sources: &[S],
        cancel: &CancellationToken,
    ) -> Vec<InstallOutcome>
    where
        S: AsRef<str>,
    {
        join_all(
            sources
                .iter()
                .map(|source| self.check_with_cancel(source.as_ref(), cancel)),
        )
        .await
    }

    async fn obtain_verdict(
        &self,
        source: &str,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<Verdict> {
        let skill =
            SkillIdentifier::parse(source).map_err(|err| GuardError::from_api("scan", err))?;
        progress.skill = Some(skill.clone());

        match self.cache.lookup(&skill).await {
            Ok(Some(verdict)) => {
                progress.from_cache = true;
                return Ok(verdict);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "cache lookup failed, scanning instead"),
        }

        let credential = self.ensure_credential_with_cancel(cancel).await?;
        let api_key = credential.api_key.as_str();

        let receipt = match self.scan(&skill, api_key, cancel).await {
            Err(GuardError::LimitReached) => {
                progress.billing_cycles += 1;
                self.recover_limit(api_key, self.billing, cancel).await?;
                debug!("retrying scan after upgrade");
                self.scan(&skill, api_key, cancel).await.inspect_err(|err| {
                    if matches!(err, GuardError::LimitReached) {
                        warn!("scan limit reached again after upgrade, not retrying");
                    }
                })?
            }
            other => other?,
        };

        self.record(&skill, &receipt).await;
        Ok(receipt.verdict)
    }

    async fn scan(
        &self,
        skill: &SkillIdentifier,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> Result<ScanReceipt> {
        let scanned = cancellable(cancel, async {
            self.api
                .scan(skill, api_key)
                .await
                .map_err(|err| GuardError::from_api("scan", err))
        })
        .await?;

        debug!(
            score = scanned.verdict.score,
            issues = scanned.verdict.issues.len(),
            server_cached = scanned.cached,
            "scan complete"
        );
        Ok(scanned)
    }

    /// Persist what a successful scan taught us. Failures here never change
    /// the decision.
    async fn record(&self, skill: &SkillIdentifier, receipt: &ScanReceipt) {
        if let Some(quota) = receipt.scans_remaining {
            if let Err(err) = self.credentials.update_quota(quota).await {
                warn!(error = %err, "failed to record remaining scans");
            }
        }

        // Out-of-range scores are never cached.
        if Recommendation::for_score(receipt.verdict.score).is_none() {
            return;
        }
        if let Err(err) = self.cache.store(skill, &receipt.verdict).await {
            warn!(error = %err, "failed to cache verdict");
        }
    }

    async fn recover_limit(
        &self,
        api_key: &str,
        policy: BillingPolicy,
        cancel: &CancellationToken,
    ) -> Result<BillingStatus> {
        let mut machine = BillingMachine::new(Arc::clone(&self.api), policy);
        if let Some(hook) = &self.on_checkout {
            machine = machine.with_checkout_hook(Arc::clone(hook));
        }

        let status = machine.run(api_key, cancel).await.into_result()?;
        if let Err(err) = self
            .credentials
            .update_plan(status.plan, status.scans_remaining)
            .await
        {
            warn!(error = %err, "failed to record upgraded plan");
        }
        Ok(status)
    }

    // -----------------------------------------------------------------------
    // Account operations
    // -----------------------------------------------------------------------

    /// The stored credential, registering a new agent account if there is
    /// none.
    pub async fn ensure_credential(&self) -> Result<Arc<Credential>> {
        self.ensure_credential_with_cancel(&CancellationToken::new()).await
    }

    /// Cancelling stops the wait, not the registration. A registration that
    /// has started runs to completion in its own task and stores its key.
    async fn ensure_credential_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<Credential>> {
        if let Some(credential) = self.credentials.get().await {
            return Ok(credential);
        }

        let api = Arc::clone(&self.api);
        let credentials = Arc::clone(&self.credentials);
        let registration = tokio::spawn(async move {
            credentials
                .get_or_register(|| async move {
                    info!("no credential stored, registering agent");
                    api.register()
                        .await
                        .map_err(|err| GuardError::from_api("register", err))
                })
                .await
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("request cancelled, registration continues in the background");
                Err(GuardError::Cancelled)
            }
            joined = registration => joined.map_err(|err| GuardError::RegistrationFailed {
                reason: format!("registration task failed: {err}"),
            })?,
        }
    }

    /// Adopt a pre-provisioned key if nothing is stored yet.
    pub async fn seed_credential(&self, api_key: &str) -> Result<()> {
        if self.credentials.get().await.is_some() {
            return Ok(());
        }

        let credential = match self.api.usage(api_key).await {
            Ok(usage) => Credential::new(api_key, usage.plan, usage.scans_remaining),
            Err(err) => {
                warn!(error = %err, "could not confirm provided key, storing it as FREE");
                Credential::new(api_key, Plan::Free, Quota::default())
            }
        };
        info!(key = %credential.masked_key(), plan = %credential.plan, "using provided API key");
        self.credentials.put(credential).await?;
        Ok(())
    }

    /// Fetch current usage and fold it into the stored credential.
    pub async fn refresh_usage(&self) -> Result<Usage> {
        let credential = self.stored_credential().await?;
        let usage = self
            .api
            .usage(&credential.api_key)
            .await
            .map_err(|err| GuardError::from_api("usage", err))?;
        self.credentials
            .update_plan(usage.plan, Some(usage.scans_remaining))
            .await?;
        Ok(usage)
    }

    /// Run the billing flow on demand, outside any install request.
    pub async fn upgrade(
        &self,
        plan: Option<Plan>,
        cancel: &CancellationToken,
    ) -> Result<BillingStatus> {
        let credential = self.ensure_credential_with_cancel(cancel).await?;
        let mut policy = self.billing;
        if let Some(plan) = plan {
            policy.target_plan = plan;
        }
        self.recover_limit(&credential.api_key, policy, cancel).await
    }

    /// The free public report for `source`. Never feeds a decision.
    pub async fn report(&self, source: &str) -> Result<PublicReport> {
        let skill =
            SkillIdentifier::parse(source).map_err(|err| GuardError::from_api("report", err))?;
        self.api
            .report(&skill)
            .await
            .map_err(|err| GuardError::from_api("report", err))
    }

    async fn stored_credential(&self) -> Result<Arc<Credential>> {
        self.credentials
            .get()
            .await
            .ok_or_else(|| GuardError::Config {
                reason: "no credential stored; register first or set SECURITYSCAN_API_KEY".into(),
            })
    }
}

/// Race `fut` against `cancel`.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(GuardError::Cancelled),
        result = fut => result,
    }
}

async fn open_database(data_dir: &Path, db_path: std::path::PathBuf) -> Result<Database> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|e| GuardError::Config {
            reason: format!("cannot create data directory {}: {e}", data_dir.display()),
        })?;
    Ok(Database::open_and_migrate(db_path).await?)
}
