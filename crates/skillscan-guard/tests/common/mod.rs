//! Scripted `ScanApi` double shared by the guard integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use skillscan_api::{
    ApiError, BillingStatus, CheckoutSession, Credential, Issue, Plan, PublicReport, Quota,
    ScanApi, ScanReceipt, Severity, SkillIdentifier, Usage, Verdict,
};
use skillscan_guard::Orchestrator;
use skillscan_store::{Clock, CredentialStore, Database, ManualClock, ResultCache};
use tokio::time::Instant;

pub const CHECKOUT_URL: &str = "https://checkout.example/s/abc";

/// What the next `scan` of a given skill returns.
pub enum ScanStep {
    Verdict(Verdict),
    WithQuota(Verdict, Quota),
    LimitReached,
    Failed(u16, &'static str),
}

/// What the next `billing_status` poll returns. Once the script runs out
/// every poll reports FREE.
pub enum StatusStep {
    Plan(Plan),
    /// A status that leaves out `scans_remaining`.
    PlanOnly(Plan),
    Error,
    Hang,
}

#[derive(Default)]
pub struct Calls {
    pub register: AtomicUsize,
    pub scan: AtomicUsize,
    pub report: AtomicUsize,
    pub usage: AtomicUsize,
    pub upgrade: AtomicUsize,
    pub status: AtomicUsize,
}

impl Calls {
    pub fn register(&self) -> usize {
        self.register.load(Ordering::SeqCst)
    }
    pub fn scan(&self) -> usize {
        self.scan.load(Ordering::SeqCst)
    }
    pub fn upgrade(&self) -> usize {
        self.upgrade.load(Ordering::SeqCst)
    }
    pub fn status(&self) -> usize {
        self.status.load(Ordering::SeqCst)
    }
}

pub struct ScriptedApi {
    credential: Option<Credential>,
    register_delay: Duration,
    scans: Mutex<HashMap<String, VecDeque<ScanStep>>>,
    upgrade_fails: bool,
    statuses: Mutex<VecDeque<StatusStep>>,
    pub calls: Calls,
    pub scan_keys: Mutex<Vec<String>>,
    pub poll_times: Mutex<Vec<Instant>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            credential: Some(Credential::new("k1", Plan::Free, Quota::Limited(5))),
            register_delay: Duration::ZERO,
            scans: Mutex::new(HashMap::new()),
            upgrade_fails: false,
            statuses: Mutex::new(VecDeque::new()),
            calls: Calls::default(),
            scan_keys: Mutex::new(Vec::new()),
            poll_times: Mutex::new(Vec::new()),
        }
    }

    pub fn registration_fails(mut self) -> Self {
        self.credential = None;
        self
    }

    pub fn register_delay(mut self, delay: Duration) -> Self {
        self.register_delay = delay;
        self
    }

    pub fn scan(self, url: &str, step: ScanStep) -> Self {
        let key = SkillIdentifier::parse(url).unwrap().key().to_string();
        self.scans
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(step);
        self
    }

    pub fn upgrade_fails(mut self) -> Self {
        self.upgrade_fails = true;
        self
    }

    pub fn statuses(self, steps: impl IntoIterator<Item = StatusStep>) -> Self {
        self.statuses.lock().unwrap().extend(steps);
        self
    }

    /// `free` FREE polls followed by one reporting `plan`.
    pub fn confirm_after(self, free: usize, plan: Plan) -> Self {
        let steps = std::iter::repeat_with(|| StatusStep::Plan(Plan::Free))
            .take(free)
            .chain(std::iter::once(StatusStep::Plan(plan)));
        self.statuses(steps)
    }

    pub fn poll_offsets(&self) -> Vec<Duration> {
        let times = self.poll_times.lock().unwrap();
        match times.first() {
            Some(first) => times.iter().map(|t| *t - *first).collect(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ScanApi for ScriptedApi {
    async fn register(&self) -> skillscan_api::Result<Credential> {
        self.calls.register.fetch_add(1, Ordering::SeqCst);
        if !self.register_delay.is_zero() {
            tokio::time::sleep(self.register_delay).await;
        }
        self.credential
            .clone()
            .ok_or_else(|| ApiError::RegistrationFailed {
                status: 500,
                body: "registration disabled".into(),
            })
    }

    async fn scan(
        &self,
        skill: &SkillIdentifier,
        api_key: &str,
    ) -> skillscan_api::Result<ScanReceipt> {
        self.calls.scan.fetch_add(1, Ordering::SeqCst);
        self.scan_keys.lock().unwrap().push(api_key.to_string());

        let step = self
            .scans
            .lock()
            .unwrap()
            .get_mut(skill.key())
            .and_then(VecDeque::pop_front);
        let receipt = |verdict: Verdict, quota: Option<Quota>| ScanReceipt {
            verdict,
            scan_id: Some("scan-1".into()),
            cached: false,
            scans_remaining: quota,
        };

        match step {
            Some(ScanStep::Verdict(v)) => Ok(receipt(v, None)),
            Some(ScanStep::WithQuota(v, q)) => Ok(receipt(v, Some(q))),
            Some(ScanStep::LimitReached) => Err(ApiError::LimitReached),
            Some(ScanStep::Failed(status, reason)) => Err(ApiError::ScanFailed {
                status,
                reason: reason.into(),
            }),
            None => Err(ApiError::ScanFailed {
                status: 500,
                reason: format!("unscripted scan of {}", skill.key()),
            }),
        }
    }

    async fn report(&self, skill: &SkillIdentifier) -> skillscan_api::Result<PublicReport> {
        self.calls.report.fetch_add(1, Ordering::SeqCst);
        Err(ApiError::ReportNotFound {
            skill: skill.source().to_string(),
        })
    }

    async fn usage(&self, _api_key: &str) -> skillscan_api::Result<Usage> {
        self.calls.usage.fetch_add(1, Ordering::SeqCst);
        Ok(Usage {
            plan: Plan::Free,
            scans_used: Some(2),
            scans_remaining: Quota::Limited(3),
            scans_limit: Some(5),
        })
    }

    async fn request_upgrade(
        &self,
        _api_key: &str,
        plan: Plan,
    ) -> skillscan_api::Result<CheckoutSession> {
        self.calls.upgrade.fetch_add(1, Ordering::SeqCst);
        if self.upgrade_fails {
            return Err(ApiError::BillingRequestFailed {
                status: 503,
                reason: "Payment system not configured".into(),
            });
        }
        Ok(CheckoutSession {
            checkout_url: CHECKOUT_URL.into(),
            plan,
        })
    }

    async fn billing_status(&self, _api_key: &str) -> skillscan_api::Result<BillingStatus> {
        self.calls.status.fetch_add(1, Ordering::SeqCst);
        self.poll_times.lock().unwrap().push(Instant::now());

        let step = self.statuses.lock().unwrap().pop_front();
        match step {
            None | Some(StatusStep::Plan(Plan::Free)) => Ok(BillingStatus {
                plan: Plan::Free,
                scans_remaining: Some(Quota::Limited(0)),
            }),
            Some(StatusStep::Plan(plan)) => Ok(BillingStatus {
                plan,
                scans_remaining: Some(Quota::Unbounded),
            }),
            Some(StatusStep::PlanOnly(plan)) => Ok(BillingStatus {
                plan,
                scans_remaining: None,
            }),
            Some(StatusStep::Error) => Err(ApiError::UnexpectedStatus {
                operation: "billing_status",
                status: 502,
                body: "bad gateway".into(),
            }),
            Some(StatusStep::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn issue(severity: Severity) -> Issue {
    Issue {
        severity,
        category: "exfiltration".into(),
        description: "sends credentials to a remote host".into(),
        location: Some("line 7".into()),
        snippet: None,
    }
}

pub fn verdict(score: i32, issues: Vec<Issue>) -> Verdict {
    Verdict {
        score,
        recommendation: None,
        issues,
    }
}

pub struct Harness {
    pub api: Arc<ScriptedApi>,
    pub clock: Arc<ManualClock>,
    pub guard: Orchestrator,
}

/// An orchestrator over `api` with in-memory state and a manual clock.
pub async fn harness(api: ScriptedApi) -> Harness {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();

    let clock = Arc::new(ManualClock::default());
    let cache = ResultCache::builder(db.clone())
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .build();
    let credentials = CredentialStore::load(db).await.unwrap();

    let api = Arc::new(api);
    let guard = Orchestrator::new(
        Arc::clone(&api) as Arc<dyn ScanApi>,
        Arc::new(credentials),
        Arc::new(cache),
    );
    Harness { api, clock, guard }
}
