//! Upgrade-on-limit recovery.
//!
//! When a scan comes back with HTTP 402 the guard opens a checkout session
//! and then waits for the plan to change. Payment itself happens outside
//! this process; the machine only watches `GET /billing/status` for the
//! plan to leave FREE.
//!
//! ```text
//! IDLE ─► AWAITING_CHECKOUT ─► AWAITING_PAYMENT ─┬─► CONFIRMED
//!                │                 ▲     │       ├─► TIMED_OUT
//!                └─► ABORTED       └─────┘       └─► ABORTED
//!                                  (poll)
//! ```
//!
//! The wait is bounded by a deadline on `tokio::time::Instant`, checked
//! before every poll and enforced on the poll itself with `timeout_at`, so a
//! slow status call cannot push the machine past its ceiling. Cancelling the
//! token at any point moves the machine to ABORTED; a confirmation that
//! arrives afterwards is dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use skillscan_api::{BillingStatus, Plan, ScanApi};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GuardError, Result};

/// Callback invoked once a checkout URL is available, so the host can hand
/// it to whoever completes payment.
pub type CheckoutHook = Arc<dyn Fn(&BillingSession) + Send + Sync>;

/// Timing and target of the recovery flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPolicy {
    pub target_plan: Plan,
    pub poll_interval: Duration,
    /// Wall-clock ceiling on the payment wait.
    pub timeout: Duration,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            target_plan: Plan::PayPerScan,
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
        }
    }
}

/// States of [`BillingMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BillingState {
    Idle,
    AwaitingCheckout,
    AwaitingPayment,
    Confirmed,
    TimedOut,
    Aborted,
}

impl BillingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AwaitingCheckout => "AWAITING_CHECKOUT",
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::Confirmed => "CONFIRMED",
            Self::TimedOut => "TIMED_OUT",
            Self::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::TimedOut | Self::Aborted)
    }

    /// Whether `self -> next` is an edge of the state diagram.
    pub fn can_transition_to(&self, next: BillingState) -> bool {
        use BillingState::*;
        matches!(
            (self, next),
            (Idle, AwaitingCheckout | Aborted)
                | (AwaitingCheckout, AwaitingPayment | Aborted)
                | (AwaitingPayment, AwaitingPayment | Confirmed | TimedOut | Aborted)
        )
    }
}

impl fmt::Display for BillingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open checkout. Lives only while the machine is waiting for payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSession {
    pub checkout_url: String,
    pub requested_at: DateTime<Utc>,
    pub target_plan: Plan,
}

/// How a recovery attempt ended.
#[derive(Debug)]
pub enum BillingOutcome {
    /// The plan left FREE. Only this outcome permits a scan retry.
    Confirmed { status: BillingStatus, polls: u32 },
    /// The deadline passed without a plan change.
    TimedOut { waited: Duration, polls: u32 },
    /// The upgrade request failed or the host cancelled.
    Aborted(GuardError),
}

impl BillingOutcome {
    pub fn state(&self) -> BillingState {
        match self {
            Self::Confirmed { .. } => BillingState::Confirmed,
            Self::TimedOut { .. } => BillingState::TimedOut,
            Self::Aborted(_) => BillingState::Aborted,
        }
    }

    /// The confirmed status, or the error that ends the install request.
    pub fn into_result(self) -> Result<BillingStatus> {
        match self {
            Self::Confirmed { status, .. } => Ok(status),
            Self::TimedOut { waited, .. } => Err(GuardError::BillingTimeout {
                waited_secs: waited.as_secs(),
            }),
            Self::Aborted(err) => Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// One run of the upgrade flow. Create a fresh machine per recovery.
pub struct BillingMachine {
    api: Arc<dyn ScanApi>,
    policy: BillingPolicy,
    state: BillingState,
    session: Option<BillingSession>,
    on_checkout: Option<CheckoutHook>,
}

impl BillingMachine {
    pub fn new(api: Arc<dyn ScanApi>, policy: BillingPolicy) -> Self {
        Self {
            api,
            policy,
            state: BillingState::Idle,
            session: None,
            on_checkout: None,
        }
    }

    /// Call `hook` with the session as soon as checkout opens.
    pub fn with_checkout_hook(mut self, hook: CheckoutHook) -> Self {
        self.on_checkout = Some(hook);
        self
    }

    pub fn state(&self) -> BillingState {
        self.state
    }

    /// The open checkout, while one exists.
    pub fn session(&self) -> Option<&BillingSession> {
        self.session.as_ref()
    }

    /// Request checkout and wait for payment.
    pub async fn run(&mut self, api_key: &str, cancel: &CancellationToken) -> BillingOutcome {
        let requested = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            requested = self.request_checkout(api_key) => Some(requested),
        };

        match requested {
            None => self.abort(GuardError::Cancelled),
            Some(Err(err)) => BillingOutcome::Aborted(err),
            Some(Ok(_)) => self.await_payment(api_key, cancel).await,
        }
    }

    /// `IDLE -> AWAITING_CHECKOUT -> AWAITING_PAYMENT`, or `ABORTED` if the
    /// service refuses the upgrade.
    pub async fn request_checkout(&mut self, api_key: &str) -> Result<BillingSession> {
        if self.state != BillingState::Idle {
            return Err(GuardError::BillingRequestFailed {
                reason: format!("billing flow already {}", self.state),
            });
        }

        self.transition(BillingState::AwaitingCheckout);
        let target_plan = self.policy.target_plan;

        let checkout = match self.api.request_upgrade(api_key, target_plan).await {
            Ok(checkout) => checkout,
            Err(err) => {
                let err = GuardError::from_api("request_upgrade", err);
                warn!(error = %err, "upgrade request rejected");
                self.transition(BillingState::Aborted);
                return Err(err);
            }
        };

        let session = BillingSession {
            checkout_url: checkout.checkout_url,
            requested_at: Utc::now(),
            target_plan,
        };
        info!(
            plan = %target_plan,
            checkout_url = %session.checkout_url,
            timeout_secs = self.policy.timeout.as_secs(),
            "checkout opened, waiting for payment"
        );
        if let Some(hook) = &self.on_checkout {
            hook(&session);
        }

        self.session = Some(session.clone());
        self.transition(BillingState::AwaitingPayment);
        Ok(session)
    }

    /// Poll until the plan leaves FREE, the deadline passes, or `cancel`
    /// fires.
    ///
    /// The first poll is immediate; later polls start one interval after
    /// the previous one started. Failed polls are logged and retried on the
    /// same cadence.
    pub async fn await_payment(
        &mut self,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> BillingOutcome {
        if self.state != BillingState::AwaitingPayment {
            return BillingOutcome::Aborted(GuardError::BillingRequestFailed {
                reason: format!("no checkout session (state {})", self.state),
            });
        }

        let api = Arc::clone(&self.api);
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let mut polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return self.abort(GuardError::Cancelled);
            }
            let poll_started = Instant::now();
            if poll_started >= deadline {
                return self.time_out(started, polls);
            }

            polls += 1;
            let poll = tokio::time::timeout_at(deadline, api.billing_status(api_key));
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                polled = poll => Some(polled),
            };
            let Some(polled) = polled else {
                return self.abort(GuardError::Cancelled);
            };

            match polled {
                Err(_elapsed) => return self.time_out(started, polls),
                Ok(Ok(status)) if status.plan != Plan::Free => {
                    self.transition(BillingState::Confirmed);
                    self.session = None;
                    info!(plan = %status.plan, polls, "payment confirmed");
                    return BillingOutcome::Confirmed { status, polls };
                }
                Ok(Ok(_)) => {
                    debug!(poll = polls, "plan still FREE");
                    self.transition(BillingState::AwaitingPayment);
                }
                Ok(Err(err)) => {
                    warn!(poll = polls, error = %err, "billing status poll failed");
                }
            }

            let wake = (poll_started + self.policy.poll_interval).min(deadline);
            let woke = tokio::select! {
                biased;
                () = cancel.cancelled() => false,
                () = tokio::time::sleep_until(wake) => true,
            };
            if !woke {
                return self.abort(GuardError::Cancelled);
            }
        }
    }

    fn time_out(&mut self, started: Instant, polls: u32) -> BillingOutcome {
        let waited = started.elapsed();
        self.transition(BillingState::TimedOut);
        self.session = None;
        warn!(
            waited_secs = waited.as_secs(),
            polls, "payment not confirmed before deadline"
        );
        BillingOutcome::TimedOut { waited, polls }
    }

    fn abort(&mut self, err: GuardError) -> BillingOutcome {
        self.transition(BillingState::Aborted);
        self.session = None;
        warn!(error = %err, "billing flow aborted");
        BillingOutcome::Aborted(err)
    }

    fn transition(&mut self, next: BillingState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal billing transition {} -> {}",
            self.state,
            next
        );
        if self.state != next {
            debug!(from = %self.state, to = %next, "billing state");
        }
        self.state = next;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
