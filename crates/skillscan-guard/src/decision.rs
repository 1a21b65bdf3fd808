//! Decision engine: verdict in, install action and audit line out.
//!
//! [`decide`] is the only place an install is authorized. It is a pure
//! function over the verdict; logging the line it produces is the caller's
//! job.
//!
//! | Score | Issues | Action |
//! |---|---|---|
//! | 80..=100 | any | INSTALL |
//! | 40..=79 | any HIGH/CRITICAL | ABORT |
//! | 40..=79 | none HIGH/CRITICAL (or empty) | INSTALL_WITH_WARNING |
//! | 0..=39 | any | ABORT |
//! | out of range | any | ABORT (invalid verdict) |
//!
//! The numeric score is authoritative. A recommendation that disagrees with
//! the score band is reported in [`Decision::mismatch`] and otherwise
//! ignored.

use std::fmt;

use skillscan_api::{Recommendation, Verdict};

use crate::error::GuardError;

/// What the host should do with the skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Install,
    InstallWithWarning,
    Abort,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "INSTALL",
            Self::InstallWithWarning => "INSTALL_WITH_WARNING",
            Self::Abort => "ABORT",
        }
    }

    /// `true` for both install actions.
    pub fn permits_install(&self) -> bool {
        !matches!(self, Self::Abort)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recommendation field that contradicts the score band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecommendationMismatch {
    pub reported: Recommendation,
    pub expected: Recommendation,
}

/// The outcome of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    /// Score the decision was based on; 0 when no verdict was obtained.
    pub score: i32,
    /// Band the score falls in; `None` for an out-of-range score or a
    /// decision made without a verdict.
    pub band: Option<Recommendation>,
    pub mismatch: Option<RecommendationMismatch>,
    /// `false` when the request ended before a verdict was obtained.
    pub verified: bool,
    /// The single audit line for this install request.
    pub log_line: String,
}

impl Decision {
    /// Fail-closed decision for a request that never produced a verdict.
    pub fn unverified(err: &GuardError) -> Self {
        Self {
            action: Action::Abort,
            score: 0,
            band: None,
            mismatch: None,
            verified: false,
            log_line: blocked(0, &format!("unverified skill ({}: {err})", err.kind())),
        }
    }

    /// `true` when the score was outside 0..=100.
    pub fn is_invalid_verdict(&self) -> bool {
        self.verified && self.band.is_none()
    }
}

const INVALID: &str = "invalid verdict (score out of range)";
const BELOW_THRESHOLD: &str = "score below safety threshold";

/// Map `verdict` to an action and its audit line.
pub fn decide(verdict: &Verdict) -> Decision {
    let score = verdict.score;
    let Some(band) = Recommendation::for_score(score) else {
        return Decision {
            action: Action::Abort,
            score,
            band: None,
            mismatch: None,
            verified: true,
            log_line: blocked(score, INVALID),
        };
    };

    let mismatch = verdict
        .recommendation
        .filter(|reported| *reported != band)
        .map(|reported| RecommendationMismatch {
            reported,
            expected: band,
        });

    let has_blocking = verdict.blocking_issues().next().is_some();
    let (action, log_line) = match band {
        Recommendation::Safe => (Action::Install, format!("SAFE ({score}/100) — installed.")),
        Recommendation::Caution if !has_blocking => (
            Action::InstallWithWarning,
            format!("CAUTION ({score}/100) — low-severity issues accepted, proceeding."),
        ),
        Recommendation::Caution | Recommendation::Dangerous => {
            (Action::Abort, blocked(score, &threat_summary(verdict)))
        }
    };

    Decision {
        action,
        score,
        band: Some(band),
        mismatch,
        verified: true,
        log_line,
    }
}

fn blocked(score: i32, summary: &str) -> String {
    format!("BLOCKED ({score}/100) — threats detected: {summary}")
}

/// HIGH/CRITICAL findings in report order, or a fallback when the score
/// alone blocked the install.
fn threat_summary(verdict: &Verdict) -> String {
    let threats: Vec<String> = verdict
        .blocking_issues()
        .map(|issue| format!("{} {}: {}", issue.severity, issue.category, issue.description))
        .collect();

    if threats.is_empty() {
        BELOW_THRESHOLD.to_string()
    } else {
        threats.join("; ")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use skillscan_api::{Issue, Severity};

    use super::*;

    fn issue(severity: Severity) -> Issue {
        Issue {
            severity,
            category: "exfiltration".into(),
            description: "posts env vars to remote host".into(),
            location: None,
            snippet: None,
        }
    }

    fn verdict(score: i32, issues: Vec<Issue>) -> Verdict {
        Verdict {
            score,
            recommendation: None,
            issues,
        }
    }

    #[test]
    fn safe_band_installs_regardless_of_issues() {
        for score in 80..=100 {
            let d = decide(&verdict(score, vec![issue(Severity::Critical)]));
            assert_eq!(d.action, Action::Install, "score {score}");
        }
        assert_eq!(
            decide(&verdict(97, vec![])).log_line,
            "SAFE (97/100) — installed."
        );
    }

    #[test]
    fn dangerous_band_aborts_regardless_of_issues() {
        for score in 0..=39 {
            assert_eq!(decide(&verdict(score, vec![])).action, Action::Abort);
            assert_eq!(
                decide(&verdict(score, vec![issue(Severity::Low)])).action,
                Action::Abort
            );
        }
    }

    #[test]
    fn caution_band_aborts_iff_blocking_issue() {
        for score in 40..=79 {
            for severity in [Severity::Low, Severity::Medium] {
                let d = decide(&verdict(score, vec![issue(severity)]));
                assert_eq!(d.action, Action::InstallWithWarning);
            }
            for severity in [Severity::High, Severity::Critical] {
                let d = decide(&verdict(score, vec![issue(Severity::Low), issue(severity)]));
                assert_eq!(d.action, Action::Abort);
            }
        }
    }

    #[test]
    fn empty_issues_at_caution_installs_with_warning() {
        let d = decide(&verdict(65, vec![]));
        assert_eq!(d.action, Action::InstallWithWarning);
        assert_eq!(
            d.log_line,
            "CAUTION (65/100) — low-severity issues accepted, proceeding."
        );
    }

    #[test]
    fn out_of_range_score_fails_closed() {
        for score in [-1, 101, i32::MAX, i32::MIN] {
            let d = decide(&verdict(score, vec![]));
            assert_eq!(d.action, Action::Abort);
            assert!(d.is_invalid_verdict());
        }
    }

    #[test]
    fn blocked_line_lists_blocking_issues() {
        let d = decide(&verdict(
            5,
            vec![
                issue(Severity::Critical),
                issue(Severity::Low),
                Issue {
                    severity: Severity::High,
                    category: "obfuscation".into(),
                    description: "base64-encoded payload".into(),
                    location: Some("line 12".into()),
                    snippet: None,
                },
            ],
        ));
        assert_eq!(
            d.log_line,
            "BLOCKED (5/100) — threats detected: CRITICAL exfiltration: posts env vars to \
             remote host; HIGH obfuscation: base64-encoded payload"
        );
        assert!(!d.is_invalid_verdict());
    }

    #[test]
    fn low_score_without_blocking_issues_names_threshold() {
        let d = decide(&verdict(20, vec![]));
        assert_eq!(
            d.log_line,
            "BLOCKED (20/100) — threats detected: score below safety threshold"
        );
    }

    #[test]
    fn mismatch_is_reported_but_score_wins() {
        let mut v = verdict(85, vec![]);
        v.recommendation = Some(Recommendation::Caution);

        let d = decide(&v);
        assert_eq!(d.action, Action::Install);
        assert_eq!(
            d.mismatch,
            Some(RecommendationMismatch {
                reported: Recommendation::Caution,
                expected: Recommendation::Safe,
            })
        );

        v.recommendation = Some(Recommendation::Safe);
        assert_eq!(decide(&v).mismatch, None);
    }

    #[test]
    fn unverified_decision_names_the_error_kind() {
        let d = Decision::unverified(&GuardError::BillingTimeout { waited_secs: 30 });
        assert_eq!(d.action, Action::Abort);
        assert!(!d.is_invalid_verdict());
        assert!(
            d.log_line
                .starts_with("BLOCKED (0/100) — threats detected: unverified skill (billing_timeout: ")
        );
    }
}
