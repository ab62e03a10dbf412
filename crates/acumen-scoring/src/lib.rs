//! Acumen Scoring - threshold-band scoring policy
//!
//! Maps a step and a raw percentage onto the achieved level, the certificate
//! level (if any), and eligibility for the next step. Stateless by design;
//! the bands and floor levels differ per step, so each step gets an explicit
//! branch rather than a generic formula.

#![deny(unsafe_code)]

use acumen_types::{Level, Step};
use serde::{Deserialize, Serialize};

/// Scoring below this on step 1 permanently forfeits retake eligibility.
pub const HARD_FAIL_THRESHOLD: f64 = 25.0;

/// The verdict for one graded assessment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    /// Level the candidate holds after this attempt. `None` only for a
    /// step-1 hard fail.
    pub achieved_level: Option<Level>,
    /// Level a certificate is minted for. `None` on hard fail and on
    /// floor-fallback results, where the achieved level is retained but
    /// nothing new was earned.
    pub certificate_level: Option<Level>,
    /// Whether the candidate may attempt the next step. Always false for
    /// step 3, which is terminal.
    pub can_proceed: bool,
}

/// Percentage of correct answers against the full question count.
/// Unanswered questions count as wrong. No rounding before banding.
pub fn percentage(correct: u32, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * f64::from(correct) / total as f64
}

/// Band boundaries are lower-inclusive: exactly 25 / 50 / 75 belong to the
/// upper band.
pub fn determine_outcome(step: Step, percentage: f64) -> ScoreOutcome {
    let (low, high) = step.levels();
    match step {
        Step::One => {
            if percentage < 25.0 {
                // Hard fail: no level, no certificate, and the caller is
                // expected to apply the retake lockout.
                ScoreOutcome {
                    achieved_level: None,
                    certificate_level: None,
                    can_proceed: false,
                }
            } else if percentage < 50.0 {
                ScoreOutcome {
                    achieved_level: Some(low),
                    certificate_level: Some(low),
                    can_proceed: false,
                }
            } else if percentage < 75.0 {
                ScoreOutcome {
                    achieved_level: Some(high),
                    certificate_level: Some(high),
                    can_proceed: false,
                }
            } else {
                ScoreOutcome {
                    achieved_level: Some(high),
                    certificate_level: Some(high),
                    can_proceed: true,
                }
            }
        }
        Step::Two => {
            if percentage < 25.0 {
                ScoreOutcome {
                    achieved_level: step.floor(),
                    certificate_level: None,
                    can_proceed: false,
                }
            } else if percentage < 50.0 {
                ScoreOutcome {
                    achieved_level: Some(low),
                    certificate_level: Some(low),
                    can_proceed: false,
                }
            } else if percentage < 75.0 {
                ScoreOutcome {
                    achieved_level: Some(high),
                    certificate_level: Some(high),
                    can_proceed: false,
                }
            } else {
                ScoreOutcome {
                    achieved_level: Some(high),
                    certificate_level: Some(high),
                    can_proceed: true,
                }
            }
        }
        // Step 3 is terminal: three bands, never a proceed flag.
        Step::Three => {
            if percentage < 25.0 {
                ScoreOutcome {
                    achieved_level: step.floor(),
                    certificate_level: None,
                    can_proceed: false,
                }
            } else if percentage < 50.0 {
                ScoreOutcome {
                    achieved_level: Some(low),
                    certificate_level: Some(low),
                    can_proceed: false,
                }
            } else {
                ScoreOutcome {
                    achieved_level: Some(high),
                    certificate_level: Some(high),
                    can_proceed: false,
                }
            }
        }
    }
}

/// Whether this (step, percentage) pair triggers the permanent step-1
/// retake lockout.
pub fn is_hard_fail(step: Step, percentage: f64) -> bool {
    step == Step::One && percentage < HARD_FAIL_THRESHOLD
}
