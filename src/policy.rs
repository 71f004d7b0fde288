//! Decision Policy: score + ignore-list membership -> verdict.

use crate::error::ConfigError;
use crate::process_record::ProcessStatus;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SUSPICIOUS_THRESHOLD: f64 = 0.40;
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub suspicious: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            suspicious: DEFAULT_SUSPICIOUS_THRESHOLD,
            critical: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.suspicious) || !in_range(self.critical) || self.suspicious >= self.critical {
            return Err(ConfigError::InvalidThresholds {
                suspicious: self.suspicious,
                critical: self.critical,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Trusted,
    Suspicious,
    Critical,
}

impl Verdict {
    pub fn status(self) -> ProcessStatus {
        match self {
            Verdict::Trusted => ProcessStatus::Trusted,
            Verdict::Suspicious => ProcessStatus::Suspicious,
            Verdict::Critical => ProcessStatus::Critical,
        }
    }
}

/// Map a clamped score to a verdict.
///
/// The ignore-list only suppresses the SUSPICIOUS band; a critical score is
/// acted on regardless of name.
pub fn decide(score: f64, ignored: bool, thresholds: &Thresholds) -> Verdict {
    if score >= thresholds.critical {
        Verdict::Critical
    } else if score >= thresholds.suspicious && !ignored {
        Verdict::Suspicious
    } else {
        Verdict::Trusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case(0.10, false => Verdict::Trusted; "low score")]
    #[test_case(0.39, false => Verdict::Trusted; "just below suspicious")]
    #[test_case(0.40, false => Verdict::Suspicious; "suspicious boundary")]
    #[test_case(0.55, false => Verdict::Suspicious; "suspicious band")]
    #[test_case(0.60, true => Verdict::Trusted; "ignored name in band")]
    #[test_case(0.75, false => Verdict::Critical; "critical boundary")]
    #[test_case(0.90, true => Verdict::Critical; "ignored name still critical")]
    #[test_case(1.00, false => Verdict::Critical; "max score")]
    fn test_default_thresholds(score: f64, ignored: bool) -> Verdict {
        decide(score, ignored, &Thresholds::default())
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Thresholds::default().validate().is_ok());
        assert!(Thresholds { suspicious: 0.8, critical: 0.7 }.validate().is_err());
        assert!(Thresholds { suspicious: 0.5, critical: 0.5 }.validate().is_err());
        assert!(Thresholds { suspicious: -0.1, critical: 0.7 }.validate().is_err());
        assert!(Thresholds { suspicious: 0.2, critical: 1.5 }.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_ignored_never_suspicious(score in 0.0f64..=1.0) {
            prop_assert_ne!(decide(score, true, &Thresholds::default()), Verdict::Suspicious);
        }

        #[test]
        fn prop_verdict_is_monotonic_in_score(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let rank = |v: Verdict| match v {
                Verdict::Trusted => 0,
                Verdict::Suspicious => 1,
                Verdict::Critical => 2,
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let t = Thresholds::default();
            prop_assert!(rank(decide(lo, false, &t)) <= rank(decide(hi, false, &t)));
        }
    }
}
