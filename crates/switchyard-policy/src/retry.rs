//! Retry rules — interval ladders keyed by capability set and fail cause.
//!
//! Rule text of the form:
//!
//! ```text
//! capabilities=internet|mms, retry_interval=2500|5000|10000, maximum_retries=10
//! capabilities=ims, fail_causes=8|27, retry_interval=1000, maximum_retries=3
//! ```
//!
//! parses once into [`RetryRule`]. The scheduler walks the ladder per
//! attempt, clamping to the last interval, and stops once the attempt
//! count reaches `maximum_retries`. A rule without `fail_causes` matches
//! any retryable cause.

use std::time::Duration;

use switchyard_common::{CapabilitySet, FailCause};

use crate::RuleParseError;

/// One parsed retry rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRule {
    /// Capabilities this rule applies to.
    pub capabilities: CapabilitySet,
    /// Fail-cause codes this rule applies to. Empty = any retryable cause.
    pub fail_causes: Vec<i32>,
    /// Interval ladder in milliseconds.
    pub intervals_ms: Vec<u64>,
    /// Attempts after which retrying stops.
    pub maximum_retries: u32,
}

impl RetryRule {
    pub fn parse(raw: &str) -> Result<RetryRule, RuleParseError> {
        let mut capabilities = None;
        let mut fail_causes = Vec::new();
        let mut intervals_ms = vec![5_000];
        let mut maximum_retries = 10;

        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| RuleParseError::BadValue {
                key: "rule",
                value: part.to_string(),
                detail: "expected key=value".to_string(),
            })?;
            match key.trim() {
                "capabilities" => {
                    capabilities = Some(CapabilitySet::parse_list(value).map_err(|e| {
                        RuleParseError::BadValue {
                            key: "capabilities",
                            value: value.to_string(),
                            detail: e.to_string(),
                        }
                    })?)
                }
                "fail_causes" => {
                    fail_causes = parse_numbers("fail_causes", value)?;
                }
                "retry_interval" => {
                    intervals_ms = parse_numbers("retry_interval", value)?;
                    if intervals_ms.is_empty() {
                        return Err(RuleParseError::BadValue {
                            key: "retry_interval",
                            value: value.to_string(),
                            detail: "at least one interval required".to_string(),
                        });
                    }
                }
                "maximum_retries" => {
                    maximum_retries =
                        value.trim().parse().map_err(|_| RuleParseError::BadValue {
                            key: "maximum_retries",
                            value: value.to_string(),
                            detail: "expected an integer".to_string(),
                        })?
                }
                other => {
                    return Err(RuleParseError::UnknownKey {
                        key: other.to_string(),
                        rule: raw.to_string(),
                    });
                }
            }
        }

        Ok(RetryRule {
            capabilities: capabilities.ok_or(RuleParseError::MissingKey {
                key: "capabilities",
                rule: raw.to_string(),
            })?,
            fail_causes,
            intervals_ms,
            maximum_retries,
        })
    }

    /// Whether this rule covers a failure of `cause` for `caps`.
    pub fn matches(&self, caps: CapabilitySet, cause: FailCause) -> bool {
        if !self.capabilities.intersects(caps.services()) {
            return false;
        }
        self.fail_causes.is_empty() || self.fail_causes.contains(&cause.code())
    }

    /// Delay before attempt `attempt` (0-based). `None` once the rule is
    /// exhausted. Attempts past the end of the ladder reuse its last
    /// interval.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.maximum_retries || self.intervals_ms.is_empty() {
            return None;
        }
        let idx = (attempt as usize).min(self.intervals_ms.len() - 1);
        Some(Duration::from_millis(self.intervals_ms[idx]))
    }
}

fn parse_numbers<T: std::str::FromStr>(
    key: &'static str,
    value: &str,
) -> Result<Vec<T>, RuleParseError> {
    value
        .split('|')
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| RuleParseError::BadValue {
                key,
                value: v.to_string(),
                detail: "expected an integer".to_string(),
            })
        })
        .collect()
}

/// Find the first configured rule covering (`caps`, `cause`). Permanent
/// causes never retry, regardless of rules.
pub fn find_retry_rule<'a>(
    rules: &'a [RetryRule],
    caps: CapabilitySet,
    cause: FailCause,
) -> Option<&'a RetryRule> {
    if cause.is_permanent() {
        return None;
    }
    rules.iter().find(|r| r.matches(caps, cause))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_common::Capability;

    fn caps(list: &str) -> CapabilitySet {
        CapabilitySet::parse_list(list).unwrap()
    }

    // ─── Parsing ────────────────────────────────────────────────────────

    #[test]
    fn parse_full_rule() {
        let rule = RetryRule::parse(
            "capabilities=internet|mms, fail_causes=8|27, retry_interval=2500|5000, maximum_retries=4",
        )
        .unwrap();
        assert_eq!(rule.capabilities, caps("internet|mms"));
        assert_eq!(rule.fail_causes, vec![8, 27]);
        assert_eq!(rule.intervals_ms, vec![2500, 5000]);
        assert_eq!(rule.maximum_retries, 4);
    }

    #[test]
    fn parse_defaults() {
        let rule = RetryRule::parse("capabilities=ims").unwrap();
        assert!(rule.fail_causes.is_empty());
        assert_eq!(rule.intervals_ms, vec![5_000]);
        assert_eq!(rule.maximum_retries, 10);
    }

    #[test]
    fn parse_requires_capabilities() {
        let err = RetryRule::parse("retry_interval=1000").unwrap_err();
        assert!(matches!(err, RuleParseError::MissingKey { key: "capabilities", .. }));
    }

    #[test]
    fn parse_rejects_garbage_interval() {
        assert!(RetryRule::parse("capabilities=internet, retry_interval=soon").is_err());
    }

    // ─── Ladder ─────────────────────────────────────────────────────────

    #[test]
    fn ladder_clamps_to_last_interval() {
        let rule = RetryRule::parse(
            "capabilities=internet, retry_interval=1000|2000|4000, maximum_retries=10",
        )
        .unwrap();
        assert_eq!(rule.delay_for_attempt(0), Some(Duration::from_millis(1000)));
        assert_eq!(rule.delay_for_attempt(1), Some(Duration::from_millis(2000)));
        assert_eq!(rule.delay_for_attempt(2), Some(Duration::from_millis(4000)));
        assert_eq!(rule.delay_for_attempt(7), Some(Duration::from_millis(4000)));
    }

    #[test]
    fn ladder_exhausts_at_maximum() {
        let rule =
            RetryRule::parse("capabilities=internet, retry_interval=1000, maximum_retries=2")
                .unwrap();
        assert!(rule.delay_for_attempt(1).is_some());
        assert_eq!(rule.delay_for_attempt(2), None);
    }

    // ─── Matching ───────────────────────────────────────────────────────

    #[test]
    fn cause_filter_applies() {
        let rule =
            RetryRule::parse("capabilities=internet, fail_causes=8, retry_interval=1000").unwrap();
        assert!(rule.matches(caps("internet|not_restricted"), FailCause::OperatorBarred));
        assert!(!rule.matches(caps("internet"), FailCause::Congestion));
    }

    #[test]
    fn permanent_causes_never_retry() {
        let rules =
            vec![RetryRule::parse("capabilities=internet, retry_interval=1000").unwrap()];
        assert!(find_retry_rule(&rules, caps("internet"), FailCause::NetworkFailure).is_some());
        assert!(find_retry_rule(&rules, caps("internet"), FailCause::StuckInTransientState)
            .is_none());
        assert!(find_retry_rule(&rules, caps("internet"), FailCause::OperatorBarred).is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            RetryRule::parse("capabilities=internet, retry_interval=1000, maximum_retries=1")
                .unwrap(),
            RetryRule::parse("capabilities=internet, retry_interval=9000, maximum_retries=9")
                .unwrap(),
        ];
        let hit =
            find_retry_rule(&rules, CapabilitySet::from(Capability::Internet), FailCause::Congestion)
                .unwrap();
        assert_eq!(hit.maximum_retries, 1);
    }
}
