//! Handover policy — ordered allow/disallow rules keyed by transport
//! pair, capability set, and roaming state.
//!
//! Rules arrive from configuration as text of the form:
//!
//! ```text
//! source=cellular, target=wlan, type=disallowed, capabilities=ims|cbs, roaming=true
//! ```
//!
//! Parsing happens once, into [`HandoverRule`]; evaluation scans the
//! parsed list in configured order and the first full match wins. No
//! match means the move is allowed.

use switchyard_common::{Capability, CapabilitySet, Transport};

use crate::RuleParseError;
use crate::environment::EnvironmentSnapshot;

/// Whether a matching rule allows or forbids the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Allow,
    Disallow,
}

/// One parsed handover rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverRule {
    pub sources: Vec<Transport>,
    pub targets: Vec<Transport>,
    pub kind: RuleKind,
    /// Capabilities the rule applies to. Empty = any.
    pub capabilities: CapabilitySet,
    /// Rule only applies while the source transport is roaming.
    pub roaming_only: bool,
}

impl HandoverRule {
    /// Parse a single rule string. Keys may appear in any order;
    /// `source`, `target` and `type` are required.
    pub fn parse(raw: &str) -> Result<HandoverRule, RuleParseError> {
        let mut sources = None;
        let mut targets = None;
        let mut kind = None;
        let mut capabilities = CapabilitySet::EMPTY;
        let mut roaming_only = false;

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
                "source" => sources = Some(parse_transports("source", value)?),
                "target" => targets = Some(parse_transports("target", value)?),
                "type" => {
                    kind = Some(match value.trim() {
                        "allowed" => RuleKind::Allow,
                        "disallowed" => RuleKind::Disallow,
                        other => {
                            return Err(RuleParseError::BadValue {
                                key: "type",
                                value: other.to_string(),
                                detail: "expected allowed or disallowed".to_string(),
                            });
                        }
                    })
                }
                "capabilities" => {
                    capabilities =
                        CapabilitySet::parse_list(value).map_err(|e| RuleParseError::BadValue {
                            key: "capabilities",
                            value: value.to_string(),
                            detail: e.to_string(),
                        })?
                }
                "roaming" => {
                    roaming_only = value.trim().parse().map_err(|_| RuleParseError::BadValue {
                        key: "roaming",
                        value: value.to_string(),
                        detail: "expected true or false".to_string(),
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

        Ok(HandoverRule {
            sources: sources.ok_or(RuleParseError::MissingKey { key: "source", rule: raw.to_string() })?,
            targets: targets.ok_or(RuleParseError::MissingKey { key: "target", rule: raw.to_string() })?,
            kind: kind.ok_or(RuleParseError::MissingKey { key: "type", rule: raw.to_string() })?,
            capabilities,
            roaming_only,
        })
    }

    /// Whether this rule fully matches the proposed move.
    fn matches(
        &self,
        source: Transport,
        target: Transport,
        caps: CapabilitySet,
        roaming: bool,
    ) -> bool {
        if !self.sources.contains(&source) || !self.targets.contains(&target) {
            return false;
        }
        if !self.capabilities.is_empty() && !self.capabilities.intersects(caps) {
            return false;
        }
        if self.roaming_only && !roaming {
            return false;
        }
        true
    }
}

fn parse_transports(key: &'static str, value: &str) -> Result<Vec<Transport>, RuleParseError> {
    value
        .split('|')
        .map(|v| {
            v.parse::<Transport>().map_err(|e| RuleParseError::BadValue {
                key,
                value: v.to_string(),
                detail: e.to_string(),
            })
        })
        .collect()
}

/// What to do when a handover is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverFallback {
    /// Keep the bearer where it is and re-check later.
    Wait,
    /// Tear the bearer down so a fresh one can be set up on the target.
    Teardown,
}

/// Why a handover was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverBlocked {
    TargetOutOfService,
    VoiceUnsupportedOnTarget,
    RuleMatch,
}

/// Outcome of a handover policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverDecision {
    Allow,
    Disallow { reason: HandoverBlocked, fallback: HandoverFallback },
}

impl HandoverDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, HandoverDecision::Allow)
    }
}

/// Decide whether a bearer carrying `caps` may move from `source` to
/// `target`.
///
/// A target without packet service blocks the move but keeps the bearer
/// waiting; a rule-based disallow asks for teardown so a fresh setup can
/// happen on the preferred transport.
pub fn decide(
    source: Transport,
    target: Transport,
    caps: CapabilitySet,
    env: &EnvironmentSnapshot,
    rules: &[HandoverRule],
) -> HandoverDecision {
    if !env.transport(target).in_service {
        return HandoverDecision::Disallow {
            reason: HandoverBlocked::TargetOutOfService,
            fallback: HandoverFallback::Wait,
        };
    }
    if caps.contains(Capability::Ims) && !env.transport(target).voice_capable {
        return HandoverDecision::Disallow {
            reason: HandoverBlocked::VoiceUnsupportedOnTarget,
            fallback: HandoverFallback::Wait,
        };
    }

    let roaming = env.transport(source).roaming;
    for rule in rules {
        if rule.matches(source, target, caps, roaming) {
            return match rule.kind {
                RuleKind::Allow => HandoverDecision::Allow,
                RuleKind::Disallow => HandoverDecision::Disallow {
                    reason: HandoverBlocked::RuleMatch,
                    fallback: HandoverFallback::Teardown,
                },
            };
        }
    }

    HandoverDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(list: &str) -> CapabilitySet {
        CapabilitySet::parse_list(list).unwrap()
    }

    // ─── Parsing ────────────────────────────────────────────────────────

    #[test]
    fn parse_full_rule() {
        let rule = HandoverRule::parse(
            "source=cellular, target=wlan, type=disallowed, capabilities=ims|cbs, roaming=true",
        )
        .unwrap();
        assert_eq!(rule.sources, vec![Transport::Cellular]);
        assert_eq!(rule.targets, vec![Transport::Wlan]);
        assert_eq!(rule.kind, RuleKind::Disallow);
        assert_eq!(rule.capabilities, caps("ims|cbs"));
        assert!(rule.roaming_only);
    }

    #[test]
    fn parse_minimal_rule_wildcards_capabilities() {
        let rule =
            HandoverRule::parse("source=cellular|wlan, target=cellular|wlan, type=allowed").unwrap();
        assert!(rule.capabilities.is_empty());
        assert!(!rule.roaming_only);
        assert_eq!(rule.sources.len(), 2);
    }

    #[test]
    fn parse_rejects_missing_type() {
        let err = HandoverRule::parse("source=cellular, target=wlan").unwrap_err();
        assert!(matches!(err, RuleParseError::MissingKey { key: "type", .. }));
    }

    #[test]
    fn parse_rejects_unknown_key() {
        let err =
            HandoverRule::parse("source=cellular, target=wlan, type=allowed, color=red").unwrap_err();
        assert!(matches!(err, RuleParseError::UnknownKey { .. }));
    }

    #[test]
    fn parse_rejects_bad_transport() {
        let err = HandoverRule::parse("source=carrier_pigeon, target=wlan, type=allowed").unwrap_err();
        assert!(matches!(err, RuleParseError::BadValue { key: "source", .. }));
    }

    // ─── Decisions ──────────────────────────────────────────────────────

    #[test]
    fn no_rules_defaults_to_allow() {
        let env = EnvironmentSnapshot::permissive();
        let d = decide(Transport::Cellular, Transport::Wlan, caps("internet"), &env, &[]);
        assert!(d.is_allowed());
    }

    #[test]
    fn first_match_wins() {
        let env = EnvironmentSnapshot::permissive();
        let rules = vec![
            HandoverRule::parse("source=cellular, target=wlan, type=disallowed, capabilities=ims")
                .unwrap(),
            HandoverRule::parse("source=cellular, target=wlan, type=allowed").unwrap(),
        ];
        let d = decide(Transport::Cellular, Transport::Wlan, caps("ims"), &env, &rules);
        assert_eq!(
            d,
            HandoverDecision::Disallow {
                reason: HandoverBlocked::RuleMatch,
                fallback: HandoverFallback::Teardown,
            }
        );
        // A capability outside the first rule falls through to the second.
        let d = decide(Transport::Cellular, Transport::Wlan, caps("internet"), &env, &rules);
        assert!(d.is_allowed());
    }

    #[test]
    fn roaming_only_rule_needs_roaming() {
        let mut env = EnvironmentSnapshot::permissive();
        let rules = vec![HandoverRule::parse(
            "source=cellular, target=wlan, type=disallowed, roaming=true",
        )
        .unwrap()];
        assert!(decide(Transport::Cellular, Transport::Wlan, caps("internet"), &env, &rules)
            .is_allowed());
        env.cellular.roaming = true;
        assert!(!decide(Transport::Cellular, Transport::Wlan, caps("internet"), &env, &rules)
            .is_allowed());
    }

    #[test]
    fn target_out_of_service_waits() {
        let mut env = EnvironmentSnapshot::permissive();
        env.wlan.in_service = false;
        let d = decide(Transport::Cellular, Transport::Wlan, caps("internet"), &env, &[]);
        assert_eq!(
            d,
            HandoverDecision::Disallow {
                reason: HandoverBlocked::TargetOutOfService,
                fallback: HandoverFallback::Wait,
            }
        );
    }

    #[test]
    fn voice_bearer_blocked_when_target_has_no_voice() {
        let mut env = EnvironmentSnapshot::permissive();
        env.wlan.voice_capable = false;
        let d = decide(Transport::Cellular, Transport::Wlan, caps("ims"), &env, &[]);
        assert_eq!(
            d,
            HandoverDecision::Disallow {
                reason: HandoverBlocked::VoiceUnsupportedOnTarget,
                fallback: HandoverFallback::Wait,
            }
        );
        // Non-voice capabilities are unaffected.
        assert!(decide(Transport::Cellular, Transport::Wlan, caps("internet"), &env, &[])
            .is_allowed());
    }
}
