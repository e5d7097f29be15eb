//! Pure policy layer for the Switchyard bearer manager.
//!
//! Everything in this crate is a function of its inputs: the evaluation
//! engine turns an environment snapshot plus a request or bearer view into
//! an ordered allow/disallow verdict; the handover evaluator scans a typed
//! rule list; retry rules map fail causes to interval ladders. Rule and
//! policy text is parsed exactly once into typed structures — evaluation
//! never touches strings.

pub mod config;
pub mod environment;
pub mod evaluate;
pub mod handover;
pub mod retry;

pub use config::{CompiledPolicy, ConfigError, ConfigHandle, PolicyConfig, TimeoutConfig};
pub use environment::{EnvironmentSnapshot, TransportEnv};
pub use evaluate::{
    AllowReason, BearerFacts, DisallowReason, Evaluation, EvaluationReason, RequestFacts,
    evaluate_bearer, evaluate_request,
};
pub use handover::{HandoverBlocked, HandoverDecision, HandoverFallback, HandoverRule, RuleKind};
pub use retry::{RetryRule, find_retry_rule};

/// Error produced when rule text does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("unknown key {key:?} in rule {rule:?}")]
    UnknownKey { key: String, rule: String },
    #[error("missing required key {key:?} in rule {rule:?}")]
    MissingKey { key: &'static str, rule: String },
    #[error("bad value {value:?} for key {key:?}: {detail}")]
    BadValue { key: &'static str, value: String, detail: String },
}
