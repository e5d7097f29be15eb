//! Diagnostic anomaly reporting.
//!
//! Anomalies are operational events that are neither ordinary failures
//! nor crashes: a state machine stuck past its timeout, a malformed
//! response from the data service, an interface collision. They are
//! handed to a collaborator for counting/alerting and processing always
//! continues best-effort.

use std::sync::Arc;

use switchyard_common::BearerId;

/// One diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// A transient state exceeded its stuck timeout.
    StuckState { bearer: BearerId, state: &'static str },
    /// The data service returned something structurally wrong.
    MalformedResponse { bearer: BearerId, detail: String },
    /// Setup produced an interface already owned by a live bearer.
    InterfaceCollision { bearer: BearerId, interface: String },
    /// Handover failure mode outside the known range.
    InvalidHandoverFailureMode { bearer: BearerId, value: i32 },
    /// An operation reached an object in a state that should be
    /// impossible; no-op'd in release, but worth counting.
    InvariantViolation { detail: String },
}

/// Sink for diagnostic events.
pub trait AnomalyReporter: Send + Sync {
    fn report(&self, anomaly: Anomaly);
}

/// Default reporter: structured warn-level logging.
#[derive(Debug, Default)]
pub struct LogReporter;

impl AnomalyReporter for LogReporter {
    fn report(&self, anomaly: Anomaly) {
        match anomaly {
            Anomaly::StuckState { bearer, state } => {
                tracing::warn!(bearer = %bearer, state, "stuck-state timeout");
            }
            Anomaly::MalformedResponse { bearer, detail } => {
                tracing::warn!(bearer = %bearer, detail = %detail, "malformed service response");
            }
            Anomaly::InterfaceCollision { bearer, interface } => {
                tracing::warn!(bearer = %bearer, interface = %interface, "interface collision on setup");
            }
            Anomaly::InvalidHandoverFailureMode { bearer, value } => {
                tracing::warn!(bearer = %bearer, value, "handover failure mode out of range");
            }
            Anomaly::InvariantViolation { detail } => {
                tracing::warn!(detail = %detail, "invariant violation");
            }
        }
    }
}

/// Reporter handle shared across actors.
pub type SharedReporter = Arc<dyn AnomalyReporter>;
