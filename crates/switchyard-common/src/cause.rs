//! Structured failure taxonomy for bearer setup and teardown.
//!
//! Fail causes arrive from the data service as numeric codes; a handful of
//! synthetic causes are generated locally (stuck-state timeouts, interface
//! collisions, unwanted-by-broker teardowns). Permanent causes are never
//! handed to the retry scheduler.

use serde::{Deserialize, Serialize};

/// Why a bearer setup or an established bearer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailCause {
    /// No failure recorded.
    #[default]
    None,
    /// Code the taxonomy does not know; carries the raw wire value.
    Unknown(i32),
    RadioPowerOff,
    SignalLost,
    OperatorBarred,
    MissingApn,
    ServiceOptionNotSupported,
    InsufficientResources,
    NetworkFailure,
    ProtocolError,
    Congestion,
    EmergencyModeActive,
    /// Setup produced an interface already owned by a live bearer.
    InterfaceCollision,
    /// A transient state exceeded its stuck timeout. Never retried.
    StuckInTransientState,
    /// The external broker asked for the handle to go away.
    Unwanted,
}

impl FailCause {
    /// Decode a wire code from the data service. Codes outside the known
    /// table map to [`FailCause::Unknown`].
    pub fn from_code(code: i32) -> FailCause {
        match code {
            0 => FailCause::None,
            8 => FailCause::OperatorBarred,
            26 => FailCause::InsufficientResources,
            27 => FailCause::MissingApn,
            32 => FailCause::ServiceOptionNotSupported,
            38 => FailCause::NetworkFailure,
            111 => FailCause::ProtocolError,
            256 => FailCause::Congestion,
            other => FailCause::Unknown(other),
        }
    }

    /// The wire code for this cause. Synthetic local causes use the
    /// reserved negative range.
    pub fn code(&self) -> i32 {
        match self {
            FailCause::None => 0,
            FailCause::Unknown(code) => *code,
            FailCause::OperatorBarred => 8,
            FailCause::InsufficientResources => 26,
            FailCause::MissingApn => 27,
            FailCause::ServiceOptionNotSupported => 32,
            FailCause::NetworkFailure => 38,
            FailCause::ProtocolError => 111,
            FailCause::Congestion => 256,
            FailCause::RadioPowerOff => -1,
            FailCause::SignalLost => -2,
            FailCause::EmergencyModeActive => -3,
            FailCause::InterfaceCollision => -4,
            FailCause::StuckInTransientState => -5,
            FailCause::Unwanted => -6,
        }
    }

    /// Permanent causes must never be retried: the condition will not
    /// clear on its own, or retrying is explicitly forbidden.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FailCause::OperatorBarred
                | FailCause::MissingApn
                | FailCause::ServiceOptionNotSupported
                | FailCause::StuckInTransientState
                | FailCause::Unwanted
        )
    }
}

impl std::fmt::Display for FailCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailCause::Unknown(code) => write!(f, "unknown({code})"),
            other => write!(f, "{other:?}"),
        }
    }
}
