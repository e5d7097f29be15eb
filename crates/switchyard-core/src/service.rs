//! The transport data-service seam.
//!
//! A [`DataService`] performs the actual session I/O: setup, teardown,
//! and (where the transport wants one) session-id reservation. Every
//! call is asynchronous — the implementation does its work elsewhere and
//! posts the outcome back on the reply sender, which feeds the calling
//! bearer's own mailbox. Implemented by the production transport binding
//! and by [`crate::testing::MockDataService`] in tests.

use std::time::Duration;

use crossbeam_channel::Sender;

use switchyard_common::{
    BearerId, FailCause, LinkBandwidth, LinkProperties, RadioTech, SessionId, Transport,
};

use crate::event::BearerEvent;

/// Parameters for one setup call.
#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub bearer: BearerId,
    pub transport: Transport,
    pub profile_id: u32,
    pub profile_name: String,
    pub tech: RadioTech,
    /// Present during handover: the link state the target side should
    /// take over.
    pub existing_link: Option<LinkProperties>,
    /// A pre-reserved session id, when the transport required one.
    pub session: Option<SessionId>,
}

/// Successful setup outcome.
#[derive(Debug, Clone)]
pub struct SetupSuccess {
    pub session: SessionId,
    pub link: LinkProperties,
    /// Initial bandwidth estimate, when the service has one.
    pub bandwidth: Option<LinkBandwidth>,
}

/// Failed setup outcome.
#[derive(Debug, Clone)]
pub struct SetupFailure {
    pub cause: FailCause,
    /// Network-suggested retry delay, overriding the configured ladder.
    pub suggested_retry: Option<Duration>,
    /// Handover failure handling mode as reported by the service.
    /// Raw wire value; out-of-range values are reported as anomalies and
    /// fall back to the default mode.
    pub handover_failure_mode: i32,
}

pub type SetupResult = Result<SetupSuccess, SetupFailure>;

/// How a failed handover should be resolved, per the service's report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandoverFailureMode {
    /// Keep the bearer on its source transport (default).
    #[default]
    Stay,
    /// Keep the bearer and let the fleet retry the handover later.
    RetryHandover,
    /// The source side is unusable: tear down and set up fresh on the
    /// target.
    TeardownAndRetrySetup,
}

impl HandoverFailureMode {
    /// Decode the wire value. `None` means out of range — the caller
    /// reports an anomaly and proceeds with the default.
    pub fn from_wire(value: i32) -> Option<HandoverFailureMode> {
        match value {
            0 => Some(HandoverFailureMode::Stay),
            1 => Some(HandoverFailureMode::RetryHandover),
            2 => Some(HandoverFailureMode::TeardownAndRetrySetup),
            _ => None,
        }
    }
}

/// Asynchronous transport session I/O.
///
/// Replies are posted to the supplied sender; senders whose bearer has
/// already terminated are simply disconnected, and implementations must
/// tolerate failed sends.
pub trait DataService: Send + Sync {
    /// Whether setup on this transport needs a session id reserved ahead
    /// of the setup call.
    fn needs_session_reservation(&self, transport: Transport) -> bool {
        let _ = transport;
        false
    }

    /// Reserve a session id. Replies with
    /// [`BearerEvent::SessionReserved`].
    fn reserve_session(&self, transport: Transport, reply: Sender<BearerEvent>);

    /// Bring up a session. Replies with [`BearerEvent::SetupDone`].
    fn setup(&self, request: SetupRequest, reply: Sender<BearerEvent>);

    /// Take down a session. Replies with [`BearerEvent::DeactivateDone`].
    fn deactivate(&self, transport: Transport, session: SessionId, reply: Sender<BearerEvent>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handover_mode_decodes_known_range() {
        assert_eq!(HandoverFailureMode::from_wire(0), Some(HandoverFailureMode::Stay));
        assert_eq!(HandoverFailureMode::from_wire(1), Some(HandoverFailureMode::RetryHandover));
        assert_eq!(
            HandoverFailureMode::from_wire(2),
            Some(HandoverFailureMode::TeardownAndRetrySetup)
        );
    }

    #[test]
    fn handover_mode_rejects_out_of_range() {
        assert_eq!(HandoverFailureMode::from_wire(-1), None);
        assert_eq!(HandoverFailureMode::from_wire(3), None);
        assert_eq!(HandoverFailureMode::from_wire(255), None);
    }
}
