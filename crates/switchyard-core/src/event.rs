//! Tagged event unions for the two actor mailboxes.
//!
//! Bearers receive [`BearerEvent`]s: commands from the manager, replies
//! from the data service, environment feedback, and synthesized deadline
//! events. The manager receives [`ManagerEvent`]s: consumer calls,
//! environment signals, bearer reports, retry firings, and queries.
//! Nothing else ever crosses an actor boundary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use switchyard_common::{
    BearerId, Capability, CapabilitySet, FailCause, LinkBandwidth, LinkProperties, LinkStatus,
    RadioTech, RequestId, SessionId, Transport,
};
use switchyard_policy::DisallowReason;

use crate::broker::HandleId;
use crate::request::NetRequest;
use crate::service::{HandoverFailureMode, SetupResult};

// ─── Bearer Mailbox ─────────────────────────────────────────────────────────

/// Everything a bearer can receive.
#[derive(Debug, Clone)]
pub enum BearerEvent {
    Command(BearerCommand),
    /// Session id reservation completed.
    SessionReserved { transport: Transport, session: SessionId },
    /// Setup finished on `transport`.
    SetupDone { transport: Transport, result: SetupResult },
    /// Deactivate finished on `transport`.
    DeactivateDone { transport: Transport },
    /// Unsolicited: the network dropped the session on `transport`.
    SessionLost { transport: Transport, session: SessionId },
    /// Environment feedback while connected.
    Env(BearerEnvUpdate),
    /// The graceful-teardown release condition was met (e.g. the
    /// external deregistration finished).
    GracefulReleaseSignal,
    /// Synthesized when the armed stuck deadline passes. Stale
    /// generations are dropped.
    StuckTimeout { generation: u64 },
    /// Synthesized when the graceful-teardown fallback deadline passes.
    GracefulTimeout { generation: u64 },
}

/// Commands from the manager.
#[derive(Debug, Clone)]
pub enum BearerCommand {
    /// Attach a capability-identical group of requests. All or none.
    Attach { requests: Vec<Arc<NetRequest>> },
    /// Detach one request; it is returned in a
    /// [`BearerReport::RequestDetached`].
    Detach { request: RequestId },
    /// Tear the bearer down. With `graceful` set and a matching
    /// capability attached, the bearer waits for the release signal or
    /// the fallback deadline first.
    Teardown { reason: TeardownReason, graceful: bool },
    /// Cancel any pending graceful wait and tear down immediately.
    TeardownNow { reason: TeardownReason },
    /// Move to the other transport.
    Handover { target: Transport },
}

/// Environment feedback routed to a live bearer.
#[derive(Debug, Clone)]
pub enum BearerEnvUpdate {
    Bandwidth(LinkBandwidth),
    TechChanged(RadioTech),
    CallState { active: bool, concurrent_ok: bool },
    Roaming(bool),
    Congested(bool),
    TemporarilyUnmetered(bool),
    LinkStatus(LinkStatus),
    /// Mid-life link change from the service. Socket-compatible deltas
    /// apply in place; incompatible ones force handle recreation.
    LinkChanged(LinkProperties),
    /// Policy granted an extra capability tag to this bearer.
    GrantCapability(Capability),
    /// Policy revoked a previously granted tag.
    RevokeCapability(Capability),
    /// Interfaces currently owned by live bearers, for collision checks.
    LiveInterfaces(HashSet<String>),
}

// ─── Bearer → Manager Reports ───────────────────────────────────────────────

/// Lifecycle and state reports a bearer posts to the manager. The only
/// channel through which the fleet learns anything about a bearer.
#[derive(Debug, Clone)]
pub enum BearerReport {
    /// Setup succeeded; the bearer is live and published.
    Connected {
        transport: Transport,
        capabilities: CapabilitySet,
        link: LinkProperties,
        handle: HandleId,
    },
    /// Terminal: the bearer never reached Connected.
    SetupFailed {
        cause: FailCause,
        retry_after: Option<Duration>,
        requests: Vec<Arc<NetRequest>>,
    },
    /// Terminal: the bearer was connected and is now gone.
    Disconnected { cause: FailCause, requests: Vec<Arc<NetRequest>> },
    /// The bearer now lives on `transport`.
    HandoverComplete { transport: Transport },
    /// The move failed; the bearer stays on its source transport.
    HandoverFailed {
        cause: FailCause,
        retry_after: Option<Duration>,
        mode: HandoverFailureMode,
    },
    CapabilitiesChanged { capabilities: CapabilitySet },
    SuspendedChanged { suspended: bool },
    /// The external handle was recreated (immutable capability or
    /// socket-incompatible link change).
    HandleRecreated { handle: HandleId },
    /// A detached request, returned to the manager.
    RequestDetached { request: Arc<NetRequest> },
}

// ─── Manager Mailbox ────────────────────────────────────────────────────────

/// Everything the manager can receive.
pub enum ManagerEvent {
    /// A consumer asks for connectivity.
    Submit(NetRequest),
    /// A consumer releases its request.
    Release(RequestId),
    /// An inward environment signal.
    Environment(EnvironmentEvent),
    /// The policy configuration was swapped.
    ConfigChanged,
    /// A bearer reported.
    Report { bearer: BearerId, report: BearerReport },
    /// A scheduled retry came due.
    RetryDue { profile: u32, transport: Transport, requests: Vec<RequestId> },
    /// The broker no longer wants a handle.
    Unwanted { handle: HandleId },
    /// Register an aggregate watcher.
    Watch(Sender<crate::manager::AggregateEvent>),
    /// Introspection: reply with a fleet snapshot.
    Snapshot(Sender<crate::manager::FleetSnapshot>),
    Shutdown,
}

/// Discrete inward environment signals, as delivered by the platform.
#[derive(Debug, Clone)]
pub enum EnvironmentEvent {
    Registration {
        transport: Transport,
        in_service: bool,
        roaming: bool,
        tech: RadioTech,
    },
    VoiceCapable { transport: Transport, capable: bool },
    ServiceBound { transport: Transport, bound: bool },
    SimReady(bool),
    CarrierConfigLoaded(bool),
    CallState { active: bool, concurrent_ok: bool },
    RadioPower { on: bool, carrier_allowed: bool },
    DataSetting { enabled: bool, roaming_enabled: bool },
    DefaultDataSelected(bool),
    EmergencyCallbackMode(bool),
    EmergencyOngoing(bool),
    NetworkRestricted(bool),
    /// Begin/end of a tear-down-all sweep.
    TearDownAll(bool),
    /// The externally preferred transport for a capability changed.
    PreferredTransport { capability: Capability, transport: Transport },
    /// Live bandwidth estimate for every bearer on a transport.
    Bandwidth { transport: Transport, bandwidth: LinkBandwidth },
    Congested { transport: Transport, congested: bool },
    TemporarilyUnmetered(bool),
    /// Policy granted or revoked a capability tag fleet-wide.
    CapabilityPolicy { capability: Capability, granted: bool },
    /// The graceful-release condition fired for a bearer.
    GracefulRelease { bearer: BearerId },
}

// ─── Teardown Reasons ───────────────────────────────────────────────────────

/// Why the manager ordered a teardown. Derived deterministically from
/// the first disallow reason of a failing evaluation, or from a fleet
/// decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Disallowed(DisallowReason),
    /// No attached request remains.
    NoLongerNeeded,
    /// Handover to the preferred transport is rule-disallowed; recreate
    /// there instead.
    HandoverNotAllowed,
    /// The handover failure mode demanded a teardown.
    HandoverFailure,
    /// The broker signalled the handle unwanted.
    Unwanted,
    /// Fleet shutdown.
    Shutdown,
}

impl TeardownReason {
    /// Map a failing evaluation to its teardown reason: always the first
    /// disallow reason, never a later one.
    pub fn from_disallow(reason: DisallowReason) -> TeardownReason {
        TeardownReason::Disallowed(reason)
    }
}

impl std::fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeardownReason::Disallowed(r) => write!(f, "disallowed:{r:?}"),
            other => write!(f, "{other:?}"),
        }
    }
}
