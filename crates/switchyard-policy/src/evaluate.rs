//! The evaluation engine.
//!
//! `evaluate_request` and `evaluate_bearer` decide whether a consumer
//! request may be served, or an existing bearer may keep existing, under
//! the given environment snapshot and policy. The verdict collects every
//! applicable disallow reason in a fixed order; soft reasons can be
//! overridden by specific bypass allow reasons, hard reasons never can.
//! Both functions are pure — same inputs, same verdict.

use switchyard_common::{
    AccessProfile, BearerId, CapabilitySet, Capability, RadioTech, Transport,
};

use crate::config::PolicyConfig;
use crate::environment::EnvironmentSnapshot;

/// What triggered an evaluation. Recorded in the verdict for logging and
/// retry bookkeeping; does not change the decision logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationReason {
    NewRequest,
    Reattempt,
    EnvironmentChanged,
    ConfigChanged,
    PreferenceChanged,
    FleetCheck,
}

/// Why a request or bearer is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisallowReason {
    NotInService,
    SimNotReady,
    ConfigNotLoaded,
    CallActiveNoConcurrency,
    VoiceServiceUnsupported,
    DefaultDataNotSelected,
    RoamingDisabled,
    NetworkRestricted,
    PendingTearDownAll,
    RadioPoweredOff,
    RadioDisabledByCarrier,
    ServiceNotBound,
    EmergencyCallbackMode,
    SingleBearerArbitration,
    DataDisabled,
    NoSuitableProfile,
    ProfileNotPreferred,
    LingeringTechMismatch,
    Throttled,
    RetryScheduled,
}

impl DisallowReason {
    /// Hard reasons can never be overridden by a bypass. Soft reasons are
    /// user-policy switches that privileged or unmetered usage may cross.
    pub fn is_hard(&self) -> bool {
        !matches!(
            self,
            DisallowReason::RoamingDisabled
                | DisallowReason::DataDisabled
                | DisallowReason::NetworkRestricted
                | DisallowReason::ProfileNotPreferred
        )
    }
}

/// Why a request or bearer is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    /// Nothing stood in the way.
    Normal,
    /// Emergency capability bypasses soft policy switches.
    EmergencyRequest,
    /// A privileged (restricted) request bypasses soft policy switches.
    RestrictedRequest,
    /// Usage is provably unmetered, so metered-data switches do not apply.
    UnmeteredUsage,
    /// MMS is configured to be deliverable regardless of data switches.
    MmsAlwaysAllowed,
    /// SUPL is allowed while an emergency session is ongoing.
    SuplDuringEmergency,
}

/// The verdict: ordered disallow reasons, ordered allow reasons, and a
/// candidate profile when allowed.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub reason: EvaluationReason,
    pub disallowed: Vec<DisallowReason>,
    pub allowed: Vec<AllowReason>,
    pub candidate: Option<AccessProfile>,
}

impl Evaluation {
    pub fn is_allowed(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// The first disallow reason — authoritative for teardown-cause
    /// selection.
    pub fn primary_disallow(&self) -> Option<DisallowReason> {
        self.disallowed.first().copied()
    }
}

/// The evaluator's view of a consumer request.
#[derive(Debug, Clone, Copy)]
pub struct RequestFacts {
    pub capabilities: CapabilitySet,
    pub transport_pref: Option<Transport>,
    pub priority: u8,
}

impl RequestFacts {
    /// A privileged request deliberately omits the `not_restricted` tag.
    pub fn is_restricted(&self) -> bool {
        !self.capabilities.contains(Capability::NotRestricted)
    }
}

/// The evaluator's view of a live bearer.
#[derive(Debug, Clone)]
pub struct BearerFacts {
    pub id: BearerId,
    pub transport: Transport,
    pub capabilities: CapabilitySet,
    pub profile_id: u32,
    pub setup_tech: RadioTech,
    pub priority: u8,
    pub ever_connected: bool,
}

/// Evaluate whether a request may be served.
pub fn evaluate_request(
    req: &RequestFacts,
    env: &EnvironmentSnapshot,
    config: &PolicyConfig,
    reason: EvaluationReason,
) -> Evaluation {
    let caps = req.capabilities;
    let primary = primary_capability(caps);
    let transport = req
        .transport_pref
        .unwrap_or_else(|| env.preferred_transport(primary));

    let mut disallowed = Vec::new();
    collect_common_disallows(&mut disallowed, caps, transport, req.is_restricted(), req.priority, env);

    // Candidate profile: capability + technology + transport match.
    let tech = env.transport(transport).tech;
    let candidate = select_profile(&config.profiles, caps, tech, transport);
    match &candidate {
        None => disallowed.push(DisallowReason::NoSuitableProfile),
        Some(p) => {
            if config.require_preferred_profile
                && !p.preferred
                && caps.contains(Capability::Internet)
            {
                disallowed.push(DisallowReason::ProfileNotPreferred);
            }
            if env.throttled.contains(&(p.id, transport)) {
                disallowed.push(DisallowReason::Throttled);
            }
            if env.retry_pending.contains(&(p.id, transport)) {
                disallowed.push(DisallowReason::RetryScheduled);
            }
        }
    }

    finish(reason, disallowed, candidate, caps, transport, req.is_restricted(), env, config)
}

/// Evaluate whether an existing bearer may keep existing.
pub fn evaluate_bearer(
    bearer: &BearerFacts,
    env: &EnvironmentSnapshot,
    config: &PolicyConfig,
    reason: EvaluationReason,
) -> Evaluation {
    let caps = bearer.capabilities;
    let transport = bearer.transport;
    let restricted = !caps.contains(Capability::NotRestricted);

    let mut disallowed = Vec::new();
    collect_common_disallows(&mut disallowed, caps, transport, restricted, bearer.priority, env);

    // The bearer's own profile must still match capabilities and the
    // currently serving technology; a camp on a technology the profile
    // does not support is the lingering mismatch case.
    let tech = env.transport(transport).tech;
    let candidate = config.profiles.iter().find(|p| p.id == bearer.profile_id).cloned();
    match &candidate {
        None => disallowed.push(DisallowReason::NoSuitableProfile),
        Some(p) => {
            if !p.can_satisfy(caps) {
                disallowed.push(DisallowReason::NoSuitableProfile);
            } else if tech != RadioTech::Unknown
                && tech != bearer.setup_tech
                && !p.supports_tech(tech)
            {
                disallowed.push(DisallowReason::LingeringTechMismatch);
            }
        }
    }

    finish(reason, disallowed, candidate, caps, transport, restricted, env, config)
}

/// Checks shared by request and bearer evaluation, in fixed collection
/// order. The order never changes a verdict, only which reason comes
/// first — and the first is what teardown causes derive from.
fn collect_common_disallows(
    out: &mut Vec<DisallowReason>,
    caps: CapabilitySet,
    transport: Transport,
    restricted: bool,
    priority: u8,
    env: &EnvironmentSnapshot,
) {
    let t = env.transport(transport);

    if !t.in_service {
        out.push(DisallowReason::NotInService);
    }
    if transport == Transport::Cellular && !env.sim_ready {
        out.push(DisallowReason::SimNotReady);
    }
    if !env.config_loaded {
        out.push(DisallowReason::ConfigNotLoaded);
    }
    if transport == Transport::Cellular && env.call_active && !env.concurrent_voice_data {
        out.push(DisallowReason::CallActiveNoConcurrency);
    }
    if caps.contains(Capability::Ims) && !t.voice_capable {
        out.push(DisallowReason::VoiceServiceUnsupported);
    }
    if caps.contains(Capability::Internet) && !restricted && !env.default_data_selected {
        out.push(DisallowReason::DefaultDataNotSelected);
    }
    if t.roaming && !env.roaming_data_enabled {
        out.push(DisallowReason::RoamingDisabled);
    }
    if env.network_restricted && !caps.contains(Capability::Emergency) {
        out.push(DisallowReason::NetworkRestricted);
    }
    if env.pending_tear_down_all {
        out.push(DisallowReason::PendingTearDownAll);
    }
    if !env.radio_on {
        out.push(DisallowReason::RadioPoweredOff);
    }
    if !env.carrier_radio_allowed {
        out.push(DisallowReason::RadioDisabledByCarrier);
    }
    if !t.service_bound {
        out.push(DisallowReason::ServiceNotBound);
    }
    if env.emergency_callback_mode && !caps.contains(Capability::Emergency) {
        out.push(DisallowReason::EmergencyCallbackMode);
    }
    if env.single_bearer_only {
        if let Some(highest) = env.highest_competing_priority {
            if priority < highest {
                out.push(DisallowReason::SingleBearerArbitration);
            }
        }
    }
    if !env.data_enabled && !caps.contains(Capability::Emergency) {
        out.push(DisallowReason::DataDisabled);
    }
}

/// Close out a verdict: layer bypass allow reasons over soft-only
/// disallow sets and attach the candidate when allowed.
fn finish(
    reason: EvaluationReason,
    disallowed: Vec<DisallowReason>,
    candidate: Option<AccessProfile>,
    caps: CapabilitySet,
    transport: Transport,
    restricted: bool,
    env: &EnvironmentSnapshot,
    config: &PolicyConfig,
) -> Evaluation {
    let mut allowed = Vec::new();

    if disallowed.is_empty() {
        allowed.push(AllowReason::Normal);
    } else if disallowed.iter().all(|d| !d.is_hard()) {
        if caps.contains(Capability::Emergency) {
            allowed.push(AllowReason::EmergencyRequest);
        }
        if restricted {
            allowed.push(AllowReason::RestrictedRequest);
        }
        if is_unmetered(caps, transport, config) {
            allowed.push(AllowReason::UnmeteredUsage);
        }
        if caps.contains(Capability::Mms) && config.mms_always_allowed {
            allowed.push(AllowReason::MmsAlwaysAllowed);
        }
        if caps.contains(Capability::Supl) && env.emergency_ongoing {
            allowed.push(AllowReason::SuplDuringEmergency);
        }
    }

    let is_allowed = !allowed.is_empty();
    Evaluation {
        reason,
        disallowed,
        allowed,
        candidate: if is_allowed { candidate } else { None },
    }
}

/// Usage is provably unmetered when the transport itself is unmetered or
/// when none of the policy's metered capabilities appear in the set.
fn is_unmetered(caps: CapabilitySet, transport: Transport, config: &PolicyConfig) -> bool {
    transport == Transport::Wlan
        || !config.metered_caps(transport).intersects(caps.services())
}

/// The capability that names a request: the highest-priority service tag.
pub fn primary_capability(caps: CapabilitySet) -> Capability {
    caps.services()
        .iter()
        .max_by_key(|c| c.priority())
        .unwrap_or(Capability::Internet)
}

/// Pick the best profile for a capability set on a given technology and
/// transport: preferred profiles first, then lowest id for determinism.
fn select_profile(
    profiles: &[AccessProfile],
    caps: CapabilitySet,
    tech: RadioTech,
    transport: Transport,
) -> Option<AccessProfile> {
    profiles
        .iter()
        .filter(|p| p.can_satisfy(caps) && p.supports_tech(tech) && p.supports_transport(transport))
        .min_by_key(|p| (!p.preferred, p.id))
        .cloned()
}
