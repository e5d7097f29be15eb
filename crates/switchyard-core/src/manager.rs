//! The fleet manager.
//!
//! A single-threaded actor owning every request and every bearer. It
//! reacts to its event stream — submissions, environment signals, bearer
//! reports, retry firings — by grouping unsatisfied requests, attaching
//! them to bearers or creating new ones through the evaluation engine,
//! re-evaluating live bearers after every world change, checking each
//! bearer against its preferred transport, and publishing edge-triggered
//! fleet aggregates.
//!
//! One reconciliation runs at a time: the manager drains its queue
//! before each pass, so a burst of environment events costs one pass,
//! and reports arriving mid-pass queue a new trigger instead of
//! re-entering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::Serialize;
use tracing::{debug, info, warn};

use switchyard_common::{
    AccessProfile, BearerId, CapabilitySet, RadioTech, RequestId, Transport,
};
use switchyard_policy::{
    BearerFacts, CompiledPolicy, ConfigHandle, EnvironmentSnapshot, EvaluationReason,
    HandoverDecision, HandoverFallback, evaluate_bearer, evaluate_request, handover,
};
use switchyard_policy::evaluate::primary_capability;

use crate::anomaly::{AnomalyReporter, SharedReporter};
use crate::bearer::{Bearer, BearerDeps, BearerHandle, BearerSeed};
use crate::broker::{HandleId, NetworkBroker};
use crate::event::{
    BearerCommand, BearerEnvUpdate, BearerEvent, BearerReport, EnvironmentEvent, ManagerEvent,
    TeardownReason,
};
use crate::request::{NetRequest, RequestTable};
use crate::sched::{RetryRequest, RetryScheduler};
use crate::service::{DataService, HandoverFailureMode};

// ─── Aggregates ─────────────────────────────────────────────────────────────

/// Fleet-level internet availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InternetState {
    #[default]
    Disconnected,
    Connected,
    Suspended,
}

/// Fleet-level derived state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AggregateState {
    /// Any bearer exists, in any lifecycle state.
    pub any_bearer: bool,
    pub internet: InternetState,
}

/// Edge-triggered aggregate transitions, published to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateEvent {
    AnyBearer(bool),
    Internet(InternetState),
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

/// Introspection view of one request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub id: RequestId,
    pub capabilities: CapabilitySet,
    pub satisfied: bool,
    pub bearer: Option<BearerId>,
}

/// Introspection view of one bearer.
#[derive(Debug, Clone, Serialize)]
pub struct BearerSnapshot {
    pub id: BearerId,
    pub transport: Transport,
    pub capabilities: CapabilitySet,
    pub connected: bool,
    pub handover_in_flight: bool,
    pub suspended: bool,
    pub interface: Option<String>,
}

/// Introspection view of the whole fleet.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    pub requests: Vec<RequestSnapshot>,
    pub bearers: Vec<BearerSnapshot>,
    pub aggregates: AggregateState,
}

impl FleetSnapshot {
    /// Dump for diagnostics and bug reports.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

// ─── Manager ────────────────────────────────────────────────────────────────

/// Collaborators injected at construction.
pub struct ManagerDeps {
    pub service: Arc<dyn DataService>,
    pub broker: Arc<dyn NetworkBroker>,
    pub anomalies: SharedReporter,
    pub retry: Arc<dyn RetryScheduler>,
    pub config: Arc<ConfigHandle>,
}

/// The manager's book-keeping for one live bearer.
struct BearerEntry {
    handle: BearerHandle,
    profile: AccessProfile,
    transport: Transport,
    capabilities: CapabilitySet,
    setup_tech: RadioTech,
    connected: bool,
    handover_in_flight: bool,
    teardown_sent: bool,
    suspended: bool,
    interface: Option<String>,
    handle_id: Option<HandleId>,
}

/// The fleet actor. Run it on its own thread via
/// [`crate::runtime::SwitchyardRuntime`], or drive it directly in tests.
pub struct BearerManager {
    rx: Receiver<ManagerEvent>,
    self_tx: Sender<ManagerEvent>,
    deps: ManagerDeps,
    env: EnvironmentSnapshot,
    requests: RequestTable,
    bearers: BTreeMap<BearerId, BearerEntry>,
    /// Consecutive failure counts per (profile, transport).
    attempts: HashMap<(u32, Transport), u32>,
    /// (profile, transport) pairs with a retry timer armed.
    armed_retries: HashSet<(u32, Transport)>,
    /// Pairs that failed with no retry armed (permanent cause or
    /// exhausted ladder). Setups stay blocked until the world changes.
    parked: HashSet<(u32, Transport)>,
    aggregates: AggregateState,
    watchers: Vec<Sender<AggregateEvent>>,
    dirty: bool,
    reason: EvaluationReason,
}

impl BearerManager {
    pub fn new(
        rx: Receiver<ManagerEvent>,
        self_tx: Sender<ManagerEvent>,
        deps: ManagerDeps,
    ) -> BearerManager {
        BearerManager {
            rx,
            self_tx,
            deps,
            env: EnvironmentSnapshot::default(),
            requests: RequestTable::new(),
            bearers: BTreeMap::new(),
            attempts: HashMap::new(),
            armed_retries: HashSet::new(),
            parked: HashSet::new(),
            aggregates: AggregateState::default(),
            watchers: Vec::new(),
            dirty: false,
            reason: EvaluationReason::FleetCheck,
        }
    }

    /// The event loop. Coalesces queued triggers into one reconciliation
    /// pass per drain.
    pub fn run(mut self) {
        loop {
            let Ok(event) = self.rx.recv() else { break };
            if !self.process(event) {
                return;
            }
            loop {
                match self.rx.try_recv() {
                    Ok(event) => {
                        if !self.process(event) {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            if self.dirty {
                self.dirty = false;
                self.reconcile();
            }
        }
    }

    /// Handle one event. Returns false on shutdown.
    fn process(&mut self, event: ManagerEvent) -> bool {
        match event {
            ManagerEvent::Submit(request) => {
                let priority = request.priority();
                debug!(request = %request.id, caps = %request.capabilities, priority,
                       originator = %request.originator, "request submitted");
                if let Err(e) = self.requests.insert(Arc::new(request)) {
                    warn!(error = %e, "rejected duplicate request");
                } else {
                    self.mark_dirty(EvaluationReason::NewRequest);
                }
            }
            ManagerEvent::Release(id) => {
                if let Some(entry) = self.requests.remove(id) {
                    debug!(request = %id, "request released");
                    if let Some(bearer) = entry.bearer {
                        self.command_bearer(bearer, BearerCommand::Detach { request: id });
                    }
                    self.mark_dirty(EvaluationReason::FleetCheck);
                }
            }
            ManagerEvent::Environment(event) => {
                self.fold_environment(event);
                // A changed world may make parked setups viable again.
                self.parked.clear();
                self.mark_dirty(EvaluationReason::EnvironmentChanged);
            }
            ManagerEvent::ConfigChanged => {
                debug!("policy configuration swapped");
                self.parked.clear();
                self.mark_dirty(EvaluationReason::ConfigChanged);
            }
            ManagerEvent::Report { bearer, report } => self.on_report(bearer, report),
            ManagerEvent::RetryDue { profile, transport, .. } => {
                debug!(profile, transport = %transport, "retry due");
                self.armed_retries.remove(&(profile, transport));
                self.mark_dirty(EvaluationReason::Reattempt);
            }
            ManagerEvent::Unwanted { handle } => {
                let target = self
                    .bearers
                    .iter()
                    .find(|(_, e)| e.handle_id == Some(handle))
                    .map(|(id, _)| *id);
                if let Some(id) = target {
                    info!(bearer = %id, %handle, "broker signalled unwanted");
                    self.send_teardown(id, TeardownReason::Unwanted);
                    self.mark_dirty(EvaluationReason::FleetCheck);
                }
            }
            ManagerEvent::Watch(tx) => self.watchers.push(tx),
            ManagerEvent::Snapshot(tx) => {
                let _ = tx.send(self.snapshot());
            }
            ManagerEvent::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn mark_dirty(&mut self, reason: EvaluationReason) {
        self.dirty = true;
        self.reason = reason;
    }

    // ─── Environment Folding & Routing ──────────────────────────────────

    fn fold_environment(&mut self, event: EnvironmentEvent) {
        match event {
            EnvironmentEvent::Registration { transport, in_service, roaming, tech } => {
                let t = self.env.transport_mut(transport);
                t.in_service = in_service;
                t.roaming = roaming;
                t.tech = tech;
                self.route_transport(transport, BearerEnvUpdate::Roaming(roaming));
                self.route_transport(transport, BearerEnvUpdate::TechChanged(tech));
            }
            EnvironmentEvent::VoiceCapable { transport, capable } => {
                self.env.transport_mut(transport).voice_capable = capable;
            }
            EnvironmentEvent::ServiceBound { transport, bound } => {
                self.env.transport_mut(transport).service_bound = bound;
            }
            EnvironmentEvent::SimReady(ready) => self.env.sim_ready = ready,
            EnvironmentEvent::CarrierConfigLoaded(loaded) => self.env.config_loaded = loaded,
            EnvironmentEvent::CallState { active, concurrent_ok } => {
                self.env.call_active = active;
                self.env.concurrent_voice_data = concurrent_ok;
                self.route_all(BearerEnvUpdate::CallState { active, concurrent_ok });
            }
            EnvironmentEvent::RadioPower { on, carrier_allowed } => {
                self.env.radio_on = on;
                self.env.carrier_radio_allowed = carrier_allowed;
            }
            EnvironmentEvent::DataSetting { enabled, roaming_enabled } => {
                self.env.data_enabled = enabled;
                self.env.roaming_data_enabled = roaming_enabled;
            }
            EnvironmentEvent::DefaultDataSelected(selected) => {
                self.env.default_data_selected = selected;
            }
            EnvironmentEvent::EmergencyCallbackMode(on) => self.env.emergency_callback_mode = on,
            EnvironmentEvent::EmergencyOngoing(on) => self.env.emergency_ongoing = on,
            EnvironmentEvent::NetworkRestricted(on) => self.env.network_restricted = on,
            EnvironmentEvent::TearDownAll(pending) => self.env.pending_tear_down_all = pending,
            EnvironmentEvent::PreferredTransport { capability, transport } => {
                self.env.preferred_transports.insert(capability, transport);
            }
            EnvironmentEvent::Bandwidth { transport, bandwidth } => {
                self.route_transport(transport, BearerEnvUpdate::Bandwidth(bandwidth));
            }
            EnvironmentEvent::Congested { transport, congested } => {
                self.route_transport(transport, BearerEnvUpdate::Congested(congested));
            }
            EnvironmentEvent::TemporarilyUnmetered(unmetered) => {
                self.route_all(BearerEnvUpdate::TemporarilyUnmetered(unmetered));
            }
            EnvironmentEvent::CapabilityPolicy { capability, granted } => {
                let update = if granted {
                    BearerEnvUpdate::GrantCapability(capability)
                } else {
                    BearerEnvUpdate::RevokeCapability(capability)
                };
                self.route_all(update);
            }
            EnvironmentEvent::GracefulRelease { bearer } => {
                if let Some(entry) = self.bearers.get(&bearer) {
                    entry.handle.send(BearerEvent::GracefulReleaseSignal);
                }
            }
        }
    }

    fn route_all(&self, update: BearerEnvUpdate) {
        for entry in self.bearers.values() {
            entry.handle.send(BearerEvent::Env(update.clone()));
        }
    }

    fn route_transport(&self, transport: Transport, update: BearerEnvUpdate) {
        for entry in self.bearers.values() {
            if entry.transport == transport {
                entry.handle.send(BearerEvent::Env(update.clone()));
            }
        }
    }

    // ─── Bearer Reports ─────────────────────────────────────────────────

    fn on_report(&mut self, id: BearerId, report: BearerReport) {
        if !self.bearers.contains_key(&id) {
            // Terminal races can deliver trailing reports.
            debug!(bearer = %id, "report from departed bearer ignored");
            return;
        }
        match report {
            BearerReport::Connected { transport, capabilities, link, handle } => {
                let entry = self.bearers.get_mut(&id).expect("checked above");
                entry.connected = true;
                entry.transport = transport;
                entry.capabilities = capabilities;
                entry.interface = Some(link.interface.clone());
                entry.handle_id = Some(handle);
                self.attempts.remove(&(entry.profile.id, transport));
                self.broadcast_interfaces();
                self.mark_dirty(EvaluationReason::FleetCheck);
            }
            BearerReport::SetupFailed { cause, retry_after, requests } => {
                let mut entry = self.bearers.remove(&id).expect("checked above");
                entry.handle.join();
                info!(bearer = %id, cause = %cause, returned = requests.len(), "setup failed");
                for request in &requests {
                    self.requests.mark_unsatisfied(request.id);
                }
                let key = (entry.profile.id, entry.transport);
                let attempt = *self.attempts.get(&key).unwrap_or(&0);
                self.attempts.insert(key, attempt + 1);
                if !requests.is_empty() {
                    let capabilities = requests
                        .iter()
                        .fold(CapabilitySet::EMPTY, |acc, r| acc.union(r.capabilities));
                    let armed = self.deps.retry.schedule(RetryRequest {
                        profile: entry.profile.id,
                        transport: entry.transport,
                        requests: requests.iter().map(|r| r.id).collect(),
                        capabilities,
                        cause,
                        suggested_delay: retry_after,
                        attempt,
                    });
                    if armed {
                        self.armed_retries.insert(key);
                    } else {
                        self.parked.insert(key);
                    }
                }
                self.broadcast_interfaces();
                self.mark_dirty(EvaluationReason::FleetCheck);
            }
            BearerReport::Disconnected { cause, requests } => {
                let mut entry = self.bearers.remove(&id).expect("checked above");
                entry.handle.join();
                info!(bearer = %id, cause = %cause, returned = requests.len(), "bearer gone");
                for request in &requests {
                    self.requests.mark_unsatisfied(request.id);
                }
                self.broadcast_interfaces();
                self.mark_dirty(EvaluationReason::FleetCheck);
            }
            BearerReport::HandoverComplete { transport } => {
                let tech = self.env.transport(transport).tech;
                let entry = self.bearers.get_mut(&id).expect("checked above");
                entry.transport = transport;
                entry.handover_in_flight = false;
                entry.setup_tech = tech;
                self.mark_dirty(EvaluationReason::FleetCheck);
            }
            BearerReport::HandoverFailed { cause, retry_after: _, mode } => {
                let entry = self.bearers.get_mut(&id).expect("checked above");
                entry.handover_in_flight = false;
                info!(bearer = %id, cause = %cause, ?mode, "handover failed");
                if mode == HandoverFailureMode::TeardownAndRetrySetup {
                    self.send_teardown(id, TeardownReason::HandoverFailure);
                }
                self.mark_dirty(EvaluationReason::FleetCheck);
            }
            BearerReport::CapabilitiesChanged { capabilities } => {
                let entry = self.bearers.get_mut(&id).expect("checked above");
                entry.capabilities = capabilities;
                self.mark_dirty(EvaluationReason::FleetCheck);
            }
            BearerReport::SuspendedChanged { suspended } => {
                let entry = self.bearers.get_mut(&id).expect("checked above");
                entry.suspended = suspended;
                self.mark_dirty(EvaluationReason::FleetCheck);
            }
            BearerReport::HandleRecreated { handle } => {
                let entry = self.bearers.get_mut(&id).expect("checked above");
                entry.handle_id = Some(handle);
            }
            BearerReport::RequestDetached { request } => {
                self.requests.mark_unsatisfied(request.id);
                self.mark_dirty(EvaluationReason::FleetCheck);
            }
        }
    }

    // ─── Reconciliation ─────────────────────────────────────────────────

    fn reconcile(&mut self) {
        let compiled = self.deps.config.load();
        let snapshot = self.build_snapshot(&compiled);
        self.reevaluate_bearers(&compiled, &snapshot);
        self.check_transport_preference(&compiled, &snapshot);
        self.attach_pass(&compiled, &snapshot);
        self.publish_aggregates();
    }

    /// The environment snapshot for one pass: folded signals plus fleet
    /// facts the evaluator needs (arbitration, throttling).
    fn build_snapshot(&self, compiled: &CompiledPolicy) -> EnvironmentSnapshot {
        let mut snapshot = self.env.clone();
        snapshot.single_bearer_only =
            compiled.config.is_single_bearer_tech(self.env.cellular.tech);
        snapshot.retry_pending = self.armed_retries.clone();
        let mut throttled = self.parked.clone();
        for profile in &compiled.config.profiles {
            for transport in Transport::ALL {
                if self.armed_retries.contains(&(profile.id, transport))
                    || self.deps.retry.is_throttled(profile.id, transport)
                {
                    throttled.insert((profile.id, transport));
                }
            }
        }
        snapshot.throttled = throttled;
        snapshot
    }

    fn reevaluate_bearers(&mut self, compiled: &CompiledPolicy, snapshot: &EnvironmentSnapshot) {
        let ids: Vec<BearerId> = self.bearers.keys().copied().collect();
        for id in ids {
            let Some(entry) = self.bearers.get(&id) else { continue };
            if entry.teardown_sent {
                continue;
            }
            let served = self.requests.served_by(id);
            if served.is_empty() {
                debug!(bearer = %id, "no attached requests left");
                self.send_teardown(id, TeardownReason::NoLongerNeeded);
                continue;
            }
            let facts = BearerFacts {
                id,
                transport: entry.transport,
                capabilities: entry.capabilities,
                profile_id: entry.profile.id,
                setup_tech: entry.setup_tech,
                priority: self.bearer_priority(id),
                ever_connected: entry.connected,
            };
            let mut snap = snapshot.clone();
            snap.highest_competing_priority = self.competing_priority(Some(id));
            let eval = evaluate_bearer(&facts, &snap, &compiled.config, self.reason);
            if !eval.is_allowed() {
                let Some(disallow) = eval.primary_disallow() else {
                    debug_assert!(false, "disallowed evaluation without a reason");
                    self.deps.anomalies.report(crate::anomaly::Anomaly::InvariantViolation {
                        detail: "disallowed evaluation without a reason".to_string(),
                    });
                    continue;
                };
                info!(bearer = %id, reason = ?disallow, "bearer no longer allowed");
                self.send_teardown(id, TeardownReason::from_disallow(disallow));
            }
        }
    }

    /// Step the fleet towards each bearer's preferred transport.
    fn check_transport_preference(
        &mut self,
        compiled: &CompiledPolicy,
        snapshot: &EnvironmentSnapshot,
    ) {
        let ids: Vec<BearerId> = self.bearers.keys().copied().collect();
        for id in ids {
            let Some(entry) = self.bearers.get(&id) else { continue };
            if !entry.connected || entry.handover_in_flight || entry.teardown_sent {
                continue;
            }
            let preferred = self.preferred_transport_for(id, snapshot);
            if preferred == entry.transport {
                continue;
            }
            match handover::decide(
                entry.transport,
                preferred,
                entry.capabilities,
                snapshot,
                &compiled.handover_rules,
            ) {
                HandoverDecision::Allow => {
                    info!(bearer = %id, target = %preferred, "handover to preferred transport");
                    let entry = self.bearers.get_mut(&id).expect("present");
                    entry.handover_in_flight = true;
                    entry.handle.command(BearerCommand::Handover { target: preferred });
                }
                HandoverDecision::Disallow { reason, fallback: HandoverFallback::Teardown } => {
                    info!(bearer = %id, ?reason, "handover disallowed, recreating on target");
                    self.send_teardown(id, TeardownReason::HandoverNotAllowed);
                }
                HandoverDecision::Disallow { reason, fallback: HandoverFallback::Wait } => {
                    debug!(bearer = %id, ?reason, "handover blocked, waiting");
                }
            }
        }
    }

    /// Steps 1–3: group unsatisfied requests, attach or create.
    fn attach_pass(&mut self, compiled: &CompiledPolicy, snapshot: &EnvironmentSnapshot) {
        for (caps, group) in self.requests.unsatisfied_groups() {
            // All-or-none attach to a live bearer serving every request
            // in the group.
            let target = self.bearers.iter().find(|(_, e)| {
                !e.teardown_sent
                    && e.profile.can_satisfy(caps)
                    && group
                        .iter()
                        .all(|r| r.transport_pref.is_none() || r.transport_pref == Some(e.transport))
            });
            if let Some((&id, entry)) = target {
                debug!(bearer = %id, caps = %caps, count = group.len(), "attaching group");
                entry.handle.command(BearerCommand::Attach { requests: group.clone() });
                for request in &group {
                    self.requests.mark_satisfied(request.id, id);
                }
                continue;
            }

            let representative = switchyard_policy::RequestFacts {
                capabilities: caps,
                transport_pref: group[0].transport_pref,
                priority: group.iter().map(|r| r.priority()).max().unwrap_or(0),
            };
            let mut snap = snapshot.clone();
            snap.highest_competing_priority = self.competing_priority(None);
            let eval = evaluate_request(&representative, &snap, &compiled.config, self.reason);
            if !eval.is_allowed() {
                debug!(caps = %caps, reasons = ?eval.disallowed, "group not allowed");
                continue;
            }
            let Some(profile) = eval.candidate.clone() else {
                debug_assert!(false, "allowed evaluation without a candidate profile");
                self.deps.anomalies.report(crate::anomaly::Anomaly::InvariantViolation {
                    detail: "allowed evaluation without a candidate profile".to_string(),
                });
                continue;
            };
            let transport = representative
                .transport_pref
                .unwrap_or_else(|| snap.preferred_transport(primary_capability(caps)));
            self.create_bearer(profile, transport, group, compiled);
        }
    }

    fn create_bearer(
        &mut self,
        profile: AccessProfile,
        transport: Transport,
        group: Vec<Arc<NetRequest>>,
        compiled: &CompiledPolicy,
    ) {
        let id = BearerId::next();
        info!(bearer = %id, transport = %transport, profile = %profile.name,
              requests = group.len(), "creating bearer");
        let seed = BearerSeed {
            id,
            transport,
            profile: profile.clone(),
            tech: self.env.transport(transport).tech,
            requests: group.clone(),
            known_interfaces: self.live_interfaces(None),
            roaming: self.env.transport(transport).roaming,
        };
        let deps = BearerDeps {
            service: self.deps.service.clone(),
            broker: self.deps.broker.clone(),
            anomalies: self.deps.anomalies.clone(),
            manager: self.self_tx.clone(),
            policy: Arc::new(compiled.clone()),
        };
        let handle = Bearer::spawn(seed, deps);
        let setup_tech = self.env.transport(transport).tech;
        self.bearers.insert(
            id,
            BearerEntry {
                handle,
                capabilities: profile.capabilities,
                profile,
                transport,
                setup_tech,
                connected: false,
                handover_in_flight: false,
                teardown_sent: false,
                suspended: false,
                interface: None,
                handle_id: None,
            },
        );
        // Optimistic attach: satisfied immediately, pending confirmation.
        for request in &group {
            self.requests.mark_satisfied(request.id, id);
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    fn send_teardown(&mut self, id: BearerId, reason: TeardownReason) {
        let compiled = self.deps.config.load();
        let Some(entry) = self.bearers.get_mut(&id) else { return };
        if entry.teardown_sent {
            return;
        }
        entry.teardown_sent = true;
        let graceful = entry.capabilities.intersects(compiled.config.graceful_caps);
        entry.handle.command(BearerCommand::Teardown { reason, graceful });
    }

    fn command_bearer(&self, id: BearerId, command: BearerCommand) {
        if let Some(entry) = self.bearers.get(&id) {
            entry.handle.command(command);
        }
    }

    /// Where a bearer should live: a transport-pinned attached request
    /// wins, otherwise the external preference for its primary
    /// capability.
    fn preferred_transport_for(&self, id: BearerId, snapshot: &EnvironmentSnapshot) -> Transport {
        let pinned = self
            .requests
            .iter()
            .filter(|e| e.bearer == Some(id))
            .find_map(|e| e.request.transport_pref);
        if let Some(transport) = pinned {
            return transport;
        }
        let entry = &self.bearers[&id];
        snapshot.preferred_transport(primary_capability(entry.capabilities))
    }

    /// Highest priority among live bearers, excluding `exclude`.
    fn competing_priority(&self, exclude: Option<BearerId>) -> Option<u8> {
        self.bearers
            .keys()
            .filter(|id| Some(**id) != exclude)
            .map(|id| self.bearer_priority(*id))
            .max()
    }

    /// A bearer's priority: the highest among its attached requests.
    fn bearer_priority(&self, id: BearerId) -> u8 {
        self.requests
            .iter()
            .filter(|e| e.bearer == Some(id))
            .map(|e| e.request.priority())
            .max()
            .unwrap_or(0)
    }

    fn live_interfaces(&self, exclude: Option<BearerId>) -> HashSet<String> {
        self.bearers
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .filter_map(|(_, e)| e.interface.clone())
            .collect()
    }

    /// Refresh each bearer's view of the interfaces owned by the others.
    fn broadcast_interfaces(&self) {
        for (id, entry) in &self.bearers {
            entry
                .handle
                .send(BearerEvent::Env(BearerEnvUpdate::LiveInterfaces(
                    self.live_interfaces(Some(*id)),
                )));
        }
    }

    fn compute_aggregates(&self) -> AggregateState {
        let any_bearer = !self.bearers.is_empty();
        let internet_bearers: Vec<&BearerEntry> = self
            .bearers
            .values()
            .filter(|e| {
                e.connected
                    && e.capabilities.contains(switchyard_common::Capability::Internet)
            })
            .collect();
        let internet = if internet_bearers.is_empty() {
            InternetState::Disconnected
        } else if internet_bearers.iter().all(|e| e.suspended) {
            InternetState::Suspended
        } else {
            InternetState::Connected
        };
        AggregateState { any_bearer, internet }
    }

    /// Publish only actual transitions, never repeats.
    fn publish_aggregates(&mut self) {
        let next = self.compute_aggregates();
        if next.any_bearer != self.aggregates.any_bearer {
            info!(any_bearer = next.any_bearer, "fleet presence changed");
            let event = AggregateEvent::AnyBearer(next.any_bearer);
            self.watchers.retain(|tx| tx.send(event).is_ok());
        }
        if next.internet != self.aggregates.internet {
            info!(internet = ?next.internet, "internet state changed");
            let event = AggregateEvent::Internet(next.internet);
            self.watchers.retain(|tx| tx.send(event).is_ok());
        }
        self.aggregates = next;
    }

    fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            requests: self
                .requests
                .iter()
                .map(|e| RequestSnapshot {
                    id: e.request.id,
                    capabilities: e.request.capabilities,
                    satisfied: e.state == crate::request::RequestState::Satisfied,
                    bearer: e.bearer,
                })
                .collect(),
            bearers: self
                .bearers
                .iter()
                .map(|(id, e)| BearerSnapshot {
                    id: *id,
                    transport: e.transport,
                    capabilities: e.capabilities,
                    connected: e.connected,
                    handover_in_flight: e.handover_in_flight,
                    suspended: e.suspended,
                    interface: e.interface.clone(),
                })
                .collect(),
            aggregates: self.aggregates,
        }
    }

    fn shutdown(&mut self) {
        info!(bearers = self.bearers.len(), "fleet shutting down");
        for entry in self.bearers.values() {
            entry
                .handle
                .command(BearerCommand::TeardownNow { reason: TeardownReason::Shutdown });
        }
        for (_, mut entry) in std::mem::take(&mut self.bearers) {
            entry.handle.join();
        }
        self.watchers.clear();
    }
}
