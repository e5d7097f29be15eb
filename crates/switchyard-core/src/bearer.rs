//! The per-bearer state machine.
//!
//! One bearer owns one data session over one transport and runs as a
//! single-threaded actor with its own mailbox:
//!
//! ```text
//!   Connecting ──▶ Connected ◀──▶ HandingOver
//!       │              │
//!       ▼              ▼
//!       Disconnected ◀── Disconnecting
//! ```
//!
//! Every transient state arms a stuck deadline so the machine never
//! hangs; expiry raises a diagnostic anomaly and forces a deterministic
//! exit. While a service call is in flight the bearer defers events it
//! cannot serve yet and replays them in arrival order once the wait
//! resolves; events that became meaningless (wrong transport, stale
//! deadline generation) are dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use quanta::Instant;
use tracing::{debug, info};

use switchyard_common::{
    AccessProfile, BearerId, Capability, CapabilitySet, FailCause, LinkBandwidth, LinkProperties,
    LinkStatus, RadioTech, SessionId, Transport,
};
use switchyard_policy::CompiledPolicy;

use crate::anomaly::{Anomaly, AnomalyReporter, SharedReporter};
use crate::broker::{HandleDescriptor, HandleId, NetworkBroker};
use crate::event::{
    BearerCommand, BearerEnvUpdate, BearerEvent, BearerReport, ManagerEvent, TeardownReason,
};
use crate::request::NetRequest;
use crate::service::{DataService, HandoverFailureMode, SetupRequest};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerState {
    Connecting,
    Connected,
    HandingOver,
    Disconnecting,
    Disconnected,
}

impl BearerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BearerState::Connecting => "connecting",
            BearerState::Connected => "connected",
            BearerState::HandingOver => "handing_over",
            BearerState::Disconnecting => "disconnecting",
            BearerState::Disconnected => "disconnected",
        }
    }

    /// Transient states carry a stuck deadline.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BearerState::Connecting | BearerState::HandingOver | BearerState::Disconnecting
        )
    }
}

/// Collaborators injected at construction.
pub struct BearerDeps {
    pub service: Arc<dyn DataService>,
    pub broker: Arc<dyn NetworkBroker>,
    pub anomalies: SharedReporter,
    pub manager: Sender<ManagerEvent>,
    pub policy: Arc<CompiledPolicy>,
}

/// Everything needed to start a bearer.
pub struct BearerSeed {
    pub id: BearerId,
    pub transport: Transport,
    pub profile: AccessProfile,
    pub tech: RadioTech,
    pub requests: Vec<Arc<NetRequest>>,
    /// Interfaces owned by other live bearers, for collision checks.
    pub known_interfaces: HashSet<String>,
    pub roaming: bool,
}

/// A spawned bearer: its mailbox sender plus the worker thread.
pub struct BearerHandle {
    pub id: BearerId,
    tx: Sender<BearerEvent>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BearerHandle {
    /// Post an event; false when the bearer has already terminated.
    pub fn send(&self, event: BearerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn command(&self, command: BearerCommand) -> bool {
        self.send(BearerEvent::Command(command))
    }

    /// Wait for the worker thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// A pending graceful teardown, waiting for its release signal.
#[derive(Debug, Clone, Copy)]
struct PendingTeardown {
    reason: TeardownReason,
    deadline: Instant,
    generation: u64,
}

/// The state machine itself. Mutated only from its own event loop.
pub struct Bearer {
    id: BearerId,
    state: BearerState,
    transport: Transport,
    target_transport: Option<Transport>,
    profile: AccessProfile,
    tech: RadioTech,
    requests: Vec<Arc<NetRequest>>,
    granted: CapabilitySet,
    revoked: CapabilitySet,
    capabilities: CapabilitySet,
    link: LinkProperties,
    bandwidth: LinkBandwidth,
    link_status: LinkStatus,
    suspended: bool,
    roaming: bool,
    congested: bool,
    temp_unmetered: bool,
    call_active: bool,
    concurrent_ok: bool,
    fail_cause: FailCause,
    retry_after: Option<Duration>,
    sessions: HashMap<Transport, SessionId>,
    ever_connected: bool,
    handle: Option<HandleId>,
    known_interfaces: HashSet<String>,
    deferred: VecDeque<BearerEvent>,
    waiting_on_service: bool,
    stuck_deadline: Option<Instant>,
    stuck_generation: u64,
    pending_teardown: Option<PendingTeardown>,
    graceful_generation: u64,
    /// Teardown requested while still Connecting; resolved when the
    /// in-flight setup completes.
    abort_reason: Option<TeardownReason>,
    deps: BearerDeps,
    self_tx: Sender<BearerEvent>,
}

impl Bearer {
    /// Spawn the bearer on its own worker thread, in Connecting.
    pub fn spawn(seed: BearerSeed, deps: BearerDeps) -> BearerHandle {
        let (tx, rx) = bounded(256);
        let id = seed.id;
        let mut bearer = Bearer::new(seed, deps, tx.clone());
        let thread = thread::Builder::new()
            .name(format!("{id}"))
            .spawn(move || {
                bearer.start();
                bearer.run(rx);
            })
            .expect("failed to spawn bearer worker");
        BearerHandle { id, tx, thread: Some(thread) }
    }

    pub(crate) fn new(seed: BearerSeed, deps: BearerDeps, self_tx: Sender<BearerEvent>) -> Bearer {
        let mut requests = seed.requests;
        requests.sort_by_key(|r| std::cmp::Reverse(r.priority()));
        Bearer {
            id: seed.id,
            state: BearerState::Connecting,
            transport: seed.transport,
            target_transport: None,
            profile: seed.profile,
            tech: seed.tech,
            requests,
            granted: CapabilitySet::EMPTY,
            revoked: CapabilitySet::EMPTY,
            capabilities: CapabilitySet::EMPTY,
            link: LinkProperties::default(),
            bandwidth: LinkBandwidth::default(),
            link_status: LinkStatus::Unknown,
            suspended: false,
            roaming: seed.roaming,
            congested: false,
            temp_unmetered: false,
            call_active: false,
            concurrent_ok: true,
            fail_cause: FailCause::None,
            retry_after: None,
            sessions: HashMap::new(),
            ever_connected: false,
            handle: None,
            known_interfaces: seed.known_interfaces,
            deferred: VecDeque::new(),
            waiting_on_service: false,
            stuck_deadline: None,
            stuck_generation: 0,
            pending_teardown: None,
            graceful_generation: 0,
            abort_reason: None,
            deps,
            self_tx,
        }
    }

    pub(crate) fn state(&self) -> BearerState {
        self.state
    }

    pub(crate) fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub(crate) fn transport(&self) -> Transport {
        self.transport
    }

    pub(crate) fn handle_id(&self) -> Option<HandleId> {
        self.handle
    }

    // ─── Entry & Event Loop ─────────────────────────────────────────────

    /// Enter Connecting: arm the stuck deadline, reserve a session id if
    /// the transport wants one, then issue setup.
    pub(crate) fn start(&mut self) {
        info!(bearer = %self.id, transport = %self.transport, profile = %self.profile.name,
              requests = self.requests.len(), "setting up");
        self.capabilities = self.compute_capabilities();
        self.arm_stuck(self.deps.policy.config.timeouts.connecting_ms);
        if self.deps.service.needs_session_reservation(self.transport) {
            self.waiting_on_service = true;
            self.deps.service.reserve_session(self.transport, self.self_tx.clone());
        } else {
            self.issue_setup(self.transport, None);
        }
    }

    fn run(&mut self, rx: Receiver<BearerEvent>) {
        loop {
            self.drain_deferred();
            if self.state == BearerState::Disconnected {
                break;
            }
            match self.next_deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    let timeout =
                        if deadline > now { deadline.duration_since(now) } else { Duration::ZERO };
                    match rx.recv_timeout(timeout) {
                        Ok(event) => self.dispatch(event),
                        Err(RecvTimeoutError::Timeout) => self.on_deadline(),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(event) => self.dispatch(event),
                    Err(_) => break,
                },
            }
        }
        debug!(bearer = %self.id, "worker exiting");
    }

    /// Replay deferred events, in original order, while nothing is in
    /// flight. Stops as soon as a replayed event starts a new wait.
    pub(crate) fn drain_deferred(&mut self) -> usize {
        let mut replayed = 0;
        while !self.waiting_on_service && self.state != BearerState::Disconnected {
            let Some(event) = self.deferred.pop_front() else { break };
            self.dispatch(event);
            replayed += 1;
        }
        replayed
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.stuck_deadline.or(self.pending_teardown.as_ref().map(|p| p.deadline))
    }

    /// A deadline passed with no event: synthesize the matching timeout
    /// event so deadline handling flows through ordinary dispatch.
    fn on_deadline(&mut self) {
        let now = Instant::now();
        if self.stuck_deadline.is_some_and(|d| now >= d) {
            let generation = self.stuck_generation;
            self.dispatch(BearerEvent::StuckTimeout { generation });
        } else if let Some(p) = self.pending_teardown {
            if now >= p.deadline {
                self.dispatch(BearerEvent::GracefulTimeout { generation: p.generation });
            }
        }
    }

    pub(crate) fn dispatch(&mut self, event: BearerEvent) {
        if self.state == BearerState::Disconnected {
            // Terminal. Races can still deliver events; drop them.
            return;
        }
        match event {
            BearerEvent::Command(command) => self.on_command(command),
            BearerEvent::SessionReserved { transport, session } => {
                self.on_session_reserved(transport, session)
            }
            BearerEvent::SetupDone { transport, result } => self.on_setup_done(transport, result),
            BearerEvent::DeactivateDone { transport } => self.on_deactivate_done(transport),
            BearerEvent::SessionLost { transport, session } => {
                self.on_session_lost(transport, session)
            }
            BearerEvent::Env(update) => self.on_env(update),
            BearerEvent::GracefulReleaseSignal => self.on_graceful_release(),
            BearerEvent::StuckTimeout { generation } => self.on_stuck_timeout(generation),
            BearerEvent::GracefulTimeout { generation } => self.on_graceful_timeout(generation),
        }
    }

    // ─── Commands ───────────────────────────────────────────────────────

    fn on_command(&mut self, command: BearerCommand) {
        match command {
            BearerCommand::Attach { requests } => self.on_attach(requests),
            BearerCommand::Detach { request } => self.on_detach(request),
            BearerCommand::Teardown { reason, graceful } => self.on_teardown(reason, graceful),
            BearerCommand::TeardownNow { reason } => self.on_teardown_now(reason),
            BearerCommand::Handover { target } => self.on_handover(target),
        }
    }

    fn on_attach(&mut self, incoming: Vec<Arc<NetRequest>>) {
        match self.state {
            BearerState::Connecting | BearerState::Connected => {
                for request in incoming {
                    if self.requests.iter().any(|r| r.id == request.id) {
                        continue;
                    }
                    let priority = request.priority();
                    let pos = self
                        .requests
                        .iter()
                        .position(|r| r.priority() < priority)
                        .unwrap_or(self.requests.len());
                    self.requests.insert(pos, request);
                }
                self.refresh_capabilities();
            }
            BearerState::HandingOver => {
                self.deferred.push_back(BearerEvent::Command(BearerCommand::Attach {
                    requests: incoming,
                }));
            }
            BearerState::Disconnecting | BearerState::Disconnected => {
                // Can no longer serve them; hand them straight back.
                for request in incoming {
                    self.report(BearerReport::RequestDetached { request });
                }
            }
        }
    }

    fn on_detach(&mut self, id: switchyard_common::RequestId) {
        if self.state == BearerState::HandingOver {
            self.deferred
                .push_back(BearerEvent::Command(BearerCommand::Detach { request: id }));
            return;
        }
        if let Some(pos) = self.requests.iter().position(|r| r.id == id) {
            let request = self.requests.remove(pos);
            self.report(BearerReport::RequestDetached { request });
            self.refresh_capabilities();
        }
    }

    fn on_teardown(&mut self, reason: TeardownReason, graceful: bool) {
        match self.state {
            BearerState::Connecting => {
                // Resolved once the in-flight setup completes.
                if self.abort_reason.is_none() {
                    self.abort_reason = Some(reason);
                }
            }
            BearerState::Connected => {
                if self.pending_teardown.is_some() {
                    return; // already in flight
                }
                let wants_wait = graceful
                    && self
                        .capabilities
                        .intersects(self.deps.policy.config.graceful_caps);
                if wants_wait {
                    self.graceful_generation += 1;
                    let ms = self.deps.policy.config.timeouts.graceful_teardown_ms;
                    self.pending_teardown = Some(PendingTeardown {
                        reason,
                        deadline: Instant::now() + Duration::from_millis(ms),
                        generation: self.graceful_generation,
                    });
                    debug!(bearer = %self.id, %reason, "teardown deferred for graceful release");
                } else {
                    self.begin_disconnect(reason);
                }
            }
            BearerState::HandingOver => {
                self.deferred.push_back(BearerEvent::Command(BearerCommand::Teardown {
                    reason,
                    graceful,
                }));
            }
            BearerState::Disconnecting | BearerState::Disconnected => {}
        }
    }

    fn on_teardown_now(&mut self, reason: TeardownReason) {
        match self.state {
            BearerState::Connecting => {
                if self.abort_reason.is_none() {
                    self.abort_reason = Some(reason);
                }
            }
            BearerState::Connected => {
                // Cancels any pending graceful wait.
                self.pending_teardown = None;
                self.begin_disconnect(reason);
            }
            BearerState::HandingOver => {
                self.deferred
                    .push_back(BearerEvent::Command(BearerCommand::TeardownNow { reason }));
            }
            BearerState::Disconnecting | BearerState::Disconnected => {}
        }
    }

    fn on_handover(&mut self, target: Transport) {
        match self.state {
            BearerState::Connected => {
                if target == self.transport || self.pending_teardown.is_some() {
                    return;
                }
                info!(bearer = %self.id, source = %self.transport, target = %target, "handover start");
                self.state = BearerState::HandingOver;
                self.target_transport = Some(target);
                self.arm_stuck(self.deps.policy.config.timeouts.handover_ms);
                if self.deps.service.needs_session_reservation(target) {
                    self.waiting_on_service = true;
                    self.deps.service.reserve_session(target, self.self_tx.clone());
                } else {
                    self.issue_setup(target, Some(self.link.clone()));
                }
            }
            BearerState::Connecting => {
                self.deferred
                    .push_back(BearerEvent::Command(BearerCommand::Handover { target }));
            }
            // Already moving, or going away: nothing sensible to do.
            _ => {}
        }
    }

    // ─── Service Replies ────────────────────────────────────────────────

    fn on_session_reserved(&mut self, transport: Transport, session: SessionId) {
        let expected = match self.state {
            BearerState::Connecting => self.transport,
            BearerState::HandingOver => self.target_transport.unwrap_or(self.transport),
            _ => return, // stale
        };
        if transport != expected {
            return; // stale reservation for a transport we left behind
        }
        self.sessions.insert(transport, session);
        if self.state == BearerState::Connecting && self.abort_reason.is_some() {
            // Aborted before setup was even issued.
            self.waiting_on_service = false;
            self.enter_disconnected(FailCause::Unwanted);
            return;
        }
        let existing = if self.state == BearerState::HandingOver {
            Some(self.link.clone())
        } else {
            None
        };
        self.issue_setup(transport, existing);
    }

    fn issue_setup(&mut self, transport: Transport, existing_link: Option<LinkProperties>) {
        self.waiting_on_service = true;
        let request = SetupRequest {
            bearer: self.id,
            transport,
            profile_id: self.profile.id,
            profile_name: self.profile.name.clone(),
            tech: self.tech,
            existing_link,
            session: self.sessions.get(&transport).copied(),
        };
        self.deps.service.setup(request, self.self_tx.clone());
    }

    fn on_setup_done(&mut self, transport: Transport, result: crate::service::SetupResult) {
        match self.state {
            BearerState::Connecting if transport == self.transport => {
                self.waiting_on_service = false;
                self.finish_initial_setup(result);
            }
            BearerState::HandingOver if Some(transport) == self.target_transport => {
                self.waiting_on_service = false;
                self.finish_handover_setup(transport, result);
            }
            BearerState::Connected => {
                // A setup that resolved after we stopped waiting for it
                // (e.g. handover stuck-timeout already returned us here).
                // Release the session so nothing leaks.
                if let Ok(success) = result {
                    self.deps
                        .service
                        .deactivate(transport, success.session, self.self_tx.clone());
                }
            }
            _ => {} // stale
        }
    }

    fn finish_initial_setup(&mut self, result: crate::service::SetupResult) {
        match result {
            Ok(success) => {
                self.validate_link(&success.link);
                self.sessions.insert(self.transport, success.session);

                let collision = !success.link.interface.is_empty()
                    && self.known_interfaces.contains(&success.link.interface);
                if collision {
                    self.deps.anomalies.report(Anomaly::InterfaceCollision {
                        bearer: self.id,
                        interface: success.link.interface.clone(),
                    });
                    self.enter_disconnected(FailCause::InterfaceCollision);
                    return;
                }
                if self.abort_reason.is_some() || self.requests.is_empty() {
                    // Nobody wants the result any more.
                    self.enter_disconnected(FailCause::Unwanted);
                    return;
                }

                self.clear_stuck();
                self.merge_setup(success);
                self.ever_connected = true;
                self.state = BearerState::Connected;
                self.register_handle();
                info!(bearer = %self.id, transport = %self.transport,
                      interface = %self.link.interface, "connected");
                self.report(BearerReport::Connected {
                    transport: self.transport,
                    capabilities: self.capabilities,
                    link: self.link.clone(),
                    handle: self.handle.expect("handle registered on connect"),
                });
            }
            Err(failure) => {
                self.sessions.remove(&self.transport);
                self.retry_after = failure.suggested_retry;
                info!(bearer = %self.id, cause = %failure.cause, "setup failed");
                self.enter_disconnected(failure.cause);
            }
        }
    }

    fn finish_handover_setup(&mut self, target: Transport, result: crate::service::SetupResult) {
        self.clear_stuck();
        match result {
            Ok(success) => {
                self.validate_link(&success.link);
                // Let go of the source side.
                if let Some(session) = self.sessions.remove(&self.transport) {
                    self.deps.service.deactivate(self.transport, session, self.self_tx.clone());
                }
                let source = self.transport;
                self.transport = target;
                self.target_transport = None;
                self.sessions.insert(target, success.session);
                self.merge_setup(success);
                self.state = BearerState::Connected;
                self.refresh_capabilities();
                if let Some(handle) = self.handle {
                    self.deps.broker.update_link(handle, &self.link);
                    self.deps.broker.update_bandwidth(handle, self.bandwidth);
                }
                info!(bearer = %self.id, source = %source, target = %target, "handover complete");
                self.report(BearerReport::HandoverComplete { transport: target });
            }
            Err(failure) => {
                let mode = match HandoverFailureMode::from_wire(failure.handover_failure_mode) {
                    Some(mode) => mode,
                    None => {
                        self.deps.anomalies.report(Anomaly::InvalidHandoverFailureMode {
                            bearer: self.id,
                            value: failure.handover_failure_mode,
                        });
                        HandoverFailureMode::default()
                    }
                };
                self.target_transport = None;
                self.state = BearerState::Connected;
                info!(bearer = %self.id, cause = %failure.cause, ?mode, "handover failed");
                self.report(BearerReport::HandoverFailed {
                    cause: failure.cause,
                    retry_after: failure.suggested_retry,
                    mode,
                });
            }
        }
    }

    fn on_deactivate_done(&mut self, transport: Transport) {
        if self.state == BearerState::Disconnecting && transport == self.transport {
            self.waiting_on_service = false;
            self.sessions.remove(&transport);
            self.enter_disconnected(self.fail_cause);
        }
        // Deactivations of an abandoned side (handover source, stale
        // target) need no bookkeeping beyond what issued them.
    }

    fn on_session_lost(&mut self, transport: Transport, session: SessionId) {
        if self.sessions.get(&transport) != Some(&session) {
            return; // stale notification for a session already gone
        }
        match self.state {
            BearerState::Connected if transport == self.transport => {
                self.sessions.remove(&transport);
                info!(bearer = %self.id, "session lost by network");
                self.enter_disconnected(FailCause::SignalLost);
            }
            BearerState::Disconnecting if transport == self.transport => {
                // Unsolicited confirmation of the teardown in flight.
                self.waiting_on_service = false;
                self.sessions.remove(&transport);
                self.enter_disconnected(self.fail_cause);
            }
            BearerState::HandingOver => {
                // The source died mid-move; the setup on the target may
                // still succeed. Replay once the move resolves.
                self.deferred.push_back(BearerEvent::SessionLost { transport, session });
            }
            _ => {}
        }
    }

    // ─── Environment Feedback ───────────────────────────────────────────

    fn on_env(&mut self, update: BearerEnvUpdate) {
        match update {
            BearerEnvUpdate::Bandwidth(bandwidth) => {
                self.bandwidth = bandwidth;
                if let Some(handle) = self.connected_handle() {
                    self.deps.broker.update_bandwidth(handle, bandwidth);
                }
            }
            BearerEnvUpdate::TechChanged(tech) => {
                self.tech = tech;
            }
            BearerEnvUpdate::CallState { active, concurrent_ok } => {
                self.call_active = active;
                self.concurrent_ok = concurrent_ok;
                self.update_suspended();
            }
            BearerEnvUpdate::Roaming(roaming) => {
                self.roaming = roaming;
                self.refresh_capabilities();
            }
            BearerEnvUpdate::Congested(congested) => {
                self.congested = congested;
                self.refresh_capabilities();
            }
            BearerEnvUpdate::TemporarilyUnmetered(unmetered) => {
                self.temp_unmetered = unmetered;
                self.refresh_capabilities();
            }
            BearerEnvUpdate::LinkStatus(status) => {
                self.link_status = status;
                self.update_suspended();
            }
            BearerEnvUpdate::LinkChanged(link) => match self.state {
                BearerState::Connected => self.apply_link_change(link),
                BearerState::HandingOver => {
                    self.deferred.push_back(BearerEvent::Env(BearerEnvUpdate::LinkChanged(link)));
                }
                _ => {}
            },
            BearerEnvUpdate::GrantCapability(cap) => match self.state {
                BearerState::HandingOver => {
                    self.deferred
                        .push_back(BearerEvent::Env(BearerEnvUpdate::GrantCapability(cap)));
                }
                _ => {
                    self.granted.insert(cap);
                    self.revoked.remove(cap);
                    self.refresh_capabilities();
                }
            },
            BearerEnvUpdate::RevokeCapability(cap) => match self.state {
                BearerState::HandingOver => {
                    self.deferred
                        .push_back(BearerEvent::Env(BearerEnvUpdate::RevokeCapability(cap)));
                }
                _ => {
                    self.revoked.insert(cap);
                    self.granted.remove(cap);
                    self.refresh_capabilities();
                }
            },
            BearerEnvUpdate::LiveInterfaces(interfaces) => {
                self.known_interfaces = interfaces;
            }
        }
    }

    fn apply_link_change(&mut self, link: LinkProperties) {
        self.validate_link(&link);
        let compatible = LinkProperties::socket_compatible(&self.link, &link);
        self.link = link;
        if let Some(handle) = self.handle {
            if compatible {
                self.deps.broker.update_link(handle, &self.link);
            } else {
                debug!(bearer = %self.id, "link change breaks sockets, recreating handle");
                self.recreate_handle();
            }
        }
    }

    fn on_graceful_release(&mut self) {
        if self.state != BearerState::Connected {
            return;
        }
        if let Some(pending) = self.pending_teardown.take() {
            debug!(bearer = %self.id, "graceful release arrived, tearing down");
            self.begin_disconnect(pending.reason);
        }
    }

    // ─── Deadlines ──────────────────────────────────────────────────────

    fn on_stuck_timeout(&mut self, generation: u64) {
        if generation != self.stuck_generation || self.stuck_deadline.is_none() {
            return; // stale
        }
        self.stuck_deadline = None;
        self.waiting_on_service = false;
        self.deps.anomalies.report(Anomaly::StuckState {
            bearer: self.id,
            state: self.state.as_str(),
        });
        match self.state {
            BearerState::Connecting => {
                self.retry_after = None;
                self.enter_disconnected(FailCause::StuckInTransientState);
            }
            BearerState::HandingOver => {
                self.target_transport = None;
                self.state = BearerState::Connected;
                self.report(BearerReport::HandoverFailed {
                    cause: FailCause::StuckInTransientState,
                    retry_after: None,
                    mode: HandoverFailureMode::Stay,
                });
            }
            BearerState::Disconnecting => {
                self.enter_disconnected(FailCause::SignalLost);
            }
            _ => {}
        }
    }

    fn on_graceful_timeout(&mut self, generation: u64) {
        let Some(pending) = self.pending_teardown else { return };
        if pending.generation != generation || self.state != BearerState::Connected {
            return; // stale
        }
        debug!(bearer = %self.id, "graceful release window expired, forcing teardown");
        self.pending_teardown = None;
        self.begin_disconnect(pending.reason);
    }

    // ─── Transitions ────────────────────────────────────────────────────

    fn begin_disconnect(&mut self, reason: TeardownReason) {
        debug!(bearer = %self.id, %reason, "disconnecting");
        self.pending_teardown = None;
        self.state = BearerState::Disconnecting;
        self.arm_stuck(self.deps.policy.config.timeouts.disconnecting_ms);
        match self.sessions.get(&self.transport).copied() {
            Some(session) => {
                self.waiting_on_service = true;
                self.deps.service.deactivate(self.transport, session, self.self_tx.clone());
            }
            None => self.enter_disconnected(self.fail_cause),
        }
    }

    /// Terminal: detach everything, retire the handle, release sessions,
    /// and fire exactly one terminal report.
    fn enter_disconnected(&mut self, cause: FailCause) {
        self.clear_stuck();
        self.pending_teardown = None;
        self.waiting_on_service = false;
        self.state = BearerState::Disconnected;
        self.fail_cause = cause;
        if let Some(handle) = self.handle.take() {
            self.deps.broker.retire(handle);
        }
        for (transport, session) in self.sessions.drain() {
            // Fire-and-forget; replies land after terminal state and are
            // dropped.
            self.deps.service.deactivate(transport, session, self.self_tx.clone());
        }
        let requests = std::mem::take(&mut self.requests);
        info!(bearer = %self.id, cause = %cause, ever_connected = self.ever_connected,
              detached = requests.len(), "disconnected");
        if self.ever_connected {
            self.report(BearerReport::Disconnected { cause, requests });
        } else {
            self.report(BearerReport::SetupFailed {
                cause,
                retry_after: self.retry_after,
                requests,
            });
        }
    }

    // ─── Capabilities & Handle ──────────────────────────────────────────

    /// Recompute the full capability set from the profile, policy grants,
    /// and current conditions.
    fn compute_capabilities(&self) -> CapabilitySet {
        let mut caps = self
            .profile
            .capabilities
            .services()
            .union(self.granted)
            .difference(self.revoked);
        let metered = self.deps.policy.config.metered_caps(self.transport);
        if !metered.intersects(caps) {
            caps.insert(Capability::NotMetered);
        }
        if self.temp_unmetered {
            caps.insert(Capability::TemporarilyNotMetered);
        }
        if !self.congested {
            caps.insert(Capability::NotCongested);
        }
        if !self.suspended {
            caps.insert(Capability::NotSuspended);
        }
        if !self.roaming {
            caps.insert(Capability::NotRoaming);
        }
        let restricted = !self.requests.is_empty()
            && self.requests.iter().all(|r| !r.capabilities.contains(Capability::NotRestricted));
        if !restricted && !self.revoked.contains(Capability::NotRestricted) {
            caps.insert(Capability::NotRestricted);
        }
        caps
    }

    /// Apply a capability recomputation. Mutable (condition) tag deltas
    /// push in place; a service (immutable) tag delta retires and
    /// re-registers the external handle.
    fn refresh_capabilities(&mut self) {
        let new = self.compute_capabilities();
        if new == self.capabilities {
            return;
        }
        let immutable_changed = new.services() != self.capabilities.services();
        self.capabilities = new;
        if self.state != BearerState::Connected {
            return;
        }
        if immutable_changed {
            self.recreate_handle();
        } else if let Some(handle) = self.handle {
            self.deps.broker.update_capabilities(handle, self.capabilities);
        }
        self.report(BearerReport::CapabilitiesChanged { capabilities: self.capabilities });
    }

    fn update_suspended(&mut self) {
        let suspended = self.link_status == LinkStatus::Dormant
            || (self.transport == Transport::Cellular && self.call_active && !self.concurrent_ok);
        if suspended == self.suspended {
            return;
        }
        self.suspended = suspended;
        self.refresh_capabilities();
        if let Some(handle) = self.connected_handle() {
            self.deps.broker.update_score(handle, self.score());
            self.report(BearerReport::SuspendedChanged { suspended });
        }
    }

    fn score(&self) -> u8 {
        if self.suspended { 15 } else { 50 }
    }

    fn descriptor(&self) -> HandleDescriptor {
        HandleDescriptor {
            bearer: self.id,
            capabilities: self.capabilities,
            link: self.link.clone(),
            bandwidth: self.bandwidth,
            score: self.score(),
        }
    }

    fn register_handle(&mut self) {
        let handle = self.deps.broker.register(self.descriptor());
        self.handle = Some(handle);
    }

    /// Retire the current handle and publish a fresh one. Internal ids
    /// and attached requests are untouched.
    fn recreate_handle(&mut self) {
        if let Some(old) = self.handle.take() {
            self.deps.broker.retire(old);
        }
        self.register_handle();
        self.report(BearerReport::HandleRecreated {
            handle: self.handle.expect("handle registered"),
        });
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    fn merge_setup(&mut self, success: crate::service::SetupSuccess) {
        let mut link = success.link;
        if link.mtu == 0 {
            link.mtu = self.deps.policy.config.default_mtu;
        }
        self.link = link;
        self.bandwidth = success
            .bandwidth
            .unwrap_or_else(|| self.deps.policy.config.default_bandwidth.for_tech(self.tech));
        self.link_status = LinkStatus::Active;
    }

    fn validate_link(&self, link: &LinkProperties) {
        if !link.is_well_formed() {
            self.deps.anomalies.report(Anomaly::MalformedResponse {
                bearer: self.id,
                detail: format!(
                    "setup link missing interface or addresses: iface={:?}, {} addrs",
                    link.interface,
                    link.addresses.len()
                ),
            });
        }
    }

    fn connected_handle(&self) -> Option<HandleId> {
        if self.state == BearerState::Connected { self.handle } else { None }
    }

    fn arm_stuck(&mut self, ms: u64) {
        self.stuck_generation += 1;
        self.stuck_deadline = Some(Instant::now() + Duration::from_millis(ms));
    }

    fn clear_stuck(&mut self) {
        self.stuck_generation += 1;
        self.stuck_deadline = None;
    }

    fn report(&self, report: BearerReport) {
        let _ = self.deps.manager.send(ManagerEvent::Report { bearer: self.id, report });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use switchyard_common::RequestId;
    use switchyard_policy::{ConfigHandle, PolicyConfig};

    use crate::testing::{
        BrokerCall, MockDataService, RecordingBroker, RecordingReporter, ServiceCall,
        SetupBehavior,
    };

    /// A bearer driven synchronously: service replies land in the
    /// mailbox and `pump` feeds them back through `dispatch`.
    struct Harness {
        bearer: Bearer,
        rx: Receiver<BearerEvent>,
        manager_rx: Receiver<ManagerEvent>,
        service: Arc<MockDataService>,
        broker: Arc<RecordingBroker>,
        reporter: Arc<RecordingReporter>,
    }

    impl Harness {
        fn with_profile(profile_caps: &str, request_caps: &str) -> Harness {
            let service = Arc::new(MockDataService::new());
            let broker = Arc::new(RecordingBroker::new());
            let reporter = Arc::new(RecordingReporter::new());
            let (manager_tx, manager_rx) = unbounded();
            let (self_tx, rx) = unbounded();

            let mut config = PolicyConfig::default();
            config.profiles.push(AccessProfile {
                id: 99,
                name: "test".to_string(),
                capabilities: CapabilitySet::parse_list(profile_caps).unwrap(),
                allowed_techs: vec![],
                transport: None,
                preferred: false,
            });
            let policy = ConfigHandle::new(config).unwrap().load();

            let profile = policy.config.profiles.iter().find(|p| p.id == 99).unwrap().clone();
            let request = Arc::new(NetRequest::new(
                CapabilitySet::parse_list(request_caps).unwrap(),
                "test",
            ));
            let seed = BearerSeed {
                id: BearerId::next(),
                transport: Transport::Cellular,
                profile,
                tech: RadioTech::Lte,
                requests: vec![request],
                known_interfaces: HashSet::new(),
                roaming: false,
            };
            let deps = BearerDeps {
                service: service.clone(),
                broker: broker.clone(),
                anomalies: reporter.clone(),
                manager: manager_tx,
                policy,
            };
            let bearer = Bearer::new(seed, deps, self_tx);
            Harness { bearer, rx, manager_rx, service, broker, reporter }
        }

        fn new() -> Harness {
            Harness::with_profile("internet|supl", "internet")
        }

        /// Feed queued mailbox events and deferred replays until quiet.
        fn pump(&mut self) {
            loop {
                let mut progressed = self.bearer.drain_deferred() > 0;
                while let Ok(event) = self.rx.try_recv() {
                    self.bearer.dispatch(event);
                    progressed = true;
                }
                if !progressed {
                    break;
                }
            }
        }

        fn start(&mut self) {
            self.bearer.start();
            self.pump();
        }

        fn command(&mut self, command: BearerCommand) {
            self.bearer.dispatch(BearerEvent::Command(command));
            self.pump();
        }

        fn env(&mut self, update: BearerEnvUpdate) {
            self.bearer.dispatch(BearerEvent::Env(update));
            self.pump();
        }

        fn fire_stuck(&mut self) {
            let generation = self.bearer.stuck_generation;
            self.bearer.dispatch(BearerEvent::StuckTimeout { generation });
            self.pump();
        }

        fn reports(&self) -> Vec<BearerReport> {
            let mut out = Vec::new();
            while let Ok(ManagerEvent::Report { report, .. }) = self.manager_rx.try_recv() {
                out.push(report);
            }
            out
        }
    }

    fn teardown() -> BearerCommand {
        BearerCommand::Teardown { reason: TeardownReason::NoLongerNeeded, graceful: false }
    }

    // ─── Connecting ─────────────────────────────────────────────────────

    #[test]
    fn connect_success_reports_connected() {
        let mut h = Harness::new();
        h.start();
        assert_eq!(h.bearer.state(), BearerState::Connected);
        assert!(h.bearer.capabilities().contains(Capability::Internet));
        assert_eq!(h.broker.register_count(), 1);
        let reports = h.reports();
        assert!(matches!(reports.as_slice(), [BearerReport::Connected { .. }]));
    }

    #[test]
    fn setup_failure_returns_requests() {
        let mut h = Harness::new();
        h.service.enqueue(SetupBehavior::Fail {
            cause: FailCause::Congestion,
            retry_after: Some(Duration::from_secs(7)),
            handover_mode: 0,
        });
        h.start();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        let reports = h.reports();
        match reports.as_slice() {
            [BearerReport::SetupFailed { cause, retry_after, requests }] => {
                assert_eq!(*cause, FailCause::Congestion);
                assert_eq!(*retry_after, Some(Duration::from_secs(7)));
                assert_eq!(requests.len(), 1, "attached requests come back");
            }
            other => panic!("expected SetupFailed, got {other:?}"),
        }
        assert_eq!(h.broker.register_count(), 0, "never published");
    }

    #[test]
    fn stuck_connecting_is_a_no_retry_failure() {
        let mut h = Harness::new();
        h.service.enqueue(SetupBehavior::Hold);
        h.start();
        assert_eq!(h.bearer.state(), BearerState::Connecting);
        h.fire_stuck();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        match h.reports().as_slice() {
            [BearerReport::SetupFailed { cause, retry_after, .. }] => {
                assert_eq!(*cause, FailCause::StuckInTransientState);
                assert_eq!(*retry_after, None);
            }
            other => panic!("expected SetupFailed, got {other:?}"),
        }
        assert_eq!(
            h.reporter
                .recorded()
                .iter()
                .filter(|a| matches!(a, Anomaly::StuckState { .. }))
                .count(),
            1,
            "exactly one stuck anomaly"
        );
    }

    #[test]
    fn stale_stuck_timeout_is_dropped() {
        let mut h = Harness::new();
        h.start();
        assert_eq!(h.bearer.state(), BearerState::Connected);
        h.bearer.dispatch(BearerEvent::StuckTimeout { generation: 0 });
        h.pump();
        assert_eq!(h.bearer.state(), BearerState::Connected, "stale generation ignored");
        assert_eq!(h.reporter.count(), 0);
    }

    #[test]
    fn interface_collision_fails_without_connecting() {
        let mut h = Harness::new();
        h.bearer.known_interfaces.insert("net77".to_string());
        h.service.enqueue(SetupBehavior::Succeed { interface: Some("net77".to_string()) });
        h.start();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        assert!(!h.bearer.ever_connected);
        match h.reports().as_slice() {
            [BearerReport::SetupFailed { cause, .. }] => {
                assert_eq!(*cause, FailCause::InterfaceCollision);
            }
            other => panic!("expected SetupFailed, got {other:?}"),
        }
        assert!(h
            .reporter
            .recorded()
            .iter()
            .any(|a| matches!(a, Anomaly::InterfaceCollision { .. })));
        // The granted session was released.
        assert!(h
            .service
            .recorded()
            .iter()
            .any(|c| matches!(c, ServiceCall::Deactivate(Transport::Cellular, _))));
    }

    #[test]
    fn teardown_while_connecting_aborts_on_completion() {
        let mut h = Harness::new();
        h.service.enqueue(SetupBehavior::Hold);
        h.start();
        h.command(teardown());
        assert_eq!(h.bearer.state(), BearerState::Connecting, "abort waits for the reply");
        h.service.complete_held(Ok(crate::service::SetupSuccess {
            session: SessionId(9),
            link: LinkProperties {
                interface: "net9".into(),
                addresses: vec!["10.9.0.1".parse().unwrap()],
                dns_servers: vec![],
                gateways: vec![],
                mtu: 0,
            },
            bandwidth: None,
        }));
        h.pump();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        assert!(matches!(
            h.reports().as_slice(),
            [BearerReport::SetupFailed { cause: FailCause::Unwanted, .. }]
        ));
    }

    #[test]
    fn detach_of_last_request_abandons_setup_result() {
        let mut h = Harness::new();
        h.service.enqueue(SetupBehavior::Hold);
        h.start();
        let id = h.bearer.requests[0].id;
        h.command(BearerCommand::Detach { request: id });
        h.service.complete_held(Ok(crate::service::SetupSuccess {
            session: SessionId(3),
            link: LinkProperties {
                interface: "net3".into(),
                addresses: vec!["10.3.0.1".parse().unwrap()],
                dns_servers: vec![],
                gateways: vec![],
                mtu: 0,
            },
            bandwidth: None,
        }));
        h.pump();
        let reports = h.reports();
        assert!(matches!(reports[0], BearerReport::RequestDetached { .. }));
        assert!(matches!(
            reports[1],
            BearerReport::SetupFailed { cause: FailCause::Unwanted, .. }
        ));
    }

    #[test]
    fn session_reservation_precedes_setup() {
        let mut h = Harness::new();
        h.service.require_reservation(Transport::Cellular);
        h.start();
        assert_eq!(h.bearer.state(), BearerState::Connected);
        let calls = h.service.recorded();
        assert_eq!(calls[0], ServiceCall::Reserve(Transport::Cellular));
        assert!(matches!(calls[1], ServiceCall::Setup { transport: Transport::Cellular, .. }));
    }

    #[test]
    fn mtu_defaults_when_service_reports_none() {
        let mut h = Harness::new();
        h.service.enqueue(SetupBehavior::SucceedWithLink(LinkProperties {
            interface: "net1".into(),
            addresses: vec!["10.1.0.1".parse().unwrap()],
            dns_servers: vec![],
            gateways: vec![],
            mtu: 0,
        }));
        h.start();
        assert_eq!(h.bearer.link.mtu, h.bearer.deps.policy.config.default_mtu);
    }

    #[test]
    fn malformed_setup_link_raises_anomaly_but_continues() {
        let mut h = Harness::new();
        h.service.enqueue(SetupBehavior::SucceedWithLink(LinkProperties::default()));
        h.start();
        assert_eq!(h.bearer.state(), BearerState::Connected, "best-effort continue");
        assert!(h
            .reporter
            .recorded()
            .iter()
            .any(|a| matches!(a, Anomaly::MalformedResponse { .. })));
    }

    // ─── Connected ──────────────────────────────────────────────────────

    #[test]
    fn teardown_disconnects_and_retires_handle() {
        let mut h = Harness::new();
        h.start();
        h.command(teardown());
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        assert!(h.broker.live_handles().is_empty(), "handle retired");
        let reports = h.reports();
        assert!(matches!(
            reports.last(),
            Some(BearerReport::Disconnected { cause: FailCause::None, .. })
        ));
    }

    #[test]
    fn session_lost_while_connected_disconnects() {
        let mut h = Harness::new();
        h.start();
        let session = *h.bearer.sessions.get(&Transport::Cellular).unwrap();
        h.bearer.dispatch(BearerEvent::SessionLost { transport: Transport::Cellular, session });
        h.pump();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        assert!(matches!(
            h.reports().last(),
            Some(BearerReport::Disconnected { cause: FailCause::SignalLost, .. })
        ));
    }

    #[test]
    fn mutable_condition_change_updates_in_place() {
        let mut h = Harness::new();
        h.start();
        assert!(h.bearer.capabilities().contains(Capability::NotRoaming));
        let registers_before = h.broker.register_count();
        h.env(BearerEnvUpdate::Roaming(true));
        assert!(!h.bearer.capabilities().contains(Capability::NotRoaming));
        assert_eq!(h.broker.register_count(), registers_before, "no handle recreation");
        let handle = h.bearer.handle_id().unwrap();
        assert_eq!(
            h.broker.last_capabilities(handle),
            Some(h.bearer.capabilities()),
            "in-place capability push"
        );
    }

    #[test]
    fn immutable_grant_recreates_handle_keeping_requests() {
        let mut h = Harness::new();
        h.start();
        let old_handle = h.bearer.handle_id().unwrap();
        let requests_before: Vec<RequestId> = h.bearer.requests.iter().map(|r| r.id).collect();
        h.env(BearerEnvUpdate::GrantCapability(Capability::Enterprise));

        let new_handle = h.bearer.handle_id().unwrap();
        assert_ne!(old_handle, new_handle, "fresh external handle");
        assert_eq!(h.broker.register_count(), 2);
        assert!(!h.broker.live_handles().contains(&old_handle));
        assert!(h.bearer.capabilities().contains(Capability::Enterprise));
        let ids: Vec<RequestId> = h.bearer.requests.iter().map(|r| r.id).collect();
        assert_eq!(ids, requests_before, "attachments preserved");
        assert!(h
            .reports()
            .iter()
            .any(|r| matches!(r, BearerReport::HandleRecreated { .. })));
    }

    #[test]
    fn compatible_link_change_applies_in_place() {
        let mut h = Harness::new();
        h.start();
        let registers_before = h.broker.register_count();
        let mut link = h.bearer.link.clone();
        link.dns_servers.push("10.0.255.2".parse().unwrap());
        h.env(BearerEnvUpdate::LinkChanged(link));
        assert_eq!(h.broker.register_count(), registers_before);
        assert!(h
            .broker
            .recorded()
            .iter()
            .any(|c| matches!(c, BrokerCall::UpdateLink { .. })));
    }

    #[test]
    fn address_churn_recreates_handle() {
        let mut h = Harness::new();
        h.start();
        let mut link = h.bearer.link.clone();
        link.addresses = vec!["192.168.44.1".parse().unwrap()];
        h.env(BearerEnvUpdate::LinkChanged(link));
        assert_eq!(h.broker.register_count(), 2, "incompatible change republishes");
    }

    #[test]
    fn call_without_concurrency_suspends() {
        let mut h = Harness::new();
        h.start();
        h.env(BearerEnvUpdate::CallState { active: true, concurrent_ok: false });
        assert!(h.bearer.suspended);
        assert!(!h.bearer.capabilities().contains(Capability::NotSuspended));
        assert!(h
            .reports()
            .iter()
            .any(|r| matches!(r, BearerReport::SuspendedChanged { suspended: true })));

        h.env(BearerEnvUpdate::CallState { active: false, concurrent_ok: false });
        assert!(!h.bearer.suspended, "call ended, data resumes");
    }

    // ─── Graceful Teardown ──────────────────────────────────────────────

    fn ims_harness() -> Harness {
        Harness::with_profile("ims", "ims")
    }

    #[test]
    fn graceful_teardown_waits_for_release_signal() {
        let mut h = ims_harness();
        h.start();
        h.command(BearerCommand::Teardown {
            reason: TeardownReason::NoLongerNeeded,
            graceful: true,
        });
        assert_eq!(h.bearer.state(), BearerState::Connected, "teardown deferred");
        h.bearer.dispatch(BearerEvent::GracefulReleaseSignal);
        h.pump();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
    }

    #[test]
    fn graceful_teardown_fallback_deadline_forces() {
        let mut h = ims_harness();
        h.start();
        h.command(BearerCommand::Teardown {
            reason: TeardownReason::NoLongerNeeded,
            graceful: true,
        });
        let generation = h.bearer.pending_teardown.unwrap().generation;
        h.bearer.dispatch(BearerEvent::GracefulTimeout { generation });
        h.pump();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
    }

    #[test]
    fn teardown_now_cancels_graceful_wait() {
        let mut h = ims_harness();
        h.start();
        h.command(BearerCommand::Teardown {
            reason: TeardownReason::NoLongerNeeded,
            graceful: true,
        });
        assert!(h.bearer.pending_teardown.is_some());
        h.command(BearerCommand::TeardownNow { reason: TeardownReason::Shutdown });
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
    }

    #[test]
    fn graceful_flag_ignored_without_matching_capability() {
        let mut h = Harness::new(); // internet only, not in graceful caps
        h.start();
        h.command(BearerCommand::Teardown {
            reason: TeardownReason::NoLongerNeeded,
            graceful: true,
        });
        assert_eq!(h.bearer.state(), BearerState::Disconnected, "no wait for plain data");
    }

    // ─── Disconnecting ──────────────────────────────────────────────────

    #[test]
    fn stuck_disconnecting_reports_lost_connection_once() {
        let mut h = Harness::new();
        h.start();
        h.service.hold_deactivations();
        h.command(teardown());
        assert_eq!(h.bearer.state(), BearerState::Disconnecting);
        h.fire_stuck();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        assert!(matches!(
            h.reports().last(),
            Some(BearerReport::Disconnected { cause: FailCause::SignalLost, .. })
        ));
        assert_eq!(
            h.reporter
                .recorded()
                .iter()
                .filter(|a| matches!(a, Anomaly::StuckState { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn unsolicited_inactive_confirms_disconnect() {
        let mut h = Harness::new();
        h.start();
        h.service.hold_deactivations();
        let session = *h.bearer.sessions.get(&Transport::Cellular).unwrap();
        h.command(teardown());
        assert_eq!(h.bearer.state(), BearerState::Disconnecting);
        h.bearer.dispatch(BearerEvent::SessionLost { transport: Transport::Cellular, session });
        h.pump();
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
    }

    // ─── Handover ───────────────────────────────────────────────────────

    #[test]
    fn handover_success_swaps_transport_and_keeps_handle() {
        let mut h = Harness::new();
        h.start();
        let handle_before = h.bearer.handle_id().unwrap();
        let session_before = *h.bearer.sessions.get(&Transport::Cellular).unwrap();
        h.command(BearerCommand::Handover { target: Transport::Wlan });

        assert_eq!(h.bearer.state(), BearerState::Connected);
        assert_eq!(h.bearer.transport(), Transport::Wlan);
        assert_eq!(h.bearer.handle_id(), Some(handle_before), "same external handle");
        assert!(h
            .service
            .recorded()
            .contains(&ServiceCall::Deactivate(Transport::Cellular, session_before)));
        assert!(h
            .reports()
            .iter()
            .any(|r| matches!(r, BearerReport::HandoverComplete { transport: Transport::Wlan })));
        assert_eq!(h.bearer.requests.len(), 1, "requests stay attached");
    }

    #[test]
    fn handover_failure_keeps_bearer_on_source() {
        let mut h = Harness::new();
        h.start();
        h.service.enqueue(SetupBehavior::Fail {
            cause: FailCause::NetworkFailure,
            retry_after: None,
            handover_mode: 0,
        });
        h.command(BearerCommand::Handover { target: Transport::Wlan });
        assert_eq!(h.bearer.state(), BearerState::Connected);
        assert_eq!(h.bearer.transport(), Transport::Cellular, "move cancelled, network kept");
        assert!(h.reports().iter().any(|r| matches!(
            r,
            BearerReport::HandoverFailed { mode: HandoverFailureMode::Stay, .. }
        )));
    }

    #[test]
    fn out_of_range_handover_mode_is_anomaly_with_default() {
        let mut h = Harness::new();
        h.start();
        h.service.enqueue(SetupBehavior::Fail {
            cause: FailCause::NetworkFailure,
            retry_after: None,
            handover_mode: 42,
        });
        h.command(BearerCommand::Handover { target: Transport::Wlan });
        assert!(h
            .reporter
            .recorded()
            .iter()
            .any(|a| matches!(a, Anomaly::InvalidHandoverFailureMode { value: 42, .. })));
        assert!(h.reports().iter().any(|r| matches!(
            r,
            BearerReport::HandoverFailed { mode: HandoverFailureMode::Stay, .. }
        )));
    }

    #[test]
    fn handover_round_trip_restores_everything() {
        let mut h = Harness::new();
        h.start();
        let caps_before = h.bearer.capabilities();
        h.command(BearerCommand::Handover { target: Transport::Wlan });
        assert_eq!(h.bearer.transport(), Transport::Wlan);
        h.command(BearerCommand::Handover { target: Transport::Cellular });
        assert_eq!(h.bearer.transport(), Transport::Cellular);
        assert_eq!(h.bearer.capabilities(), caps_before, "capability set unchanged");
    }

    #[test]
    fn stuck_handover_returns_to_connected() {
        let mut h = Harness::new();
        h.start();
        h.service.enqueue(SetupBehavior::Hold);
        h.command(BearerCommand::Handover { target: Transport::Wlan });
        assert_eq!(h.bearer.state(), BearerState::HandingOver);
        h.fire_stuck();
        assert_eq!(h.bearer.state(), BearerState::Connected);
        assert_eq!(h.bearer.transport(), Transport::Cellular);
        assert!(h.reports().iter().any(|r| matches!(
            r,
            BearerReport::HandoverFailed { cause: FailCause::StuckInTransientState, .. }
        )));
    }

    #[test]
    fn late_setup_reply_after_stuck_handover_is_released() {
        let mut h = Harness::new();
        h.start();
        h.service.enqueue(SetupBehavior::Hold);
        h.command(BearerCommand::Handover { target: Transport::Wlan });
        h.fire_stuck();
        h.reports();
        // The held setup resolves after the bearer gave up on it.
        h.service.complete_held(Ok(crate::service::SetupSuccess {
            session: SessionId(55),
            link: LinkProperties {
                interface: "net55".into(),
                addresses: vec!["10.55.0.1".parse().unwrap()],
                dns_servers: vec![],
                gateways: vec![],
                mtu: 0,
            },
            bandwidth: None,
        }));
        h.pump();
        assert!(
            h.service.recorded().contains(&ServiceCall::Deactivate(Transport::Wlan, SessionId(55))),
            "orphaned target session is released"
        );
        assert_eq!(h.bearer.transport(), Transport::Cellular, "still on source");
    }

    #[test]
    fn deferred_events_replay_in_order_after_handover() {
        let mut h = Harness::new();
        h.start();
        h.reports();
        h.service.enqueue(SetupBehavior::Hold);
        h.bearer.dispatch(BearerEvent::Command(BearerCommand::Handover {
            target: Transport::Wlan,
        }));
        // Arrive while the move is in flight: replay must preserve order.
        h.bearer
            .dispatch(BearerEvent::Env(BearerEnvUpdate::GrantCapability(Capability::Enterprise)));
        h.bearer.dispatch(BearerEvent::Command(teardown()));
        assert_eq!(h.bearer.deferred.len(), 2);

        h.service.complete_held(Ok(crate::service::SetupSuccess {
            session: SessionId(77),
            link: LinkProperties {
                interface: "net77".into(),
                addresses: vec!["10.77.0.1".parse().unwrap()],
                dns_servers: vec![],
                gateways: vec![],
                mtu: 0,
            },
            bandwidth: None,
        }));
        h.pump();

        assert_eq!(h.bearer.state(), BearerState::Disconnected, "deferred teardown ran last");
        let reports = h.reports();
        let grant_pos = reports
            .iter()
            .position(|r| matches!(r, BearerReport::HandleRecreated { .. }))
            .expect("grant applied after handover");
        let gone_pos = reports
            .iter()
            .position(|r| matches!(r, BearerReport::Disconnected { .. }))
            .expect("teardown ran");
        assert!(grant_pos < gone_pos, "replay preserves original order");
    }

    // ─── Terminal Discipline ────────────────────────────────────────────

    #[test]
    fn terminal_bearer_drops_everything() {
        let mut h = Harness::new();
        h.start();
        h.command(teardown());
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        let before = h.reports().len();
        h.command(BearerCommand::Handover { target: Transport::Wlan });
        h.command(teardown());
        h.env(BearerEnvUpdate::Roaming(true));
        assert_eq!(h.bearer.state(), BearerState::Disconnected);
        assert_eq!(h.reports().len(), before, "no further reports after terminal");
    }

    #[test]
    fn never_connected_never_reports_disconnected() {
        let mut h = Harness::new();
        h.service.enqueue(SetupBehavior::Fail {
            cause: FailCause::NetworkFailure,
            retry_after: None,
            handover_mode: 0,
        });
        h.start();
        for report in h.reports() {
            assert!(
                !matches!(report, BearerReport::Disconnected { .. }),
                "everConnected=false must end in SetupFailed"
            );
        }
    }
}
