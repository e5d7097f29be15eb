//! Test doubles for the collaborator seams.
//!
//! Used by this crate's own unit and integration tests, and handy for
//! embedders simulating a fleet without a real modem. The mock service
//! replies synchronously into the caller's mailbox by default; queue a
//! [`SetupBehavior::Hold`] to keep a call pending and drive timeouts.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::Sender;

use switchyard_common::{
    CapabilitySet, FailCause, LinkBandwidth, LinkProperties, SessionId, Transport,
};

use crate::anomaly::{Anomaly, AnomalyReporter};
use crate::broker::{HandleDescriptor, HandleId, NetworkBroker};
use crate::event::{BearerEvent, ManagerEvent};
use crate::sched::{RetryRequest, RetryScheduler};
use crate::service::{DataService, SetupFailure, SetupRequest, SetupSuccess};

// ─── Mock Data Service ──────────────────────────────────────────────────────

/// Scripted behavior for one setup call.
#[derive(Debug, Clone)]
pub enum SetupBehavior {
    /// Succeed with an auto-generated (or given) interface name.
    Succeed { interface: Option<String> },
    /// Succeed with exactly this link.
    SucceedWithLink(LinkProperties),
    Fail { cause: FailCause, retry_after: Option<Duration>, handover_mode: i32 },
    /// Do not reply; the call stays pending until
    /// [`MockDataService::complete_held`].
    Hold,
}

/// A recorded service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Reserve(Transport),
    Setup { transport: Transport, profile_id: u32, handover: bool },
    Deactivate(Transport, SessionId),
}

/// In-memory [`DataService`]: replies immediately unless scripted
/// otherwise, allocates session ids and interface names, and records
/// every call.
#[derive(Default)]
pub struct MockDataService {
    next_session: AtomicU32,
    next_iface: AtomicU32,
    reservation_transports: Mutex<HashSet<Transport>>,
    script: Mutex<VecDeque<SetupBehavior>>,
    held: Mutex<Vec<(Transport, Sender<BearerEvent>)>>,
    hold_deactivate: std::sync::atomic::AtomicBool,
    pub calls: Mutex<Vec<ServiceCall>>,
}

impl MockDataService {
    pub fn new() -> MockDataService {
        MockDataService::default()
    }

    /// Make `transport` require a session reservation before setup.
    pub fn require_reservation(&self, transport: Transport) {
        self.reservation_transports.lock().unwrap().insert(transport);
    }

    /// Stop answering deactivate calls (for stuck-teardown tests).
    pub fn hold_deactivations(&self) {
        self.hold_deactivate.store(true, Ordering::Relaxed);
    }

    /// Queue a behavior for the next unscripted setup call.
    pub fn enqueue(&self, behavior: SetupBehavior) {
        self.script.lock().unwrap().push_back(behavior);
    }

    /// Complete the oldest held setup call with `result`.
    pub fn complete_held(&self, result: crate::service::SetupResult) {
        let (transport, reply) = self.held.lock().unwrap().remove(0);
        let _ = reply.send(BearerEvent::SetupDone { transport, result });
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    fn fresh_link(&self, interface: Option<String>) -> LinkProperties {
        let n = self.next_iface.fetch_add(1, Ordering::Relaxed);
        LinkProperties {
            interface: interface.unwrap_or_else(|| format!("net{n}")),
            addresses: vec![format!("10.0.{}.{}", n / 250, n % 250 + 1).parse().unwrap()],
            dns_servers: vec!["10.0.255.1".parse().unwrap()],
            gateways: vec![format!("10.0.{}.254", n / 250).parse().unwrap()],
            mtu: 1_428,
        }
    }

    fn fresh_session(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl DataService for MockDataService {
    fn needs_session_reservation(&self, transport: Transport) -> bool {
        self.reservation_transports.lock().unwrap().contains(&transport)
    }

    fn reserve_session(&self, transport: Transport, reply: Sender<BearerEvent>) {
        self.calls.lock().unwrap().push(ServiceCall::Reserve(transport));
        let session = self.fresh_session();
        let _ = reply.send(BearerEvent::SessionReserved { transport, session });
    }

    fn setup(&self, request: SetupRequest, reply: Sender<BearerEvent>) {
        self.calls.lock().unwrap().push(ServiceCall::Setup {
            transport: request.transport,
            profile_id: request.profile_id,
            handover: request.existing_link.is_some(),
        });
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SetupBehavior::Succeed { interface: None });
        let result = match behavior {
            SetupBehavior::Succeed { interface } => Ok(SetupSuccess {
                session: request.session.unwrap_or_else(|| self.fresh_session()),
                link: self.fresh_link(interface),
                bandwidth: Some(LinkBandwidth::new(40_000, 20_000)),
            }),
            SetupBehavior::SucceedWithLink(link) => Ok(SetupSuccess {
                session: request.session.unwrap_or_else(|| self.fresh_session()),
                link,
                bandwidth: None,
            }),
            SetupBehavior::Fail { cause, retry_after, handover_mode } => Err(SetupFailure {
                cause,
                suggested_retry: retry_after,
                handover_failure_mode: handover_mode,
            }),
            SetupBehavior::Hold => {
                self.held.lock().unwrap().push((request.transport, reply));
                return;
            }
        };
        let _ = reply.send(BearerEvent::SetupDone { transport: request.transport, result });
    }

    fn deactivate(&self, transport: Transport, session: SessionId, reply: Sender<BearerEvent>) {
        self.calls.lock().unwrap().push(ServiceCall::Deactivate(transport, session));
        if !self.hold_deactivate.load(Ordering::Relaxed) {
            let _ = reply.send(BearerEvent::DeactivateDone { transport });
        }
    }
}

// ─── Recording Broker ───────────────────────────────────────────────────────

/// A recorded broker call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Register { handle: HandleId, capabilities: CapabilitySet, interface: String },
    UpdateCapabilities { handle: HandleId, capabilities: CapabilitySet },
    UpdateLink { handle: HandleId, interface: String },
    UpdateBandwidth { handle: HandleId, bandwidth: LinkBandwidth },
    UpdateScore { handle: HandleId, score: u8 },
    Retire { handle: HandleId },
}

/// In-memory [`NetworkBroker`] recording every publication.
#[derive(Default)]
pub struct RecordingBroker {
    next_handle: AtomicU64,
    pub calls: Mutex<Vec<BrokerCall>>,
}

impl RecordingBroker {
    pub fn new() -> RecordingBroker {
        RecordingBroker::default()
    }

    pub fn recorded(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Handles registered and not yet retired.
    pub fn live_handles(&self) -> Vec<HandleId> {
        let calls = self.calls.lock().unwrap();
        let mut live = Vec::new();
        for call in calls.iter() {
            match call {
                BrokerCall::Register { handle, .. } => live.push(*handle),
                BrokerCall::Retire { handle } => live.retain(|h| h != handle),
                _ => {}
            }
        }
        live
    }

    pub fn register_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, BrokerCall::Register { .. }))
            .count()
    }

    /// The most recent capability publication for `handle`.
    pub fn last_capabilities(&self, handle: HandleId) -> Option<CapabilitySet> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|c| match c {
                BrokerCall::Register { handle: h, capabilities, .. } if *h == handle => {
                    Some(*capabilities)
                }
                BrokerCall::UpdateCapabilities { handle: h, capabilities } if *h == handle => {
                    Some(*capabilities)
                }
                _ => None,
            })
    }
}

impl NetworkBroker for RecordingBroker {
    fn register(&self, descriptor: HandleDescriptor) -> HandleId {
        let handle = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        self.calls.lock().unwrap().push(BrokerCall::Register {
            handle,
            capabilities: descriptor.capabilities,
            interface: descriptor.link.interface.clone(),
        });
        handle
    }

    fn update_capabilities(&self, handle: HandleId, capabilities: CapabilitySet) {
        self.calls.lock().unwrap().push(BrokerCall::UpdateCapabilities { handle, capabilities });
    }

    fn update_link(&self, handle: HandleId, link: &LinkProperties) {
        self.calls.lock().unwrap().push(BrokerCall::UpdateLink {
            handle,
            interface: link.interface.clone(),
        });
    }

    fn update_bandwidth(&self, handle: HandleId, bandwidth: LinkBandwidth) {
        self.calls.lock().unwrap().push(BrokerCall::UpdateBandwidth { handle, bandwidth });
    }

    fn update_score(&self, handle: HandleId, score: u8) {
        self.calls.lock().unwrap().push(BrokerCall::UpdateScore { handle, score });
    }

    fn retire(&self, handle: HandleId) {
        self.calls.lock().unwrap().push(BrokerCall::Retire { handle });
    }
}

// ─── Recording Anomaly Reporter ─────────────────────────────────────────────

/// Collects anomalies for assertions.
#[derive(Default)]
pub struct RecordingReporter {
    pub anomalies: Mutex<Vec<Anomaly>>,
}

impl RecordingReporter {
    pub fn new() -> RecordingReporter {
        RecordingReporter::default()
    }

    pub fn recorded(&self) -> Vec<Anomaly> {
        self.anomalies.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.anomalies.lock().unwrap().len()
    }
}

impl AnomalyReporter for RecordingReporter {
    fn report(&self, anomaly: Anomaly) {
        self.anomalies.lock().unwrap().push(anomaly);
    }
}

// ─── Retry Scheduler Doubles ────────────────────────────────────────────────

/// Never schedules anything.
#[derive(Default)]
pub struct NullRetryScheduler;

impl RetryScheduler for NullRetryScheduler {
    fn schedule(&self, _request: RetryRequest) -> bool {
        false
    }

    fn is_throttled(&self, _profile: u32, _transport: Transport) -> bool {
        false
    }
}

/// Fires every scheduled retry straight back into the manager queue,
/// with no delay. Keeps fleet tests deterministic.
pub struct ImmediateRetryScheduler {
    manager: Sender<ManagerEvent>,
    pub scheduled: Mutex<Vec<RetryRequest>>,
}

impl ImmediateRetryScheduler {
    pub fn new(manager: Sender<ManagerEvent>) -> ImmediateRetryScheduler {
        ImmediateRetryScheduler { manager, scheduled: Mutex::new(Vec::new()) }
    }
}

impl RetryScheduler for ImmediateRetryScheduler {
    fn schedule(&self, request: RetryRequest) -> bool {
        if request.cause.is_permanent() {
            return false;
        }
        let due = ManagerEvent::RetryDue {
            profile: request.profile,
            transport: request.transport,
            requests: request.requests.clone(),
        };
        self.scheduled.lock().unwrap().push(request);
        self.manager.send(due).is_ok()
    }

    fn is_throttled(&self, _profile: u32, _transport: Transport) -> bool {
        false
    }
}
