//! Consumer requests and the manager's request table.

use std::sync::Arc;

use switchyard_common::{BearerId, Capability, CapabilitySet, RequestId, Transport};
use switchyard_policy::RequestFacts;

/// One consumer demand for connectivity.
///
/// Immutable after creation and shared as `Arc<NetRequest>` between the
/// manager and the bearer serving it. Satisfaction state lives in the
/// manager's [`RequestTable`], never here, so only one actor ever
/// mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetRequest {
    pub id: RequestId,
    pub capabilities: CapabilitySet,
    /// Pin the request to one transport instead of following the
    /// per-capability preference.
    pub transport_pref: Option<Transport>,
    /// Who asked — a package or subsystem name, for logs and snapshots.
    pub originator: String,
}

impl NetRequest {
    /// An ordinary request. The `not_restricted` tag is added for the
    /// caller: ordinary consumers are subject to user policy switches.
    pub fn new(capabilities: CapabilitySet, originator: impl Into<String>) -> NetRequest {
        NetRequest {
            id: RequestId::next(),
            capabilities: capabilities.with(Capability::NotRestricted),
            transport_pref: None,
            originator: originator.into(),
        }
    }

    /// A privileged request that deliberately omits `not_restricted` and
    /// may cross soft policy switches.
    pub fn restricted(capabilities: CapabilitySet, originator: impl Into<String>) -> NetRequest {
        NetRequest {
            id: RequestId::next(),
            capabilities,
            transport_pref: None,
            originator: originator.into(),
        }
    }

    pub fn with_transport(mut self, transport: Transport) -> NetRequest {
        self.transport_pref = Some(transport);
        self
    }

    /// Derived priority: the maximum over the capability set.
    pub fn priority(&self) -> u8 {
        self.capabilities.priority()
    }

    /// The evaluator's view of this request.
    pub fn facts(&self) -> RequestFacts {
        RequestFacts {
            capabilities: self.capabilities,
            transport_pref: self.transport_pref,
            priority: self.priority(),
        }
    }
}

/// Satisfaction state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Unsatisfied,
    Satisfied,
}

/// One row of the request table.
#[derive(Debug, Clone)]
pub struct RequestEntry {
    pub request: Arc<NetRequest>,
    pub state: RequestState,
    /// The bearer currently serving this request. Present exactly when
    /// the state is Satisfied.
    pub bearer: Option<BearerId>,
}

/// Error inserting a request whose id is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("duplicate request {0}")]
pub struct DuplicateRequest(pub RequestId);

/// The manager's authoritative request list, priority-ordered.
///
/// Priority decides placement; insertion order breaks ties so equal
/// priorities stay stable. Satisfaction and the bearer back-reference
/// are updated together, keeping the bidirectional invariant by
/// construction: Satisfied ⇔ a bearer is referenced.
#[derive(Debug, Default)]
pub struct RequestTable {
    entries: Vec<RequestEntry>,
}

impl RequestTable {
    pub fn new() -> RequestTable {
        RequestTable { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert in priority order. Duplicate ids are rejected.
    pub fn insert(&mut self, request: Arc<NetRequest>) -> Result<(), DuplicateRequest> {
        if self.get(request.id).is_some() {
            return Err(DuplicateRequest(request.id));
        }
        let priority = request.priority();
        let pos = self
            .entries
            .iter()
            .position(|e| e.request.priority() < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            pos,
            RequestEntry { request, state: RequestState::Unsatisfied, bearer: None },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: RequestId) -> Option<RequestEntry> {
        let pos = self.entries.iter().position(|e| e.request.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn get(&self, id: RequestId) -> Option<&RequestEntry> {
        self.entries.iter().find(|e| e.request.id == id)
    }

    pub fn mark_satisfied(&mut self, id: RequestId, bearer: BearerId) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.request.id == id) {
            e.state = RequestState::Satisfied;
            e.bearer = Some(bearer);
        }
    }

    pub fn mark_unsatisfied(&mut self, id: RequestId) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.request.id == id) {
            e.state = RequestState::Unsatisfied;
            e.bearer = None;
        }
    }

    /// All requests currently served by `bearer`.
    pub fn served_by(&self, bearer: BearerId) -> Vec<RequestId> {
        self.entries
            .iter()
            .filter(|e| e.bearer == Some(bearer))
            .map(|e| e.request.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestEntry> {
        self.entries.iter()
    }

    /// Unsatisfied requests grouped by identical capability set, groups
    /// ordered by the table's priority order of their first member.
    pub fn unsatisfied_groups(&self) -> Vec<(CapabilitySet, Vec<Arc<NetRequest>>)> {
        let mut groups: Vec<(CapabilitySet, Vec<Arc<NetRequest>>)> = Vec::new();
        for entry in &self.entries {
            if entry.state != RequestState::Unsatisfied {
                continue;
            }
            let caps = entry.request.capabilities;
            match groups.iter_mut().find(|(c, _)| *c == caps) {
                Some((_, members)) => members.push(entry.request.clone()),
                None => groups.push((caps, vec![entry.request.clone()])),
            }
        }
        groups
    }
}
