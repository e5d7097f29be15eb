//! The outward-facing network broker seam.
//!
//! The broker is the system component that makes a bearer visible to
//! socket owners: the core registers a handle when a bearer connects,
//! pushes capability/link/bandwidth/score updates while it lives, and
//! retires the handle when it goes away. Handle identity matters —
//! immutable-capability changes and socket-incompatible link changes
//! retire the old handle and register a fresh one rather than mutating
//! in place. The broker's "this handle is unwanted" signal arrives
//! through [`crate::event::ManagerEvent::Unwanted`].

use switchyard_common::{BearerId, CapabilitySet, LinkBandwidth, LinkProperties};

/// Identity of one externally visible network handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Everything the broker needs to publish a handle.
#[derive(Debug, Clone)]
pub struct HandleDescriptor {
    pub bearer: BearerId,
    pub capabilities: CapabilitySet,
    pub link: LinkProperties,
    pub bandwidth: LinkBandwidth,
    /// Relative desirability of this handle among handles with equal
    /// capabilities. Suspended bearers score low.
    pub score: u8,
}

/// Publication seam towards the system network stack.
pub trait NetworkBroker: Send + Sync {
    /// Publish a new handle; the returned id names it until retirement.
    fn register(&self, descriptor: HandleDescriptor) -> HandleId;

    fn update_capabilities(&self, handle: HandleId, capabilities: CapabilitySet);

    fn update_link(&self, handle: HandleId, link: &LinkProperties);

    fn update_bandwidth(&self, handle: HandleId, bandwidth: LinkBandwidth);

    fn update_score(&self, handle: HandleId, score: u8);

    /// Withdraw the handle. No further updates may follow.
    fn retire(&self, handle: HandleId);
}
