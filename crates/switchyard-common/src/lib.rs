//! Shared taxonomy for the Switchyard bearer manager.
//!
//! This crate contains:
//! - **Transports** — the fixed set of access paths a bearer can run over
//! - **Capabilities** — semantic tags describing what a bearer provides
//! - **Fail causes** — structured setup/teardown failure taxonomy
//! - **Link state** — addresses, DNS, MTU, bandwidth, activity status
//! - **Access profiles** — how to dial a given capability set
//! - **ID allocation** — process-wide bearer/request id counters

pub mod capability;
pub mod cause;
pub mod ids;
pub mod link;
pub mod profile;
pub mod transport;

pub use capability::{Capability, CapabilitySet};
pub use cause::FailCause;
pub use ids::{BearerId, RequestId, SessionId};
pub use link::{LinkBandwidth, LinkProperties, LinkStatus};
pub use profile::AccessProfile;
pub use transport::{RadioTech, Transport};
