//! Access profiles — how to dial a given capability set.
//!
//! A profile describes one way of bringing up a bearer: the network it
//! attaches to, which capabilities that attachment can serve, and which
//! radio technologies it may be dialled on. The evaluation engine picks a
//! candidate profile for every request it allows; no candidate is itself
//! grounds for refusal.

use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::transport::{RadioTech, Transport};

/// One dialling recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessProfile {
    /// Stable numeric id, unique within the profile table.
    pub id: u32,
    /// Operator-facing name (APN or service label).
    pub name: String,
    /// Capabilities an attachment through this profile can serve.
    pub capabilities: CapabilitySet,
    /// Radio technologies this profile may be dialled on. Empty = any.
    #[serde(default)]
    pub allowed_techs: Vec<RadioTech>,
    /// Transport this profile is pinned to, if any.
    #[serde(default)]
    pub transport: Option<Transport>,
    /// Preferred profiles win candidate selection over non-preferred ones.
    #[serde(default)]
    pub preferred: bool,
}

impl AccessProfile {
    /// Whether an attachment through this profile can serve every service
    /// capability in `wanted`. Condition tags are not the profile's
    /// concern and are ignored here.
    pub fn can_satisfy(&self, wanted: CapabilitySet) -> bool {
        self.capabilities.contains_all(wanted.services())
    }

    /// Whether the profile may be dialled on `tech`.
    pub fn supports_tech(&self, tech: RadioTech) -> bool {
        self.allowed_techs.is_empty() || self.allowed_techs.contains(&tech)
    }

    /// Whether the profile may be used on `transport`.
    pub fn supports_transport(&self, transport: Transport) -> bool {
        self.transport.is_none() || self.transport == Some(transport)
    }
}
