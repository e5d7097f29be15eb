//! Environment snapshots — the world state evaluation runs against.
//!
//! The bearer manager folds discrete environment events (registration,
//! SIM, call state, radio power, policy overrides) into one snapshot per
//! evaluation pass. The evaluator consults nothing outside the snapshot,
//! so the same snapshot and subject always produce the same verdict.

use std::collections::{HashMap, HashSet};

use switchyard_common::{Capability, RadioTech, Transport};

/// Per-transport registration and service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportEnv {
    /// Packet data service is available on this transport.
    pub in_service: bool,
    /// Registered on a visited network.
    pub roaming: bool,
    /// Technology currently serving the transport.
    pub tech: RadioTech,
    /// This transport can carry voice-over-data traffic.
    pub voice_capable: bool,
    /// The underlying data service for this transport is bound.
    pub service_bound: bool,
}

impl Default for TransportEnv {
    fn default() -> Self {
        TransportEnv {
            in_service: false,
            roaming: false,
            tech: RadioTech::Unknown,
            voice_capable: false,
            service_bound: false,
        }
    }
}

/// Immutable world state for one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    pub cellular: TransportEnv,
    pub wlan: TransportEnv,
    /// SIM is loaded and ready for data.
    pub sim_ready: bool,
    /// Carrier policy configuration has been loaded.
    pub config_loaded: bool,
    /// A circuit-switched voice call is in progress.
    pub call_active: bool,
    /// The serving network supports simultaneous voice and data.
    pub concurrent_voice_data: bool,
    /// User master data switch.
    pub data_enabled: bool,
    /// User roaming-data switch.
    pub roaming_data_enabled: bool,
    /// A default data subscription has been selected.
    pub default_data_selected: bool,
    /// Radio power is on.
    pub radio_on: bool,
    /// Carrier has not force-disabled the radio.
    pub carrier_radio_allowed: bool,
    /// Device is in post-emergency callback mode.
    pub emergency_callback_mode: bool,
    /// An emergency session is ongoing right now.
    pub emergency_ongoing: bool,
    /// The network has restricted data for this subscriber.
    pub network_restricted: bool,
    /// A tear-down-all sweep is pending; nothing new may come up.
    pub pending_tear_down_all: bool,
    /// Current technology only supports a single live bearer.
    pub single_bearer_only: bool,
    /// Highest priority among competing live bearers, when
    /// `single_bearer_only` arbitration applies.
    pub highest_competing_priority: Option<u8>,
    /// Externally preferred transport per capability. Missing entries
    /// default to cellular.
    pub preferred_transports: HashMap<Capability, Transport>,
    /// (profile id, transport) pairs currently throttled by retry policy.
    pub throttled: HashSet<(u32, Transport)>,
    /// (profile id, transport) pairs with a retry timer already armed.
    pub retry_pending: HashSet<(u32, Transport)>,
}

impl EnvironmentSnapshot {
    /// A fully permissive environment: everything in service, every
    /// switch on. The starting point for tests and simulations.
    pub fn permissive() -> Self {
        let up = TransportEnv {
            in_service: true,
            roaming: false,
            tech: RadioTech::Lte,
            voice_capable: true,
            service_bound: true,
        };
        EnvironmentSnapshot {
            cellular: up,
            wlan: TransportEnv { tech: RadioTech::Iwlan, ..up },
            sim_ready: true,
            config_loaded: true,
            call_active: false,
            concurrent_voice_data: true,
            data_enabled: true,
            roaming_data_enabled: true,
            default_data_selected: true,
            radio_on: true,
            carrier_radio_allowed: true,
            emergency_callback_mode: false,
            emergency_ongoing: false,
            network_restricted: false,
            pending_tear_down_all: false,
            single_bearer_only: false,
            highest_competing_priority: None,
            preferred_transports: HashMap::new(),
            throttled: HashSet::new(),
            retry_pending: HashSet::new(),
        }
    }

    pub fn transport(&self, t: Transport) -> &TransportEnv {
        match t {
            Transport::Cellular => &self.cellular,
            Transport::Wlan => &self.wlan,
        }
    }

    pub fn transport_mut(&mut self, t: Transport) -> &mut TransportEnv {
        match t {
            Transport::Cellular => &mut self.cellular,
            Transport::Wlan => &mut self.wlan,
        }
    }

    /// The externally preferred transport for a capability.
    pub fn preferred_transport(&self, cap: Capability) -> Transport {
        self.preferred_transports.get(&cap).copied().unwrap_or(Transport::Cellular)
    }
}
