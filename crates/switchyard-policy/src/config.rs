//! Policy configuration — thresholds, rules, limits, and the profile
//! table, loaded from TOML and hot-swappable at runtime.
//!
//! [`PolicyConfig`] is the plain deserialized form; [`CompiledPolicy`]
//! additionally carries the handover/retry rule text parsed into typed
//! structures, so evaluation never re-parses. [`ConfigHandle`] holds the
//! live `CompiledPolicy` behind an `ArcSwap` and notifies subscribers on
//! every install.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

use switchyard_common::{
    AccessProfile, Capability, CapabilitySet, LinkBandwidth, RadioTech, Transport,
};

use crate::RuleParseError;
use crate::handover::HandoverRule;
use crate::retry::RetryRule;

/// Stuck-state timeouts, in milliseconds. Every transient bearer state
/// has one so nothing hangs forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connecting_ms: u64,
    pub handover_ms: u64,
    pub disconnecting_ms: u64,
    /// How long a graceful teardown may wait for its release condition
    /// before being forced.
    pub graceful_teardown_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            connecting_ms: 25_000,
            handover_ms: 15_000,
            disconnecting_ms: 10_000,
            graceful_teardown_ms: 5_000,
        }
    }
}

/// Default bandwidth estimates per serving technology, used until the
/// first live estimate arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthDefaults {
    pub gsm: LinkBandwidth,
    pub hspa: LinkBandwidth,
    pub lte: LinkBandwidth,
    pub nr: LinkBandwidth,
    pub iwlan: LinkBandwidth,
}

impl Default for BandwidthDefaults {
    fn default() -> Self {
        BandwidthDefaults {
            gsm: LinkBandwidth::new(200, 100),
            hspa: LinkBandwidth::new(7_000, 2_000),
            lte: LinkBandwidth::new(30_000, 15_000),
            nr: LinkBandwidth::new(150_000, 50_000),
            iwlan: LinkBandwidth::new(25_000, 25_000),
        }
    }
}

impl BandwidthDefaults {
    pub fn for_tech(&self, tech: RadioTech) -> LinkBandwidth {
        match tech {
            RadioTech::Gsm => self.gsm,
            RadioTech::Hspa => self.hspa,
            RadioTech::Lte => self.lte,
            RadioTech::Nr => self.nr,
            RadioTech::Iwlan => self.iwlan,
            RadioTech::Unknown => LinkBandwidth::default(),
        }
    }
}

/// The full tunable policy surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub timeouts: TimeoutConfig,
    /// Capabilities whose usage counts as metered on cellular.
    pub metered_caps_cellular: CapabilitySet,
    /// Capabilities whose usage counts as metered on WLAN.
    pub metered_caps_wlan: CapabilitySet,
    /// Deliver MMS even when the user data switch is off.
    pub mms_always_allowed: bool,
    /// Internet setups must go through a profile marked preferred.
    pub require_preferred_profile: bool,
    /// Technologies that only support a single live bearer at a time.
    pub single_bearer_techs: Vec<RadioTech>,
    /// Capabilities whose bearers wait for a release condition before a
    /// graceful teardown proceeds.
    pub graceful_caps: CapabilitySet,
    /// MTU installed when the data service reports none.
    pub default_mtu: u32,
    pub default_bandwidth: BandwidthDefaults,
    /// Handover rule text, evaluated in order. See
    /// [`HandoverRule::parse`] for the grammar.
    pub handover_rules: Vec<String>,
    /// Retry rule text, evaluated in order. See [`RetryRule::parse`].
    pub retry_rules: Vec<String>,
    /// The dialling profile table.
    pub profiles: Vec<AccessProfile>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            timeouts: TimeoutConfig::default(),
            metered_caps_cellular: CapabilitySet::new()
                .with(Capability::Internet)
                .with(Capability::Mms)
                .with(Capability::Dun),
            metered_caps_wlan: CapabilitySet::EMPTY,
            mms_always_allowed: true,
            require_preferred_profile: true,
            single_bearer_techs: vec![RadioTech::Gsm],
            graceful_caps: CapabilitySet::from(Capability::Ims),
            default_mtu: 1_500,
            default_bandwidth: BandwidthDefaults::default(),
            handover_rules: Vec::new(),
            retry_rules: vec![
                "capabilities=internet|mms|supl|dun|fota|cbs|xcap|enterprise, \
                 retry_interval=2500|5000|10000|30000|60000, maximum_retries=10"
                    .to_string(),
                "capabilities=ims|emergency, retry_interval=1000|2000|4000|8000, \
                 maximum_retries=20"
                    .to_string(),
            ],
            profiles: default_profiles(),
        }
    }
}

fn default_profiles() -> Vec<AccessProfile> {
    vec![
        AccessProfile {
            id: 1,
            name: "default".to_string(),
            capabilities: CapabilitySet::new()
                .with(Capability::Internet)
                .with(Capability::Supl)
                .with(Capability::Fota)
                .with(Capability::Cbs),
            allowed_techs: vec![],
            transport: None,
            preferred: true,
        },
        AccessProfile {
            id: 2,
            name: "mms".to_string(),
            capabilities: CapabilitySet::new().with(Capability::Mms).with(Capability::Xcap),
            allowed_techs: vec![],
            transport: None,
            preferred: false,
        },
        AccessProfile {
            id: 3,
            name: "ims".to_string(),
            capabilities: CapabilitySet::from(Capability::Ims),
            allowed_techs: vec![],
            transport: None,
            preferred: false,
        },
        AccessProfile {
            id: 4,
            name: "sos".to_string(),
            capabilities: CapabilitySet::from(Capability::Emergency),
            allowed_techs: vec![],
            transport: None,
            preferred: false,
        },
    ]
}

impl PolicyConfig {
    /// Parse a TOML document. Missing tables and fields fall back to
    /// their defaults, field by field.
    pub fn from_toml_str(raw: &str) -> Result<PolicyConfig, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// The metered capability set for a transport.
    pub fn metered_caps(&self, transport: Transport) -> CapabilitySet {
        match transport {
            Transport::Cellular => self.metered_caps_cellular,
            Transport::Wlan => self.metered_caps_wlan,
        }
    }

    /// Whether `tech` restricts the fleet to one live bearer.
    pub fn is_single_bearer_tech(&self, tech: RadioTech) -> bool {
        self.single_bearer_techs.contains(&tech)
    }
}

/// A [`PolicyConfig`] with its rule text parsed into typed structures.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub config: PolicyConfig,
    pub handover_rules: Vec<HandoverRule>,
    pub retry_rules: Vec<RetryRule>,
}

impl CompiledPolicy {
    /// Parse every rule string. Fails on the first malformed rule so a
    /// bad config is rejected atomically, never half-installed.
    pub fn compile(config: PolicyConfig) -> Result<CompiledPolicy, ConfigError> {
        let handover_rules = config
            .handover_rules
            .iter()
            .map(|r| HandoverRule::parse(r))
            .collect::<Result<Vec<_>, _>>()?;
        let retry_rules = config
            .retry_rules
            .iter()
            .map(|r| RetryRule::parse(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CompiledPolicy { config, handover_rules, retry_rules })
    }
}

impl Default for CompiledPolicy {
    fn default() -> Self {
        CompiledPolicy::compile(PolicyConfig::default())
            .expect("default policy rules must parse")
    }
}

/// Errors installing or parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("toml: {0}")]
    Toml(String),
    #[error(transparent)]
    Rule(#[from] RuleParseError),
}

/// Live configuration handle.
///
/// Readers grab the current compiled policy lock-free; writers install a
/// whole new one and every subscriber gets a nudge on its channel.
pub struct ConfigHandle {
    current: ArcSwap<CompiledPolicy>,
    subscribers: Mutex<Vec<Sender<()>>>,
}

impl ConfigHandle {
    pub fn new(config: PolicyConfig) -> Result<ConfigHandle, ConfigError> {
        Ok(ConfigHandle {
            current: ArcSwap::from_pointee(CompiledPolicy::compile(config)?),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// The current compiled policy.
    pub fn load(&self) -> Arc<CompiledPolicy> {
        self.current.load_full()
    }

    /// Replace the live policy. Subscribers are notified; ones whose
    /// receiving side is gone are dropped.
    pub fn install(&self, config: PolicyConfig) -> Result<(), ConfigError> {
        let compiled = CompiledPolicy::compile(config)?;
        tracing::info!(
            profiles = compiled.config.profiles.len(),
            handover_rules = compiled.handover_rules.len(),
            retry_rules = compiled.retry_rules.len(),
            "policy configuration installed"
        );
        self.current.store(Arc::new(compiled));
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(()).is_ok());
        Ok(())
    }

    /// Register for update notifications.
    pub fn subscribe(&self) -> Receiver<()> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        rx
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        ConfigHandle::new(PolicyConfig::default()).expect("default config compiles")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_compiles() {
        let compiled = CompiledPolicy::default();
        assert!(!compiled.retry_rules.is_empty());
        assert!(!compiled.config.profiles.is_empty());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg = PolicyConfig::from_toml_str(
            r#"
            [timeouts]
            connecting_ms = 9000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.timeouts.connecting_ms, 9_000);
        assert_eq!(cfg.timeouts.handover_ms, TimeoutConfig::default().handover_ms);
        assert_eq!(cfg.default_mtu, 1_500);
        assert!(!cfg.profiles.is_empty(), "profile table defaults in");
    }

    #[test]
    fn toml_profiles_and_rules_parse() {
        let cfg = PolicyConfig::from_toml_str(
            r#"
            handover_rules = [
                "source=cellular, target=wlan, type=disallowed, capabilities=mms",
            ]

            [[profiles]]
            id = 7
            name = "enterprise"
            capabilities = "enterprise"
            allowed_techs = ["lte", "nr"]
            preferred = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.profiles.len(), 1, "explicit profile table replaces the default");
        assert_eq!(cfg.profiles[0].id, 7);
        let compiled = CompiledPolicy::compile(cfg).unwrap();
        assert_eq!(compiled.handover_rules.len(), 1);
    }

    #[test]
    fn bad_rule_rejects_whole_config() {
        let mut cfg = PolicyConfig::default();
        cfg.handover_rules.push("source=cellular".to_string());
        assert!(CompiledPolicy::compile(cfg).is_err());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(PolicyConfig::from_toml_str("timeouts = 7").is_err());
    }

    #[test]
    fn install_notifies_subscribers() {
        let handle = ConfigHandle::default();
        let rx = handle.subscribe();
        let mut cfg = PolicyConfig::default();
        cfg.default_mtu = 1_400;
        handle.install(cfg).unwrap();
        assert!(rx.try_recv().is_ok(), "subscriber sees the install");
        assert_eq!(handle.load().config.default_mtu, 1_400);
    }

    #[test]
    fn install_rejects_bad_config_without_swapping() {
        let handle = ConfigHandle::default();
        let before = handle.load().config.default_mtu;
        let mut cfg = PolicyConfig::default();
        cfg.default_mtu = 1_234;
        cfg.retry_rules.push("maximum_retries=nope".to_string());
        assert!(handle.install(cfg).is_err());
        assert_eq!(handle.load().config.default_mtu, before, "old config stays live");
    }

    #[test]
    fn metered_caps_per_transport() {
        let cfg = PolicyConfig::default();
        assert!(cfg.metered_caps(Transport::Cellular).contains(Capability::Internet));
        assert!(cfg.metered_caps(Transport::Wlan).is_empty());
    }
}
