//! Shared fixture: a full runtime wired to mock collaborators, with a
//! fully permissive environment installed.

// Each integration binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use switchyard_common::{CapabilitySet, LinkProperties, RadioTech, SessionId, Transport};
use switchyard_core::manager::FleetSnapshot;
use switchyard_core::runtime::SwitchyardRuntime;
use switchyard_core::service::SetupSuccess;
use switchyard_core::testing::{
    ImmediateRetryScheduler, MockDataService, RecordingBroker, RecordingReporter,
};
use switchyard_core::EnvironmentEvent;
use switchyard_policy::{ConfigHandle, PolicyConfig};

pub struct Fleet {
    pub runtime: SwitchyardRuntime,
    pub service: Arc<MockDataService>,
    pub broker: Arc<RecordingBroker>,
    pub reporter: Arc<RecordingReporter>,
    pub config: Arc<ConfigHandle>,
}

pub fn fleet() -> Fleet {
    fleet_with(PolicyConfig::default())
}

pub fn fleet_with(config: PolicyConfig) -> Fleet {
    let service = Arc::new(MockDataService::new());
    let broker = Arc::new(RecordingBroker::new());
    let reporter = Arc::new(RecordingReporter::new());
    let config = Arc::new(ConfigHandle::new(config).expect("test config compiles"));
    let (tx, rx) = SwitchyardRuntime::channel();
    let retry = Arc::new(ImmediateRetryScheduler::new(tx.clone()));
    let runtime = SwitchyardRuntime::with_collaborators(
        service.clone(),
        broker.clone(),
        reporter.clone(),
        retry,
        config.clone(),
        tx,
        rx,
    );
    for event in permissive_events() {
        runtime.environment(event).expect("manager alive");
    }
    Fleet { runtime, service, broker, reporter, config }
}

/// Bring every environment input fully up.
pub fn permissive_events() -> Vec<EnvironmentEvent> {
    vec![
        EnvironmentEvent::Registration {
            transport: Transport::Cellular,
            in_service: true,
            roaming: false,
            tech: RadioTech::Lte,
        },
        EnvironmentEvent::Registration {
            transport: Transport::Wlan,
            in_service: true,
            roaming: false,
            tech: RadioTech::Iwlan,
        },
        EnvironmentEvent::VoiceCapable { transport: Transport::Cellular, capable: true },
        EnvironmentEvent::VoiceCapable { transport: Transport::Wlan, capable: true },
        EnvironmentEvent::ServiceBound { transport: Transport::Cellular, bound: true },
        EnvironmentEvent::ServiceBound { transport: Transport::Wlan, bound: true },
        EnvironmentEvent::SimReady(true),
        EnvironmentEvent::CarrierConfigLoaded(true),
        EnvironmentEvent::RadioPower { on: true, carrier_allowed: true },
        EnvironmentEvent::DataSetting { enabled: true, roaming_enabled: true },
        EnvironmentEvent::DefaultDataSelected(true),
        EnvironmentEvent::CallState { active: false, concurrent_ok: true },
    ]
}

/// Poll snapshots until `pred` holds; panics with the last snapshot on
/// timeout.
pub fn wait_until(fleet: &Fleet, pred: impl Fn(&FleetSnapshot) -> bool) -> FleetSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = fleet.runtime.snapshot().expect("snapshot");
        if pred(&snapshot) {
            return snapshot;
        }
        if Instant::now() > deadline {
            panic!("condition not reached in time; last snapshot:\n{}", snapshot.to_json());
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Hold the current state for a moment and assert it does not change.
pub fn settle(fleet: &Fleet, pred: impl Fn(&FleetSnapshot) -> bool) {
    std::thread::sleep(Duration::from_millis(150));
    let snapshot = fleet.runtime.snapshot().expect("snapshot");
    assert!(pred(&snapshot), "state drifted; snapshot:\n{}", snapshot.to_json());
}

pub fn caps(list: &str) -> CapabilitySet {
    CapabilitySet::parse_list(list).unwrap()
}

/// A plausible setup success for completing held calls.
pub fn setup_success(interface: &str, session: u32) -> SetupSuccess {
    SetupSuccess {
        session: SessionId(session),
        link: LinkProperties {
            interface: interface.to_string(),
            addresses: vec!["10.200.0.1".parse().unwrap()],
            dns_servers: vec!["10.200.255.1".parse().unwrap()],
            gateways: vec![],
            mtu: 1_428,
        },
        bandwidth: None,
    }
}
