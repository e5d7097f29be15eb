//! Simulated fleet: the full manager/bearer stack over the in-memory
//! service and broker. Walks a request through setup, a transport
//! preference flip with handover, and release, dumping fleet snapshots
//! along the way.
//!
//! ```text
//! RUST_LOG=debug cargo run --bin switchyard-sim
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use switchyard_common::{Capability, CapabilitySet, RadioTech, Transport};
use switchyard_core::manager::FleetSnapshot;
use switchyard_core::request::NetRequest;
use switchyard_core::runtime::SwitchyardRuntime;
use switchyard_core::testing::{MockDataService, RecordingBroker};
use switchyard_core::EnvironmentEvent;
use switchyard_policy::{ConfigHandle, PolicyConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let service = Arc::new(MockDataService::new());
    let broker = Arc::new(RecordingBroker::new());
    let config = Arc::new(ConfigHandle::new(PolicyConfig::default()).context("compile policy")?);
    let runtime = SwitchyardRuntime::new(service, broker.clone(), config);

    // Bring the world up.
    for event in [
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
    ] {
        runtime.environment(event)?;
    }

    let request = NetRequest::new(CapabilitySet::from(Capability::Internet), "switchyard-sim");
    let id = runtime.submit(request)?;
    let snap = wait(&runtime, |s| s.bearers.iter().any(|b| b.connected))?;
    println!("connected:\n{}", snap.to_json());

    runtime.environment(EnvironmentEvent::PreferredTransport {
        capability: Capability::Internet,
        transport: Transport::Wlan,
    })?;
    let snap = wait(&runtime, |s| {
        s.bearers.iter().any(|b| b.connected && b.transport == Transport::Wlan)
    })?;
    println!("after handover:\n{}", snap.to_json());

    runtime.release(id)?;
    let snap = wait(&runtime, |s| s.bearers.is_empty())?;
    println!("after release:\n{}", snap.to_json());

    Ok(())
}

fn wait(
    runtime: &SwitchyardRuntime,
    pred: impl Fn(&FleetSnapshot) -> bool,
) -> anyhow::Result<FleetSnapshot> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = runtime.snapshot().context("fleet snapshot")?;
        if pred(&snapshot) {
            return Ok(snapshot);
        }
        anyhow::ensure!(Instant::now() < deadline, "fleet did not converge in time");
        std::thread::sleep(Duration::from_millis(20));
    }
}
