//! Transport preference and handover policy, end to end: moves, waits,
//! and teardown-and-recreate fallbacks.

mod common;

use common::{caps, fleet, fleet_with, settle, wait_until};

use switchyard_common::{Capability, FailCause, Transport};
use switchyard_core::request::NetRequest;
use switchyard_core::testing::SetupBehavior;
use switchyard_core::EnvironmentEvent;
use switchyard_policy::PolicyConfig;

#[test]
fn preference_change_moves_the_bearer() {
    let f = fleet();
    f.runtime.submit(NetRequest::new(caps("internet"), "browser")).unwrap();
    let before = wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].connected);
    assert_eq!(before.bearers[0].transport, Transport::Cellular);
    let bearer = before.bearers[0].id;

    f.runtime
        .environment(EnvironmentEvent::PreferredTransport {
            capability: Capability::Internet,
            transport: Transport::Wlan,
        })
        .unwrap();

    let after = wait_until(&f, |s| {
        s.bearers.len() == 1 && s.bearers[0].connected && s.bearers[0].transport == Transport::Wlan
    });
    assert_eq!(after.bearers[0].id, bearer, "same bearer moved, not recreated");
    assert_eq!(f.broker.register_count(), 1, "external handle survived the move");
    assert!(after.requests[0].satisfied, "requests stay attached across handover");
}

#[test]
fn round_trip_returns_home_unchanged() {
    let f = fleet();
    f.runtime.submit(NetRequest::new(caps("internet"), "browser")).unwrap();
    let start = wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].connected);
    let caps_before = start.bearers[0].capabilities;

    f.runtime
        .environment(EnvironmentEvent::PreferredTransport {
            capability: Capability::Internet,
            transport: Transport::Wlan,
        })
        .unwrap();
    wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].transport == Transport::Wlan);

    f.runtime
        .environment(EnvironmentEvent::PreferredTransport {
            capability: Capability::Internet,
            transport: Transport::Cellular,
        })
        .unwrap();
    let home = wait_until(&f, |s| {
        s.bearers.len() == 1 && s.bearers[0].connected && s.bearers[0].transport == Transport::Cellular
    });
    assert_eq!(home.bearers[0].id, start.bearers[0].id);
    assert_eq!(home.bearers[0].capabilities, caps_before, "capabilities back to the original");
}

#[test]
fn target_out_of_service_keeps_the_bearer_waiting() {
    let f = fleet();
    f.runtime
        .environment(EnvironmentEvent::Registration {
            transport: Transport::Wlan,
            in_service: false,
            roaming: false,
            tech: switchyard_common::RadioTech::Iwlan,
        })
        .unwrap();
    f.runtime.submit(NetRequest::new(caps("internet"), "browser")).unwrap();
    let before = wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].connected);

    f.runtime
        .environment(EnvironmentEvent::PreferredTransport {
            capability: Capability::Internet,
            transport: Transport::Wlan,
        })
        .unwrap();

    settle(&f, |s| {
        s.bearers.len() == 1
            && s.bearers[0].id == before.bearers[0].id
            && s.bearers[0].transport == Transport::Cellular
    });

    // The target coming back in service unblocks the move.
    f.runtime
        .environment(EnvironmentEvent::Registration {
            transport: Transport::Wlan,
            in_service: true,
            roaming: false,
            tech: switchyard_common::RadioTech::Iwlan,
        })
        .unwrap();
    wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].transport == Transport::Wlan);
}

#[test]
fn rule_disallowed_handover_recreates_on_target() {
    let mut config = PolicyConfig::default();
    config.handover_rules.push(
        "source=cellular, target=wlan, type=disallowed, capabilities=ims".to_string(),
    );
    config.timeouts.graceful_teardown_ms = 100;
    let f = fleet_with(config);

    f.runtime.submit(NetRequest::new(caps("ims"), "phone")).unwrap();
    let before = wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].connected);
    assert_eq!(before.bearers[0].transport, Transport::Cellular);

    f.runtime
        .environment(EnvironmentEvent::PreferredTransport {
            capability: Capability::Ims,
            transport: Transport::Wlan,
        })
        .unwrap();

    let after = wait_until(&f, |s| {
        s.bearers.len() == 1 && s.bearers[0].connected && s.bearers[0].transport == Transport::Wlan
    });
    assert_ne!(after.bearers[0].id, before.bearers[0].id, "fresh bearer on the target");
    assert_eq!(f.broker.register_count(), 2, "old handle retired, new one published");
}

#[test]
fn fatal_handover_failure_mode_recreates_on_target() {
    let f = fleet();
    f.runtime.submit(NetRequest::new(caps("internet"), "browser")).unwrap();
    let before = wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].connected);

    // The handover attempt fails with "tear down and retry setup".
    f.service.enqueue(SetupBehavior::Fail {
        cause: FailCause::NetworkFailure,
        retry_after: None,
        handover_mode: 2,
    });
    f.runtime
        .environment(EnvironmentEvent::PreferredTransport {
            capability: Capability::Internet,
            transport: Transport::Wlan,
        })
        .unwrap();

    let after = wait_until(&f, |s| {
        s.bearers.len() == 1 && s.bearers[0].connected && s.bearers[0].transport == Transport::Wlan
    });
    assert_ne!(after.bearers[0].id, before.bearers[0].id, "bearer was recreated");
}

#[test]
fn non_fatal_handover_failure_keeps_the_network() {
    let f = fleet();
    f.runtime.submit(NetRequest::new(caps("internet"), "browser")).unwrap();
    let before = wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].connected);

    // First attempt fails in "stay" mode; the bearer keeps its network
    // on cellular. The next reconciliation retries and succeeds.
    f.service.enqueue(SetupBehavior::Fail {
        cause: FailCause::Congestion,
        retry_after: None,
        handover_mode: 0,
    });
    f.runtime
        .environment(EnvironmentEvent::PreferredTransport {
            capability: Capability::Internet,
            transport: Transport::Wlan,
        })
        .unwrap();

    let after = wait_until(&f, |s| {
        s.bearers.len() == 1 && s.bearers[0].connected && s.bearers[0].transport == Transport::Wlan
    });
    assert_eq!(
        after.bearers[0].id, before.bearers[0].id,
        "same bearer: the failed move never cost the network"
    );
}

#[test]
fn voice_bearer_does_not_move_to_voiceless_target() {
    let f = fleet();
    f.runtime
        .environment(EnvironmentEvent::VoiceCapable { transport: Transport::Wlan, capable: false })
        .unwrap();
    f.runtime.submit(NetRequest::new(caps("ims"), "phone")).unwrap();
    let before = wait_until(&f, |s| s.bearers.len() == 1 && s.bearers[0].connected);

    f.runtime
        .environment(EnvironmentEvent::PreferredTransport {
            capability: Capability::Ims,
            transport: Transport::Wlan,
        })
        .unwrap();

    settle(&f, |s| {
        s.bearers.len() == 1
            && s.bearers[0].id == before.bearers[0].id
            && s.bearers[0].transport == Transport::Cellular
    });
}
