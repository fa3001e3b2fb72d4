mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::Notify;

use common::*;
use voice_session_core::adapters::{HubTransportEvent, SdkEvent};
use voice_session_core::{CallStatus, OfferId, PresenceLink, SessionEvent, VoiceError};

#[tokio::test]
async fn test_initialize_registers_and_connects_presence() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());

    let status = h.session.initialize().await.unwrap();
    assert_eq!(status, CallStatus::Ready);
    assert_eq!(h.device.calls(), vec![DeviceCall::Register]);

    let snapshot = wait_for(&mut h.snapshots, |s| s.presence_link == PresenceLink::Connected).await;
    assert_eq!(snapshot.status, CallStatus::Ready);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_outbound_call_dials_normalized_number_and_goes_busy() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    wait_for(&mut h.snapshots, |s| s.presence_link == PresenceLink::Connected).await;

    let coordinator = h.session.coordinator();
    assert!(coordinator.call_out(" 555 123 4567 "));
    assert_eq!(coordinator.status(), CallStatus::Calling);

    h.sdk.send(SdkEvent::new("accept")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Connected).await;

    assert!(coordinator.hangup());
    assert_eq!(coordinator.status(), CallStatus::Idle);
    coordinator.flush().await;

    assert_eq!(
        h.device.calls(),
        vec![
            DeviceCall::Register,
            DeviceCall::Connect("5551234567".to_string()),
            DeviceCall::DisconnectAll,
        ]
    );
    assert_eq!(h.hub.announced(), vec!["busy".to_string(), "available".to_string()]);
}

#[tokio::test]
async fn test_two_offers_answer_one_reject_other() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();

    h.sdk.send(incoming("A")).unwrap();
    h.sdk.send(incoming("B")).unwrap();
    let snapshot = wait_for(&mut h.snapshots, |s| s.incoming_calls.len() == 2).await;
    assert_eq!(snapshot.status, CallStatus::Ringing);
    assert_eq!(snapshot.incoming_calls[0].caller.as_deref(), Some("+15550100"));

    let coordinator = h.session.coordinator();
    assert!(coordinator.answer_call("A"));
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.status, CallStatus::Connected);
    assert_eq!(
        snapshot.incoming_calls.iter().map(|o| o.id.clone()).collect::<Vec<_>>(),
        vec![OfferId::from("B")]
    );

    assert!(coordinator.reject_call("B"));
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.status, CallStatus::Connected);
    assert!(snapshot.incoming_calls.is_empty());

    coordinator.flush().await;
    let calls = h.device.calls();
    assert!(calls.contains(&DeviceCall::Accept("A".to_string())));
    assert!(calls.contains(&DeviceCall::Reject("B".to_string())));
}

#[tokio::test]
async fn test_reject_then_answer_fails_silently() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;

    let coordinator = h.session.coordinator();
    assert!(coordinator.reject_call("A"));
    assert!(!coordinator.answer_call("A"));
    assert_eq!(coordinator.status(), CallStatus::Idle);
    assert!(coordinator.snapshot().active_call.is_none());

    coordinator.flush().await;
    assert!(!h.device.calls().contains(&DeviceCall::Accept("A".to_string())));
}

#[tokio::test]
async fn test_caller_cancel_before_answer_returns_to_idle() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;

    h.sdk.send(SdkEvent::new("cancel").with_call_id("A")).unwrap();
    let snapshot = wait_for(&mut h.snapshots, |s| s.incoming_calls.is_empty()).await;
    assert_eq!(snapshot.status, CallStatus::Idle);
}

#[tokio::test]
async fn test_hangup_twice_from_connected() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;

    let coordinator = h.session.coordinator();
    coordinator.answer_call("A");
    assert!(coordinator.hangup());
    assert!(!coordinator.hangup());
    assert_eq!(coordinator.status(), CallStatus::Idle);

    coordinator.flush().await;
    let disconnects = h
        .device
        .calls()
        .into_iter()
        .filter(|c| *c == DeviceCall::DisconnectAll)
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_status_changes_report_ended_but_snapshot_never_rests_there() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    let mut events = h.session.coordinator().events();

    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;
    let coordinator = h.session.coordinator();
    coordinator.answer_call("A");
    coordinator.hangup();

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StatusChanged { previous, new, .. } = event {
            transitions.push((previous, new));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (CallStatus::Ready, CallStatus::Ringing),
            (CallStatus::Ringing, CallStatus::Connected),
            (CallStatus::Connected, CallStatus::Ended),
            (CallStatus::Ended, CallStatus::Idle),
        ]
    );
    assert_eq!(coordinator.snapshot().status, CallStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_duration_timer_counts_and_resets() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;

    let coordinator = h.session.coordinator();
    coordinator.answer_call("A");
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert_eq!(coordinator.snapshot().duration_secs, 5);

    coordinator.hangup();
    assert_eq!(coordinator.snapshot().duration_secs, 0);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(coordinator.snapshot().duration_secs, 0);

    h.sdk.send(incoming("B")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;
    coordinator.answer_call("B");
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(coordinator.snapshot().duration_secs, 2);
}

#[tokio::test]
async fn test_mute_toggles_only_when_connected() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    let coordinator = h.session.coordinator();
    assert!(!coordinator.toggle_mute());

    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;
    coordinator.answer_call("A");
    assert!(coordinator.toggle_mute());
    assert!(coordinator.snapshot().is_muted);

    coordinator.flush().await;
    assert!(h
        .device
        .calls()
        .contains(&DeviceCall::Mute(Some("A".to_string()), true)));
}

#[tokio::test]
async fn test_token_failure_is_login_error() {
    let h = harness(
        StaticTokens::failing(VoiceError::TokenEndpointStatus { status: 500 }),
        FakeHub::new(),
    );

    let result = h.session.initialize().await;
    assert_eq!(result, Err(VoiceError::TokenEndpointStatus { status: 500 }));

    let snapshot = h.session.coordinator().snapshot();
    assert_eq!(snapshot.status, CallStatus::LoginError);
    assert_eq!(snapshot.last_error.as_deref(), Some("Token endpoint returned HTTP 500"));
    assert!(h.device.calls().is_empty());
}

#[tokio::test]
async fn test_register_failure_is_login_error_and_retry_succeeds() {
    let device = RecordingDevice::new();
    *device.fail_register.lock() = Some("invalid access token".to_string());
    let h = harness_with_device(StaticTokens::new(), FakeHub::new(), device.clone());

    assert!(h.session.initialize().await.is_err());
    assert_eq!(h.session.coordinator().status(), CallStatus::LoginError);

    *device.fail_register.lock() = None;
    assert_eq!(h.session.initialize().await.unwrap(), CallStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_hub_unreachable_degrades_to_call_only() {
    let mut h = harness(StaticTokens::new(), FakeHub::refusing());

    assert_eq!(h.session.initialize().await.unwrap(), CallStatus::Ready);
    let snapshot = wait_for(&mut h.snapshots, |s| s.presence_link == PresenceLink::Disconnected && s.status == CallStatus::Ready).await;
    assert_eq!(snapshot.status, CallStatus::Ready);

    let coordinator = h.session.coordinator();
    assert!(coordinator.call_out("100"));
    coordinator.flush().await;
    assert!(h.device.calls().contains(&DeviceCall::Connect("100".to_string())));
}

#[tokio::test]
async fn test_hub_loss_during_call_keeps_connected() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    wait_for(&mut h.snapshots, |s| s.presence_link == PresenceLink::Connected).await;
    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;
    h.session.coordinator().answer_call("A");

    h.hub.push(HubTransportEvent::Reconnecting);
    let snapshot = wait_for(&mut h.snapshots, |s| s.presence_link == PresenceLink::Reconnecting).await;
    assert_eq!(snapshot.status, CallStatus::Connected);

    h.hub.push(HubTransportEvent::Closed { error: Some("gave up".to_string()) });
    let snapshot = wait_for(&mut h.snapshots, |s| s.presence_link == PresenceLink::Disconnected).await;
    assert_eq!(snapshot.status, CallStatus::Connected);
}

#[tokio::test]
async fn test_hangup_while_registering_discards_late_registration() {
    let gate = Arc::new(Notify::new());
    let h = harness(StaticTokens::gated(gate.clone()), FakeHub::new());
    let session = Arc::new(h.session);

    let init = {
        let session = session.clone();
        tokio::spawn(async move { session.initialize().await })
    };
    while session.coordinator().status() != CallStatus::Registering {
        tokio::task::yield_now().await;
    }

    assert!(session.coordinator().hangup());
    assert_eq!(session.coordinator().status(), CallStatus::Idle);

    gate.notify_one();
    let status = init.await.unwrap().unwrap();
    assert_eq!(status, CallStatus::Idle);
    assert_eq!(session.coordinator().status(), CallStatus::Idle);
}

#[tokio::test]
async fn test_connect_failure_surfaces_connection_error() {
    let device = RecordingDevice::new();
    *device.fail_connect.lock() = Some("microphone permission denied".to_string());
    let mut h = harness_with_device(StaticTokens::new(), FakeHub::new(), device);
    h.session.initialize().await.unwrap();
    let mut events = h.session.coordinator().events();

    h.session.coordinator().call_out("100");
    let snapshot = wait_for(&mut h.snapshots, |s| s.status == CallStatus::ConnectionError).await;
    assert!(snapshot.active_call.is_none());
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("microphone permission denied")));

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::ActionFailed { action, .. } = event {
            assert_eq!(action, "connect_device");
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn test_late_connect_failure_leaves_next_call_alone() {
    let device = RecordingDevice::new();
    *device.fail_connect.lock() = Some("dial rejected".to_string());
    let mut h = harness_with_device(StaticTokens::new(), FakeHub::new(), device);
    h.session.initialize().await.unwrap();
    let coordinator = h.session.coordinator();

    // Abandon the outbound call before its connect has been executed
    assert!(coordinator.call_out("100"));
    assert!(coordinator.hangup());

    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;
    assert!(coordinator.answer_call("A"));
    coordinator.flush().await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.status, CallStatus::Connected);
    assert_eq!(
        snapshot.active_call.and_then(|c| c.offer_id),
        Some(OfferId::from("A"))
    );
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("dial rejected")));
}

#[tokio::test]
async fn test_device_error_during_call_frees_presence() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    wait_for(&mut h.snapshots, |s| s.presence_link == PresenceLink::Connected).await;

    h.sdk.send(incoming("A")).unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::Ringing).await;
    assert!(h.session.coordinator().answer_call("A"));

    h.sdk
        .send(SdkEvent::new("error").with_message("media transport lost"))
        .unwrap();
    wait_for(&mut h.snapshots, |s| s.status == CallStatus::ConnectionError).await;
    h.session.coordinator().flush().await;

    assert_eq!(h.hub.announced(), vec!["busy".to_string(), "available".to_string()]);
}

#[tokio::test]
async fn test_token_will_expire_refreshes_device_token() {
    let tokens = StaticTokens::new();
    let h = harness(tokens.clone(), FakeHub::new());
    h.session.initialize().await.unwrap();

    h.sdk.send(SdkEvent::new("tokenWillExpire")).unwrap();
    for _ in 0..100 {
        if h.device.calls().iter().any(|c| matches!(c, DeviceCall::UpdateToken(_))) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h
        .device
        .calls()
        .contains(&DeviceCall::UpdateToken("token-agent-7-2".to_string())));
    assert_eq!(h.session.coordinator().status(), CallStatus::Ready);
}

#[tokio::test]
async fn test_teardown_releases_device_and_hub() {
    let mut h = harness(StaticTokens::new(), FakeHub::new());
    h.session.initialize().await.unwrap();
    wait_for(&mut h.snapshots, |s| s.presence_link == PresenceLink::Connected).await;
    h.sdk.send(incoming("A")).unwrap();
    h.sdk.send(incoming("B")).unwrap();
    wait_for(&mut h.snapshots, |s| s.incoming_calls.len() == 2).await;
    h.session.coordinator().answer_call("A");

    h.session.teardown().await;

    let snapshot = h.session.coordinator().snapshot();
    assert_eq!(snapshot.status, CallStatus::Disconnected);
    assert!(snapshot.incoming_calls.is_empty());
    assert!(snapshot.active_call.is_none());

    let calls = h.device.calls();
    assert!(calls.contains(&DeviceCall::DisconnectAll));
    assert_eq!(calls.last(), Some(&DeviceCall::Destroy));
    assert_eq!(h.hub.announced().last().map(String::as_str), Some("available"));
    assert!(*h.hub.closed.lock());
    assert!(h.session.presence().is_some_and(|p| !p.is_connected()));

    // The context can be brought up again
    assert_eq!(h.session.initialize().await.unwrap(), CallStatus::Ready);
}
