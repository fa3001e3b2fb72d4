use proptest::prelude::*;

use voice_session_core::state_table::{
    CallSessionMachine, DeviceEvent, EventTemplate, HubEvent, ProvisioningEpoch, ProvisioningOutcome,
    SessionInput, UserAction,
};
use voice_session_core::{CallStatus, OfferId, PendingCallOffer};

fn offer_id() -> impl Strategy<Value = OfferId> {
    prop_oneof![Just("A"), Just("B"), Just("C")].prop_map(OfferId::from)
}

fn input() -> impl Strategy<Value = SessionInput> {
    prop_oneof![
        Just(SessionInput::User(UserAction::CallOut { destination: "555 0100".to_string() })),
        Just(SessionInput::User(UserAction::Hangup)),
        offer_id().prop_map(|offer_id| SessionInput::User(UserAction::AnswerCall { offer_id })),
        offer_id().prop_map(|offer_id| SessionInput::User(UserAction::RejectCall { offer_id })),
        Just(SessionInput::User(UserAction::ToggleMute)),
        Just(SessionInput::Device(DeviceEvent::Registered)),
        offer_id().prop_map(|id| SessionInput::Device(DeviceEvent::Incoming(PendingCallOffer::new(id)))),
        Just(SessionInput::Device(DeviceEvent::Accepted { offer_id: None })),
        proptest::option::of(offer_id()).prop_map(|offer_id| SessionInput::Device(DeviceEvent::Disconnect { offer_id })),
        Just(SessionInput::Device(DeviceEvent::Unregistered)),
        Just(SessionInput::Device(DeviceEvent::Error { message: "boom".to_string() })),
        Just(SessionInput::Device(DeviceEvent::TokenWillExpire)),
        Just(SessionInput::Hub(HubEvent::Connected)),
        Just(SessionInput::Hub(HubEvent::Closed { error: None })),
        (0u64..4).prop_map(|epoch| SessionInput::Provisioning {
            epoch: ProvisioningEpoch(epoch),
            outcome: ProvisioningOutcome::Registered,
        }),
        (0u64..4).prop_map(|generation| SessionInput::TimerTick { generation }),
    ]
}

proptest! {
    #[test]
    fn status_never_rests_at_ended(inputs in proptest::collection::vec(input(), 0..64), provision in any::<bool>()) {
        let mut machine = CallSessionMachine::new();
        if provision {
            let _ = machine.begin_provisioning();
        }

        for input in inputs {
            let transition = machine.apply(input);
            let snapshot = machine.snapshot();

            prop_assert_ne!(snapshot.status, CallStatus::Ended);
            prop_assert!(CallStatus::ALL.contains(&snapshot.status));

            // The active call exists exactly while a call is in progress
            prop_assert_eq!(snapshot.active_call.is_some(), snapshot.status.is_call_in_progress());
            // Ringing always has something to answer
            if snapshot.status == CallStatus::Ringing {
                prop_assert!(!snapshot.incoming_calls.is_empty());
            }
            // Only a connected call accumulates duration
            if snapshot.status != CallStatus::Connected {
                prop_assert_eq!(snapshot.duration_secs, 0);
            }

            // Status events chain: each one starts where the previous ended
            let mut chain: Option<CallStatus> = None;
            for event in &transition.publish_events {
                if let EventTemplate::StatusChanged { previous, new, .. } = event {
                    if let Some(last) = chain {
                        prop_assert_eq!(*previous, last);
                    }
                    chain = Some(*new);
                }
            }
            if let Some(last) = chain {
                prop_assert_eq!(last, snapshot.status);
            }
        }
    }

    #[test]
    fn registry_never_holds_retired_ids(ids in proptest::collection::vec(offer_id(), 0..32)) {
        let mut machine = CallSessionMachine::new();
        for id in ids {
            machine.apply(SessionInput::Device(DeviceEvent::Incoming(PendingCallOffer::new(id.clone()))));
            machine.apply(SessionInput::User(UserAction::RejectCall { offer_id: id.clone() }));
            prop_assert!(!machine.registry().has(&id));
        }
        prop_assert!(machine.registry().is_empty());
    }
}
