//! Property-based tests for core domain invariants.
//!
//! Validates the event vocabulary codecs and the delivery-attempt state
//! machine against arbitrary inputs, with no external dependencies.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use pulse_core::{
    models::{AttemptStatus, DeliveryAttempt, OrgId, Subscription, SubscriptionId},
    EventType,
};

/// Strategy selecting one event type from the closed vocabulary.
fn event_type_strategy() -> impl Strategy<Value = EventType> {
    prop::sample::select(EventType::ALL.to_vec())
}

proptest! {
    /// Wire name and serde codecs agree for every vocabulary member.
    #[test]
    fn event_type_codecs_round_trip(event in event_type_strategy()) {
        let parsed: EventType = event.as_str().parse().expect("wire name parses");
        prop_assert_eq!(parsed, event);

        let json = serde_json::to_string(&event).expect("serialize");
        prop_assert_eq!(json.clone(), format!("\"{}\"", event.as_str()));

        let deserialized: EventType = serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(deserialized, event);
    }

    /// Arbitrary strings outside the vocabulary never parse.
    #[test]
    fn arbitrary_strings_are_not_event_types(name in "[a-z]{1,12}\\.[a-z]{1,12}") {
        let known = EventType::ALL.iter().any(|e| e.as_str() == name);
        prop_assert_eq!(name.parse::<EventType>().is_ok(), known);
    }

    /// A subscription matches exactly the event types in its set.
    #[test]
    fn subscription_matching_is_set_membership(
        events in prop::collection::hash_set(event_type_strategy(), 1..8),
        probe in event_type_strategy(),
    ) {
        let subscription = Subscription::new(
            OrgId::new(),
            "https://example.com/hooks".to_string(),
            "whsec_property".to_string(),
            events.iter().copied().collect(),
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        );

        prop_assert_eq!(subscription.matches(probe), events.contains(&probe));
    }

    /// Terminality is exactly: success, or failed with no retry scheduled.
    #[test]
    fn attempt_terminality_matches_the_state_machine(
        status_index in 0usize..3,
        has_next_retry in any::<bool>(),
    ) {
        let status = [AttemptStatus::Pending, AttemptStatus::Success, AttemptStatus::Failed]
            [status_index];

        let mut attempt = DeliveryAttempt::new(
            SubscriptionId::new(),
            EventType::TaskCompleted,
            serde_json::json!({}),
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        );
        attempt.status = status;
        attempt.next_retry_at =
            has_next_retry.then(|| Utc.with_ymd_and_hms(2025, 6, 1, 0, 1, 0).unwrap());

        let expected = match status {
            AttemptStatus::Success => true,
            AttemptStatus::Failed => !has_next_retry,
            AttemptStatus::Pending => false,
        };
        prop_assert_eq!(attempt.is_terminal(), expected);
    }
}
