//! Fixed-table backoff schedule for failed deliveries.
//!
//! Unlike a computed exponential policy, the schedule is a fixed table:
//! a failure at attempt index 0 retries after 1 minute, index 1 after
//! 5 minutes, index 2 after 30 minutes. A failure at index 3 exhausts the
//! budget and the attempt goes terminal.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Retry delays indexed by the attempt index at which the send failed.
pub const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(60),
    Duration::from_secs(300),
    Duration::from_secs(1800),
];

/// Highest attempt index that is ever sent.
///
/// Index 0 is the initial dispatch send; the sweeper performs retries at
/// indexes 1 through `MAX_ATTEMPT_INDEX`. Re-exported from the storage
/// layer so the claim query and the schedule can never disagree.
pub use pulse_core::storage::delivery_attempts::MAX_ATTEMPT_INDEX;

/// Result of a retry decision for a failed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry at the specified time.
    Retry {
        /// When the next send should happen.
        next_attempt_at: DateTime<Utc>,
    },
    /// Budget exhausted; the attempt is terminally failed.
    GiveUp,
}

/// Decides whether a send that failed at `attempt_index` gets another try.
///
/// `attempt_index` is the 0-based index of the send that just failed;
/// `failed_at` anchors the delay.
pub fn decide(attempt_index: i32, failed_at: DateTime<Utc>) -> RetryDecision {
    let Ok(index) = usize::try_from(attempt_index) else {
        return RetryDecision::GiveUp;
    };

    match RETRY_BACKOFF.get(index) {
        Some(delay) => {
            let delay = chrono::Duration::from_std(*delay)
                .unwrap_or_else(|_| chrono::Duration::zero());
            RetryDecision::Retry { next_attempt_at: failed_at + delay }
        },
        None => RetryDecision::GiveUp,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn backoff_table_is_exactly_one_five_thirty_minutes() {
        assert_eq!(RETRY_BACKOFF[0], Duration::from_secs(60));
        assert_eq!(RETRY_BACKOFF[1], Duration::from_secs(300));
        assert_eq!(RETRY_BACKOFF[2], Duration::from_secs(1800));
    }

    #[test]
    fn each_failure_index_maps_to_its_delay() {
        let failed_at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        for (index, delay) in RETRY_BACKOFF.iter().enumerate() {
            let decision = decide(i32::try_from(index).unwrap(), failed_at);
            let expected = failed_at + chrono::Duration::from_std(*delay).unwrap();
            assert_eq!(decision, RetryDecision::Retry { next_attempt_at: expected });
        }
    }

    #[test]
    fn failure_past_the_table_gives_up() {
        let failed_at = Utc::now();
        assert_eq!(decide(3, failed_at), RetryDecision::GiveUp);
        assert_eq!(decide(7, failed_at), RetryDecision::GiveUp);
    }

    #[test]
    fn negative_index_gives_up() {
        assert_eq!(decide(-1, Utc::now()), RetryDecision::GiveUp);
    }

    #[test]
    fn table_covers_every_retryable_index() {
        // The last scheduled retry runs at MAX_ATTEMPT_INDEX; the table must
        // provide a delay for every failure index below it.
        assert_eq!(RETRY_BACKOFF.len(), usize::try_from(MAX_ATTEMPT_INDEX).unwrap());
    }
}
