//! The retry backoff table.
//!
//! Failed jobs are rescheduled after a delay taken from a fixed escalating
//! table indexed by the attempt count. Attempts beyond the table's length are
//! clamped to its last entry.
//!
//! # Example
//!
//! ```
//! use taskmill::backoff::BackoffTable;
//! use chrono::TimeDelta;
//!
//! let table = BackoffTable::default();
//!
//! assert_eq!(table.delay(1), TimeDelta::seconds(1));
//! assert_eq!(table.delay(2), TimeDelta::seconds(5));
//! assert_eq!(table.delay(3), TimeDelta::seconds(15));
//! assert_eq!(table.delay(4), TimeDelta::minutes(1));
//! assert_eq!(table.delay(5), TimeDelta::minutes(5));
//! // Clamped to the last entry from here on.
//! assert_eq!(table.delay(20), TimeDelta::minutes(5));
//! ```
use chrono::TimeDelta;

/// An ordered list of retry delays indexed by attempt count and clamped at
/// the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffTable {
    delays: Vec<TimeDelta>,
}

impl BackoffTable {
    pub fn new(delays: impl Into<Vec<TimeDelta>>) -> Self {
        Self {
            delays: delays.into(),
        }
    }

    /// The delay before retrying after the given failed attempt (1-based).
    ///
    /// An empty table yields a zero delay.
    pub fn delay(&self, attempt: u32) -> TimeDelta {
        let index = attempt.saturating_sub(1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_else(TimeDelta::zero)
    }
}

impl Default for BackoffTable {
    /// The engine default: 1s, 5s, 15s, 1m, 5m.
    fn default() -> Self {
        Self::new([
            TimeDelta::seconds(1),
            TimeDelta::seconds(5),
            TimeDelta::seconds(15),
            TimeDelta::minutes(1),
            TimeDelta::minutes(5),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indexed_by_attempt() {
        let table = BackoffTable::new([TimeDelta::seconds(2), TimeDelta::seconds(8)]);

        assert_eq!(table.delay(1), TimeDelta::seconds(2));
        assert_eq!(table.delay(2), TimeDelta::seconds(8));
    }

    #[test]
    fn clamps_to_last_entry() {
        let table = BackoffTable::new([TimeDelta::seconds(2), TimeDelta::seconds(8)]);

        for attempt in 3..50 {
            assert_eq!(table.delay(attempt), TimeDelta::seconds(8));
        }
    }

    #[test]
    fn attempt_zero_uses_first_entry() {
        let table = BackoffTable::default();
        assert_eq!(table.delay(0), TimeDelta::seconds(1));
    }

    #[test]
    fn empty_table_is_zero_delay() {
        let table = BackoffTable::new(Vec::new());
        assert_eq!(table.delay(1), TimeDelta::zero());
        assert_eq!(table.delay(10), TimeDelta::zero());
    }
}
