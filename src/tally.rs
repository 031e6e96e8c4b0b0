//! Running daily order/revenue tally.
//!
//! Display data for the operator: how many receipts printed today and for
//! how much. The tally is anchored to a calendar day; once the local date
//! moves past the anchor the counts are stale and must be rebuilt from the
//! store's authoritative aggregate before any further increments. Owned and
//! mutated exclusively by the polling coordinator.

use chrono::{DateTime, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{info, warn};

use crate::store::{ReceiptStore, TallySnapshot};

/// Count and revenue for one calendar day.
#[derive(Debug, Clone)]
pub struct DailyTally {
    count: u64,
    total: i64,
    anchor: NaiveDate,
}

/// UTC instant of local midnight for `day`. On a nonexistent local time
/// (DST gap) the naive reading is used as-is.
fn local_midnight_utc(day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => Utc.from_utc_datetime(&midnight),
    }
}

impl DailyTally {
    /// Fresh zeroed tally anchored to `day`.
    pub fn new(day: NaiveDate) -> Self {
        Self {
            count: 0,
            total: 0,
            anchor: day,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    /// Replace state from the store's aggregate for `day`.
    ///
    /// Aggregate failures degrade to a zeroed tally — the tally is advisory
    /// display data and must never block printing.
    pub async fn rebuild(&mut self, store: &dyn ReceiptStore, store_id: &str, day: NaiveDate) {
        let since = local_midnight_utc(day);
        let snapshot = match store.aggregate_today(store_id, since).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, store_id = store_id, "tally rebuild failed, starting from zero");
                TallySnapshot::default()
            }
        };
        self.count = snapshot.count;
        self.total = snapshot.total;
        self.anchor = day;
        info!(
            store_id = store_id,
            day = %day,
            count = self.count,
            total = self.total,
            "daily tally rebuilt"
        );
    }

    /// Record one successfully printed receipt.
    pub fn record_print(&mut self, amount: i64) {
        self.count += 1;
        self.total += amount;
    }

    /// Rebuild when the anchor date no longer matches `today`.
    ///
    /// Returns whether a rollover occurred. Called once per tick, before
    /// the fetch, so increments always land on the correct day.
    pub async fn rollover_if_needed(
        &mut self,
        store: &dyn ReceiptStore,
        store_id: &str,
        today: NaiveDate,
    ) -> bool {
        if self.anchor == today {
            return false;
        }
        info!(from = %self.anchor, to = %today, "day rolled over, rebuilding tally");
        self.rebuild(store, store_id, today).await;
        true
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::receipt::Receipt;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AggregateStore {
        calls: AtomicUsize,
        result: Result<TallySnapshot, ()>,
    }

    impl AggregateStore {
        fn returning(snapshot: TallySnapshot) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: Ok(snapshot),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: Err(()),
            }
        }
    }

    #[async_trait]
    impl ReceiptStore for AggregateStore {
        async fn fetch_pending(
            &self,
            _store_id: &str,
            _limit: usize,
        ) -> Result<Vec<Receipt>, StoreError> {
            Ok(Vec::new())
        }

        async fn mark_done(&self, _receipt_id: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn aggregate_today(
            &self,
            _store_id: &str,
            _since: DateTime<Utc>,
        ) -> Result<TallySnapshot, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .map_err(|_| StoreError::Unavailable("down".into()))
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn rebuild_replaces_state_from_aggregate() {
        let store = AggregateStore::returning(TallySnapshot {
            count: 7,
            total: 420000,
        });
        let mut tally = DailyTally::new(day(2026, 8, 6));
        tally.record_print(1000);
        tally.rebuild(&store, "store-1", day(2026, 8, 7)).await;
        assert_eq!(tally.count(), 7);
        assert_eq!(tally.total(), 420000);
        assert_eq!(tally.anchor(), day(2026, 8, 7));
    }

    #[tokio::test]
    async fn rebuild_failure_degrades_to_zero() {
        let store = AggregateStore::failing();
        let mut tally = DailyTally::new(day(2026, 8, 6));
        tally.record_print(5000);
        tally.rebuild(&store, "store-1", day(2026, 8, 7)).await;
        assert_eq!(tally.count(), 0);
        assert_eq!(tally.total(), 0);
        assert_eq!(tally.anchor(), day(2026, 8, 7));
    }

    #[tokio::test]
    async fn rollover_triggers_exactly_one_aggregate_call() {
        let store = AggregateStore::returning(TallySnapshot { count: 3, total: 99000 });
        let mut tally = DailyTally::new(day(2026, 8, 6));
        let rolled = tally
            .rollover_if_needed(&store, "store-1", day(2026, 8, 7))
            .await;
        assert!(rolled);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tally.anchor(), day(2026, 8, 7));
    }

    #[tokio::test]
    async fn same_day_rollover_is_a_no_op() {
        let store = AggregateStore::returning(TallySnapshot::default());
        let mut tally = DailyTally::new(day(2026, 8, 7));
        tally.record_print(12000);
        let rolled = tally
            .rollover_if_needed(&store, "store-1", day(2026, 8, 7))
            .await;
        assert!(!rolled);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tally.count(), 1);
        assert_eq!(tally.total(), 12000);
    }

    #[test]
    fn record_print_accumulates() {
        let mut tally = DailyTally::new(day(2026, 8, 7));
        tally.record_print(100000);
        tally.record_print(15000);
        assert_eq!(tally.count(), 2);
        assert_eq!(tally.total(), 115000);
    }
}
