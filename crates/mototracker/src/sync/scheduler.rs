//! Daily batch sync with retry backoff.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use tracing::{info, warn};

use super::batch::{BatchSync, SyncOutcome};

/// Backoff between retries of a failed run, in seconds.
const RETRY_INTERVALS: &[u64] = &[30, 60, 120, 300];

/// Next occurrence of `at` strictly after `now`, in `now`'s time zone.
#[must_use]
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();

    // Three days covers a skipped local time on a DST transition day.
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            if candidate > *now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    now.clone() + chrono::Duration::days(1)
}

/// Runs [`BatchSync`] once a day and retries failed runs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    batch: BatchSync,
    daily_at: NaiveTime,
    max_retries: u32,
    retry_intervals: Vec<Duration>,
}

impl Scheduler {
    /// Create a scheduler that runs at `daily_at` local time.
    #[must_use]
    pub fn new(batch: BatchSync, daily_at: NaiveTime, max_retries: u32) -> Self {
        Self {
            batch,
            daily_at,
            max_retries,
            retry_intervals: RETRY_INTERVALS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    /// Replace the backoff schedule.
    #[must_use]
    pub fn with_retry_intervals(mut self, intervals: Vec<Duration>) -> Self {
        if !intervals.is_empty() {
            self.retry_intervals = intervals;
        }
        self
    }

    /// Delay before retry number `attempt` (zero-based). The last interval
    /// repeats once the schedule runs out.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt)
            .unwrap_or(usize::MAX)
            .min(self.retry_intervals.len().saturating_sub(1));
        self.retry_intervals
            .get(index)
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Time to wait from `now` until the next scheduled run.
    #[must_use]
    pub fn delay_until_next<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        let next = next_run_after(now, self.daily_at);
        (next - now.clone()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Run the batch sync, retrying a failed run up to `max_retries` times.
    pub async fn run_with_retries(&self) -> SyncOutcome {
        let mut attempt = 0;
        loop {
            let outcome = self.batch.run().await;
            if outcome.is_success() || attempt >= self.max_retries {
                return outcome;
            }

            let delay = self.retry_delay(attempt);
            warn!(
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_secs = delay.as_secs(),
                "Batch sync failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Run daily until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let delay = self.delay_until_next(&Local::now());
            info!(
                at = %self.daily_at.format("%H:%M"),
                in_secs = delay.as_secs(),
                "Next batch sync scheduled"
            );

            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(delay) => {}
            }

            tokio::select! {
                () = &mut shutdown => break,
                outcome = self.run_with_retries() => {
                    if !outcome.is_success() {
                        warn!(?outcome, "Batch sync gave up until the next scheduled run");
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::records::User;
    use crate::remote::{MemoryDocumentStore, USERS};
    use crate::storage::Storage;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn scheduler(max_retries: u32) -> (Arc<Storage>, Arc<MemoryDocumentStore>, Scheduler) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let store = Arc::new(MemoryDocumentStore::new());
        let batch = BatchSync::new(Arc::clone(&storage), store.clone(), true);
        let scheduler = Scheduler::new(batch, at(12, 0), max_retries)
            .with_retry_intervals(vec![Duration::from_millis(5)]);
        (storage, store, scheduler)
    }

    #[test]
    fn test_next_run_later_today() {
        let now = utc("2024-05-01T08:30:00Z");
        assert_eq!(next_run_after(&now, at(12, 0)), utc("2024-05-01T12:00:00Z"));
    }

    #[test]
    fn test_next_run_tomorrow() {
        let now = utc("2024-05-01T12:00:00Z");
        assert_eq!(next_run_after(&now, at(12, 0)), utc("2024-05-02T12:00:00Z"));

        let now = utc("2024-12-31T23:59:00Z");
        assert_eq!(next_run_after(&now, at(0, 30)), utc("2025-01-01T00:30:00Z"));
    }

    #[test]
    fn test_retry_delay_schedule() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let batch = BatchSync::new(storage, Arc::new(MemoryDocumentStore::new()), false);
        let scheduler = Scheduler::new(batch, at(12, 0), 4);

        assert_eq!(scheduler.retry_delay(0), Duration::from_secs(30));
        assert_eq!(scheduler.retry_delay(1), Duration::from_secs(60));
        assert_eq!(scheduler.retry_delay(3), Duration::from_secs(300));
        assert_eq!(scheduler.retry_delay(9), Duration::from_secs(300));
    }

    #[test]
    fn test_delay_until_next() {
        let (_, _, scheduler) = scheduler(0);
        let now = utc("2024-05-01T11:59:00Z");
        assert_eq!(scheduler.delay_until_next(&now), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let (storage, store, scheduler) = scheduler(3);
        storage
            .insert_user(&User::new("Ana", "ana@example.com", "5512345678", "pw", ""))
            .unwrap();
        storage
            .insert_user(&User::new("Beto", "beto@example.com", "5500000000", "pw", ""))
            .unwrap();
        store.fail_after(1).unwrap();

        // First run syncs one user and fails; the outage ends before the retry.
        let healer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                store.heal().unwrap();
            })
        };

        let outcome = scheduler.run_with_retries().await;
        healer.await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.counts().users, 1);
        assert_eq!(store.count(USERS).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (storage, store, scheduler) = scheduler(2);
        storage
            .insert_user(&User::new("Ana", "ana@example.com", "5512345678", "pw", ""))
            .unwrap();
        store.fail_collection(USERS).unwrap();

        let outcome = scheduler.run_with_retries().await;
        assert!(!outcome.is_success());
        assert_eq!(storage.unsynced_users().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let (_, _, scheduler) = scheduler(0);
        tokio::time::timeout(Duration::from_secs(1), scheduler.run_until(async {}))
            .await
            .unwrap();
    }
}
