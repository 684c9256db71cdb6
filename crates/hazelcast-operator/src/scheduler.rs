//! Recurring backup triggers, one per HotBackup resource.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::apply::ObjectKey;
use crate::error::ReconcileError;

pub type BackupJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub trait BackupScheduler: Send + Sync {
    /// Registers `job` for `key`, replacing any earlier registration.
    fn schedule(&self, key: ObjectKey, expr: &str, job: BackupJob) -> Result<(), ReconcileError>;
    /// Returns whether an entry was removed.
    fn unschedule(&self, key: &ObjectKey) -> bool;
    fn is_scheduled(&self, key: &ObjectKey) -> bool;
}

/// Accepts standard five-field crontab expressions as well as the
/// six/seven-field form with seconds and `@daily`-style descriptors.
///
/// Five-field expressions use crontab weekday numbering (0-7, Sunday is 0 or 7)
/// and are rewritten to the `cron` crate's numbering (1-7, Sunday is 1).
pub fn parse_schedule(expr: &str) -> Result<Schedule, ReconcileError> {
    let trimmed = expr.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [minute, hour, dom, month, dow] if !trimmed.starts_with('@') => {
            format!("0 {minute} {hour} {dom} {month} {}", crontab_day_of_week(dow))
        }
        _ => trimmed.to_string(),
    };
    Schedule::from_str(&normalized).map_err(|source| ReconcileError::Schedule {
        schedule: expr.to_string(),
        source,
    })
}

/// Shifts numeric weekdays in a crontab day-of-week field by one. Names, `*`
/// and anything unparsable are left for the cron parser to judge.
fn crontab_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let shifted = match range.split_once('-') {
                Some((start, end)) => match (start.parse::<u8>(), end.parse::<u8>()) {
                    // 7 closes the week on Sunday, which is 1 after the shift.
                    (Ok(start), Ok(7)) if start > 0 && start <= 6 && step.is_none() => {
                        format!("{}-7,1", start + 1)
                    }
                    (Ok(start), Ok(end)) if start <= 6 && end <= 7 => {
                        format!("{}-{}", start + 1, end.min(6) + 1)
                    }
                    _ => range.to_string(),
                },
                None => match range.parse::<u8>() {
                    Ok(day) if day <= 7 => (day % 7 + 1).to_string(),
                    _ => range.to_string(),
                },
            };
            match step {
                Some(step) => format!("{shifted}/{step}"),
                None => shifted,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

struct CronEntry {
    expr: String,
    schedule: Schedule,
    next: Option<DateTime<Utc>>,
    job: BackupJob,
}

#[derive(Default)]
pub struct CronScheduler {
    entries: DashMap<ObjectKey, CronEntry>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns every job due at `now`, each on its own task.
    pub fn run_pending(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let mut due = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.next.is_some_and(|next| next <= now) {
                let key = entry.key().clone();
                let entry = entry.value_mut();
                entry.next = entry.schedule.after(&now).next();
                info!(key = %key, schedule = %entry.expr, "triggering scheduled hot backup");
                due.push(entry.job.clone());
            }
        }
        due.into_iter().map(|job| tokio::spawn(job())).collect()
    }

    /// Ticks until the returned handle is aborted.
    pub fn start(self: Arc<Self>, tick: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.run_pending(Utc::now());
            }
        })
    }
}

impl BackupScheduler for CronScheduler {
    fn schedule(&self, key: ObjectKey, expr: &str, job: BackupJob) -> Result<(), ReconcileError> {
        let schedule = parse_schedule(expr)?;
        let next = schedule.upcoming(Utc).next();
        let entry = CronEntry {
            expr: expr.to_string(),
            schedule,
            next,
            job,
        };
        // A single insert swaps the entry, so the old job can never fire next to the new one.
        if self.entries.insert(key.clone(), entry).is_some() {
            debug!(key = %key, "replaced existing backup schedule");
        }
        info!(key = %key, schedule = expr, "backup scheduled");
        Ok(())
    }

    fn unschedule(&self, key: &ObjectKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            info!(key = %key, "backup schedule removed");
        }
        removed
    }

    fn is_scheduled(&self, key: &ObjectKey) -> bool {
        self.entries.contains_key(key)
    }
}

/// Accepts and forgets everything; schedule expressions are still validated.
#[derive(Debug, Default)]
pub struct NoopScheduler;

impl BackupScheduler for NoopScheduler {
    fn schedule(&self, _key: ObjectKey, expr: &str, _job: BackupJob) -> Result<(), ReconcileError> {
        parse_schedule(expr).map(|_| ())
    }

    fn unschedule(&self, _key: &ObjectKey) -> bool {
        false
    }

    fn is_scheduled(&self, _key: &ObjectKey) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: &Arc<AtomicUsize>) -> BackupJob {
        let counter = counter.clone();
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[test]
    fn accepts_standard_and_extended_expressions() {
        assert!(parse_schedule("*/5 * * * *").is_ok());
        assert!(parse_schedule("0 */5 * * * *").is_ok());
        assert!(parse_schedule("@daily").is_ok());
        let err = parse_schedule("every day").unwrap_err();
        assert!(!err.is_retryable());
    }

    fn weekdays(expr: &str) -> Vec<chrono::Weekday> {
        use chrono::Datelike;
        let mut days: Vec<_> = parse_schedule(expr)
            .unwrap()
            .upcoming(Utc)
            .take(7)
            .map(|t| t.weekday())
            .collect();
        days.sort_by_key(|d| d.num_days_from_sunday());
        days.dedup();
        days
    }

    #[test]
    fn crontab_weekdays_count_from_sunday_zero() {
        use chrono::Weekday::*;
        assert_eq!(weekdays("0 2 * * 1"), vec![Mon]);
        assert_eq!(weekdays("0 2 * * 0"), vec![Sun]);
        assert_eq!(weekdays("0 2 * * 7"), vec![Sun]);
        assert_eq!(weekdays("0 2 * * 1-5"), vec![Mon, Tue, Wed, Thu, Fri]);
        assert_eq!(weekdays("0 2 * * 5-7"), vec![Sun, Fri, Sat]);
        assert_eq!(weekdays("0 2 * * 0,3"), vec![Sun, Wed]);
        assert_eq!(weekdays("0 2 * * Mon"), vec![Mon]);
        // six-field expressions already use the cron crate's numbering
        assert_eq!(weekdays("0 0 2 * * 2"), vec![Mon]);
    }

    #[tokio::test]
    async fn rescheduling_replaces_the_previous_entry() {
        let scheduler = CronScheduler::new();
        let key = ObjectKey::new("default", "nightly");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(key.clone(), "* * * * * *", counting_job(&first))
            .unwrap();
        scheduler
            .schedule(key.clone(), "* * * * * *", counting_job(&second))
            .unwrap();
        assert_eq!(scheduler.len(), 1);

        let ran = scheduler.run_pending(Utc::now() + chrono::Duration::seconds(5));
        assert_eq!(ran.len(), 1);
        join_all(ran).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn jobs_do_not_fire_before_their_time() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(ObjectKey::new("default", "yearly"), "@yearly", counting_job(&counter))
            .unwrap();
        assert!(scheduler.run_pending(Utc::now()).is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unschedule_stops_firing() {
        let scheduler = CronScheduler::new();
        let key = ObjectKey::new("default", "nightly");
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(key.clone(), "* * * * * *", counting_job(&counter))
            .unwrap();
        assert!(scheduler.unschedule(&key));
        assert!(!scheduler.unschedule(&key));
        assert!(!scheduler.is_scheduled(&key));
        assert!(
            scheduler
                .run_pending(Utc::now() + chrono::Duration::seconds(5))
                .is_empty()
        );
    }

    #[tokio::test]
    async fn slow_backup_does_not_hold_up_other_schedules() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let stuck: BackupJob = Arc::new(|| futures::future::pending().boxed());
        scheduler
            .schedule(ObjectKey::new("default", "a-stuck"), "* * * * * *", stuck)
            .unwrap();
        scheduler
            .schedule(ObjectKey::new("default", "b-quick"), "* * * * * *", counting_job(&counter))
            .unwrap();

        let handles = scheduler.run_pending(Utc::now() + chrono::Duration::seconds(5));
        assert_eq!(handles.len(), 2);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
            tokio::task::yield_now().await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        handles.iter().for_each(JoinHandle::abort);
    }

    #[test]
    fn invalid_expression_keeps_old_entry() {
        let scheduler = CronScheduler::new();
        let key = ObjectKey::new("default", "nightly");
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(key.clone(), "@hourly", counting_job(&counter))
            .unwrap();
        assert!(scheduler.schedule(key.clone(), "nope", counting_job(&counter)).is_err());
        assert!(scheduler.is_scheduled(&key));
    }
}
