//! Daily Reset Scheduler (C16, spec §4.15).
//!
//! Every trading day at a configured local time (default 15:05
//! `Asia/Ho_Chi_Minh`, past the HOSE/HNX close), clears every session-scoped
//! tracker and the alert ring while leaving the quote cache and subscriber
//! wiring untouched — the same split `Processor::reset_session` already
//! implements. The wait-until-next-occurrence is recomputed every iteration
//! rather than a fixed `interval`, so a late process start or a paused
//! machine doesn't cause a burst of resets or drift.

use std::sync::Arc;

use chrono::{NaiveTime, TimeZone};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::processor::Processor;

pub struct DailyResetScheduler {
    processor: Arc<Mutex<Processor>>,
    hour: u32,
    minute: u32,
    tz: Tz,
}

impl DailyResetScheduler {
    pub fn new(processor: Arc<Mutex<Processor>>, hour: u32, minute: u32, tz_name: &str) -> anyhow::Result<Self> {
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid timezone name: {tz_name}"))?;
        Ok(Self {
            processor,
            hour,
            minute,
            tz,
        })
    }

    /// Runs forever, firing the reset once per day at the configured time.
    pub async fn run(&self) {
        loop {
            let wait = self.duration_until_next_reset();
            info!(?wait, "scheduled next daily reset");
            tokio::time::sleep(wait).await;

            let mut processor = self.processor.lock();
            processor.reset_session();
            processor.alert_service.reset_daily();
            drop(processor);
            info!("daily reset applied");
        }
    }

    fn duration_until_next_reset(&self) -> std::time::Duration {
        let now = chrono::Utc::now().with_timezone(&self.tz);
        let Some(target_time) = NaiveTime::from_hms_opt(self.hour, self.minute, 0) else {
            error!(hour = self.hour, minute = self.minute, "invalid reset time configured, defaulting to 15:05");
            return self.fallback_wait();
        };

        let mut target_date = now.date_naive();
        let mut target = self.tz.from_local_datetime(&target_date.and_time(target_time)).single();
        if target.map_or(true, |t| t <= now) {
            target_date = target_date.succ_opt().unwrap_or(target_date);
            target = self.tz.from_local_datetime(&target_date.and_time(target_time)).single();
        }

        match target {
            Some(t) => (t - now).to_std().unwrap_or(self.fallback_wait()),
            None => self.fallback_wait(),
        }
    }

    fn fallback_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn new_scheduler() -> DailyResetScheduler {
        let (ntx, _nrx) = tokio::sync::mpsc::unbounded_channel();
        let (ptx, _prx) = tokio::sync::mpsc::unbounded_channel();
        let processor = Arc::new(Mutex::new(Processor::new(HashSet::new(), ntx, ptx)));
        DailyResetScheduler::new(processor, 15, 5, "Asia/Ho_Chi_Minh").unwrap()
    }

    #[test]
    fn invalid_timezone_name_is_rejected() {
        let (ntx, _nrx) = tokio::sync::mpsc::unbounded_channel();
        let (ptx, _prx) = tokio::sync::mpsc::unbounded_channel();
        let processor = Arc::new(Mutex::new(Processor::new(HashSet::new(), ntx, ptx)));
        assert!(DailyResetScheduler::new(processor, 15, 5, "Not/AZone").is_err());
    }

    #[test]
    fn wait_duration_is_always_positive_and_at_most_a_day() {
        let scheduler = new_scheduler();
        let wait = scheduler.duration_until_next_reset();
        assert!(wait.as_secs() > 0);
        assert!(wait.as_secs() <= 24 * 60 * 60);
    }
}
