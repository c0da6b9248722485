//! Wall-clock trigger for the two daily jobs.
//!
//! Kept deliberately independent of any scheduler library: the loop
//! sleeps until the next UTC midnight, runs both jobs, and repeats.
//! Both jobs are idempotent by construction, so an operator can also
//! fire them manually (`remind`/`generate` subcommands) at any time.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info};

use crate::recurring::RecurringGenerator;
use crate::reminders::ReminderScheduler;

pub struct DailyJobs {
    pub reminders: ReminderScheduler,
    pub recurring: RecurringGenerator,
}

impl DailyJobs {
    /// One daily pass. Each job's failure is logged and does not stop
    /// the other; per-invoice isolation happens inside the jobs.
    pub async fn run_once(&self, now: DateTime<Utc>) {
        info!(date = %now.date_naive(), "daily billing run starting");

        if let Err(e) = self.reminders.run(now).await {
            error!(error = %e, "reminder run failed");
        }
        if let Err(e) = self.recurring.run(now.date_naive()).await {
            error!(error = %e, "recurring run failed");
        }
    }
}

/// Run both jobs once per day until interrupted. The shutdown check
/// sits between runs, so an in-flight per-invoice update is never cut
/// short.
pub async fn run_daily(jobs: &DailyJobs) -> anyhow::Result<()> {
    loop {
        let wait = until_next_midnight(Utc::now());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                jobs.run_once(Utc::now()).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, stopping daily scheduler");
                return Ok(());
            }
        }
    }
}

fn until_next_midnight(now: DateTime<Utc>) -> std::time::Duration {
    let next_midnight = (now.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    (next_midnight - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_is_at_most_a_day() {
        let wait = until_next_midnight(Utc::now());
        assert!(wait <= std::time::Duration::from_secs(24 * 60 * 60));
        assert!(wait > std::time::Duration::ZERO);
    }

    #[test]
    fn wait_reaches_exact_midnight() {
        let now = "2026-03-01T23:59:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(until_next_midnight(now), std::time::Duration::from_secs(60));
    }
}
