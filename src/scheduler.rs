//! Daily wall-clock timer loop with cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, Offset, TimeZone, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;

/// Pause after a failed run before the next cycle is computed.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(60);

fn offset_for(schedule: &ScheduleConfig) -> FixedOffset {
    FixedOffset::east_opt(schedule.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
}

/// Next instant strictly after `now` at the scheduled local time of day.
pub fn next_run(now: DateTime<Utc>, schedule: &ScheduleConfig) -> DateTime<Utc> {
    let offset = offset_for(schedule);
    let local_now = now.with_timezone(&offset);

    let today = local_now
        .date_naive()
        .and_hms_opt(schedule.hour, schedule.minute, 0)
        .and_then(|t| offset.from_local_datetime(&t).single());

    let target = match today {
        Some(t) if t > local_now => t,
        Some(t) => t.checked_add_days(Days::new(1)).unwrap_or(t),
        None => {
            warn!("Invalid schedule time {:?}, falling back to one day from now", schedule);
            local_now + chrono::Duration::days(1)
        }
    };
    target.with_timezone(&Utc)
}

/// Owns the scheduled loops and the token that stops them.
pub struct TaskScheduler {
    token: CancellationToken,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub async fn task_names(&self) -> Vec<String> {
        self.tasks.lock().await.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Runs `task` every day at the scheduled time. A failed run is logged and
    /// retried on the next natural cycle after [`RETRY_BACKOFF`].
    pub async fn schedule_daily<F, Fut>(&self, name: &str, schedule: ScheduleConfig, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        info!(
            "Scheduling daily task '{}' for {:02}:{:02} (UTC{:+})",
            name, schedule.hour, schedule.minute, schedule.utc_offset_hours
        );
        let token = self.token.clone();
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    break;
                }

                let now = Utc::now();
                let next = next_run(now, &schedule);
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                info!(
                    "Next execution of '{}' in {} seconds at {}",
                    task_name,
                    wait.as_secs(),
                    next
                );

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                if token.is_cancelled() {
                    break;
                }

                info!("Executing scheduled task: {}", task_name);
                match task().await {
                    Ok(()) => info!("Completed scheduled task: {}", task_name),
                    Err(why) => {
                        error!("Error in scheduled task '{}': {:?}", task_name, why);
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                        }
                    }
                }
            }
            info!("Scheduled task '{}' stopped", task_name);
        });

        self.tasks.lock().await.push((name.to_string(), handle));
    }

    /// Signals every loop to stop and waits for in-flight runs to finish.
    pub async fn stop(&self) {
        info!("Stopping task scheduler...");
        self.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (name, handle) in tasks {
            if let Err(why) = handle.await {
                error!("Scheduled task '{}' ended abnormally: {}", name, why);
            }
        }
        info!("Task scheduler stopped");
    }
}
