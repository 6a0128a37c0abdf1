//! Sweep runner
//!
//! Sweeps are explicit task definitions (name, cron schedule, timeout)
//! multiplexed over one cooperative tokio loop. Every sweep body is
//! idempotent over the store, so the contract is simply "at least one
//! invocation per scheduled instant"; row-level claims prevent duplicate
//! work if two instances race.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::{Error, Result};

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A named periodic sweep
pub struct SweepTask {
    pub name: &'static str,
    pub schedule: Schedule,
    pub timeout: Duration,
    run: TaskFn,
}

impl SweepTask {
    /// `cron_expr` uses the six-field form with seconds, e.g.
    /// `"0 0 * * * *"` for the top of every hour.
    pub fn new<F, Fut>(name: &'static str, cron_expr: &str, timeout: Duration, f: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| Error::config(format!("invalid cron expression for {}: {}", name, e)))?;

        Ok(Self {
            name,
            schedule,
            timeout,
            run: Arc::new(move || Box::pin(f()) as TaskFuture),
        })
    }

    fn next_run_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        self.schedule
            .after(&after)
            .next()
            .unwrap_or(after + chrono::Duration::hours(1))
    }
}

struct ScheduledTask {
    task: SweepTask,
    next_run: DateTime<Utc>,
}

/// Cooperative runner for registered sweeps
pub struct SweepRunner {
    tasks: Vec<ScheduledTask>,
    check_interval: Duration,
}

impl SweepRunner {
    pub fn new(check_interval: Duration) -> Self {
        Self { tasks: Vec::new(), check_interval }
    }

    pub fn register(&mut self, task: SweepTask) {
        let next_run = task.next_run_after(Utc::now());
        info!(task = task.name, next_run = %next_run, "sweep registered");
        self.tasks.push(ScheduledTask { task, next_run });
    }

    /// Spawn the runner loop. It lives until the process exits.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(tasks = self.tasks.len(), "sweep runner started");
        loop {
            let now = Utc::now();
            for scheduled in &mut self.tasks {
                if now < scheduled.next_run {
                    continue;
                }

                debug!(task = scheduled.task.name, "sweep firing");
                let started = std::time::Instant::now();
                match tokio::time::timeout(scheduled.task.timeout, (scheduled.task.run)()).await {
                    Ok(Ok(())) => {
                        debug!(
                            task = scheduled.task.name,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "sweep finished"
                        );
                    }
                    Ok(Err(e)) => {
                        error!(task = scheduled.task.name, error = %e, "sweep failed");
                    }
                    Err(_) => {
                        error!(
                            task = scheduled.task.name,
                            timeout_secs = scheduled.task.timeout.as_secs(),
                            "sweep timed out"
                        );
                    }
                }

                scheduled.next_run = scheduled.task.next_run_after(Utc::now());
            }

            tokio::time::sleep(self.check_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cron_parsing() {
        let task = SweepTask::new("hourly", "0 0 * * * *", Duration::from_secs(60), || async {
            Ok(())
        });
        assert!(task.is_ok());

        let bad = SweepTask::new("broken", "not cron", Duration::from_secs(60), || async { Ok(()) });
        assert!(bad.is_err());
    }

    #[test]
    fn test_next_run_is_in_the_future() {
        let task =
            SweepTask::new("daily", "0 0 9 * * *", Duration::from_secs(60), || async { Ok(()) })
                .unwrap();
        let now = Utc::now();
        let next = task.next_run_after(now);
        assert!(next > now);
        // daily at 09:00 is at most 24h away
        assert!(next - now <= chrono::Duration::hours(24));
    }

    #[tokio::test]
    async fn test_due_task_executes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task_counter = counter.clone();
        // every second
        let task = SweepTask::new("tick", "* * * * * *", Duration::from_secs(5), move || {
            let counter = task_counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

        let mut runner = SweepRunner::new(Duration::from_millis(100));
        runner.register(task);
        let handle = runner.spawn();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.abort();

        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
