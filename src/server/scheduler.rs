//! The background scheduler: a cooperative timer loop over a fixed set of
//! periodic tasks (user-store compaction, race aging, ban sweeping).
//!
//! Each task fires at a fixed interval and is never run re-entrantly; a
//! task still running when its next deadline passes simply skips that
//! round. Task failures are logged and do not stop the loop.

use crate::server::shutdown;
use slog::Logger;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
type TaskFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;
type TaskFn = dyn Fn() -> TaskFuture + Send + Sync;

// Never spin faster than this, even with overdue tasks.
const MIN_SLEEP: Duration = Duration::from_millis(100);

/// One periodic task.
pub struct Task {
    name: &'static str,
    interval: Duration,
    job: Arc<TaskFn>,
    running: Arc<AtomicBool>,
    next_run: Instant,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("name", &self.name).field("interval", &self.interval).finish()
    }
}

impl Task {
    /// A task running `job` every `interval`.
    pub fn new<F, Fut>(name: &'static str, interval: Duration, job: F) -> Task
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Task {
            name,
            interval,
            job: Arc::new(move || Box::pin(job()) as TaskFuture),
            running: Arc::new(AtomicBool::new(false)),
            next_run: Instant::now() + interval,
        }
    }
}

/// Run the scheduler until shutdown. Intended to be spawned alongside the
/// accept loop.
pub async fn run(mut tasks: Vec<Task>, logger: Logger, mut shutdown_signal: shutdown::ShutdownSignal) {
    if tasks.is_empty() {
        return;
    }
    loop {
        let now = Instant::now();
        for task in tasks.iter_mut() {
            if task.next_run > now {
                continue;
            }
            task.next_run = now + task.interval;
            if task.running.swap(true, Ordering::SeqCst) {
                slog::debug!(logger, "scheduler task still running, skipping round"; "task" => task.name);
                continue;
            }
            let job = Arc::clone(&task.job);
            let running = Arc::clone(&task.running);
            let logger = logger.clone();
            let name = task.name;
            tokio::spawn(async move {
                if let Err(err) = job().await {
                    slog::warn!(logger, "scheduler task failed"; "task" => name, "error" => %err);
                }
                running.store(false, Ordering::SeqCst);
            });
        }

        let next_deadline = tasks.iter().map(|t| t.next_run).min().unwrap_or(now + MIN_SLEEP);
        let sleep_for = next_deadline.saturating_duration_since(Instant::now()).max(MIN_SLEEP);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown_signal.wait() => {
                slog::info!(logger, "scheduler stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::registry::SessionRegistry;
    use crate::server::shutdown::ShutdownCoordinator;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn tasks_fire_on_their_interval() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let task = Task::new("tick", Duration::from_millis(200), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let coordinator = ShutdownCoordinator::new(Arc::new(SessionRegistry::new()));
        let signal = coordinator.signal();
        let logger = Logger::root(slog::Discard, slog::o!());
        let handle = tokio::spawn(run(vec![task], logger, signal));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        coordinator.begin();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        let fired = counter.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected several firings, got {}", fired);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tasks_do_not_stop_the_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let task = Task::new("boom", Duration::from_millis(100), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("kaput".into())
            }
        });

        let coordinator = ShutdownCoordinator::new(Arc::new(SessionRegistry::new()));
        let signal = coordinator.signal();
        let logger = Logger::root(slog::Discard, slog::o!());
        let handle = tokio::spawn(run(vec![task], logger, signal));

        tokio::time::sleep(Duration::from_millis(550)).await;
        coordinator.begin();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
    }
}
