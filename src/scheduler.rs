// ==========================================
// REPEATING TASKS
// ==========================================
// A `RepeatingTask` runs an async job on a fixed interval until it is
// stopped or dropped. A controller keeps at most one per job in a
// `TaskSlot`; starting a new one cancels the old one first.
//
// Ticks that come due while the job is still running are skipped, never
// queued (MissedTickBehavior::Skip).

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub struct RepeatingTask {
    handle: JoinHandle<()>,
    period: Duration,
}

impl RepeatingTask {
    /// Spawns `job` every `period`, first run one period from now.
    pub fn spawn<F, Fut>(period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                job().await;
            }
        });
        RepeatingTask { handle, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Holds at most one active task
#[derive(Default)]
pub struct TaskSlot {
    task: Mutex<Option<RepeatingTask>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces (and cancels) any running task
    pub fn start(&self, task: RepeatingTask) {
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn stop(&self) {
        let previous = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|task| task.is_running())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(period: Duration, counter: Arc<AtomicUsize>) -> RepeatingTask {
        RepeatingTask::spawn(period, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn runs_repeatedly_until_stopped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Duration::from_millis(10), counter.clone());

        tokio::time::sleep(Duration::from_millis(75)).await;
        task.stop();
        let seen = counter.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several runs, saw {}", seen);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn starting_a_new_task_cancels_the_old_one() {
        let slot = TaskSlot::new();
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));

        slot.start(counting_task(Duration::from_millis(10), old.clone()));
        tokio::time::sleep(Duration::from_millis(35)).await;
        slot.start(counting_task(Duration::from_millis(10), new.clone()));
        let old_seen = old.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(old.load(Ordering::SeqCst), old_seen);
        assert!(new.load(Ordering::SeqCst) >= 1);
        assert!(slot.is_active());

        slot.stop();
        assert!(!slot.is_active());
    }
}
