//! A background task that performs one unit of work on a fixed period.
//!
//! Runs never overlap: the next run only starts after the previous one returned. A run can be
//! requested early with [`PeriodicRunner::trigger`], and [`PeriodicRunner::trigger_and_wait`] resolves
//! once a run that started after the call has completed.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Work executed by a [`PeriodicRunner`].
pub trait PeriodicAction: Send + Sync + 'static {
    /// Error reported by a failed run. Failures are logged and do not stop the runner.
    type Error: std::fmt::Display + Send;

    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// Performs one run. Implementations should return promptly once `cancel` fires.
    fn run(&self, cancel: &CancellationToken) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Progress counters published after every state change of the runner loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Progress {
    started: u64,
    completed: u64,
}

/// Bookkeeping that collapses a stream of identical failures into a single log line.
#[derive(Debug, Default)]
struct LastError {
    message: Option<String>,
    count: u64,
}

impl LastError {
    fn record(&mut self, name: &str, message: String) {
        if self.message.as_deref() == Some(message.as_str()) {
            self.count += 1;
            return;
        }

        self.flush(name);
        error!(runner = name, err = %message, "periodic run failed");
        self.message = Some(message);
        self.count = 1;
    }

    fn flush(&mut self, name: &str) {
        if let Some(message) = self.message.take() {
            info!(runner = name, err = %message, count = self.count, "error stopped recurring");
        }
        self.count = 0;
    }
}

/// Handle to a spawned periodic task.
#[derive(Debug)]
pub struct PeriodicRunner {
    trigger: Arc<Notify>,
    progress: watch::Receiver<Progress>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicRunner {
    /// Spawns `action` on the current runtime. The first run starts immediately.
    pub fn spawn<A: PeriodicAction>(
        action: Arc<A>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let trigger = Arc::new(Notify::new());
        let (progress_tx, progress) = watch::channel(Progress::default());

        let handle = tokio::spawn(run_loop(
            action,
            period,
            trigger.clone(),
            progress_tx,
            cancel.clone(),
        ));

        Self {
            trigger,
            progress,
            cancel,
            handle,
        }
    }

    /// Requests a run as soon as the current one (if any) finishes.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Triggers a run and waits until a run started after this call has completed.
    ///
    /// Returns `false` if the runner stopped before that happened.
    pub async fn trigger_and_wait(&self) -> bool {
        let mut progress = self.progress.clone();
        // A run already in flight may have missed the trigger, so wait for the one after it.
        let target = progress.borrow_and_update().started + 1;

        self.trigger();
        let completed = progress
            .wait_for(|p| p.completed >= target)
            .await
            .is_ok();
        completed
    }

    /// Returns the number of completed runs.
    pub fn completed_runs(&self) -> u64 {
        self.progress.borrow().completed
    }

    /// Cancels the task and waits for the in-flight run to return.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }
}

async fn run_loop<A: PeriodicAction>(
    action: Arc<A>,
    period: Duration,
    trigger: Arc<Notify>,
    progress: watch::Sender<Progress>,
    cancel: CancellationToken,
) {
    let name = action.name();
    let mut last_error = LastError::default();
    debug!(runner = name, ?period, "periodic runner started");

    while !cancel.is_cancelled() {
        progress.send_modify(|p| p.started += 1);

        match action.run(&cancel).await {
            Ok(()) => last_error.flush(name),
            Err(e) if cancel.is_cancelled() => debug!(runner = name, err = %e, "run interrupted"),
            Err(e) => last_error.record(name, e.to_string()),
        }

        progress.send_modify(|p| p.completed += 1);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = trigger.notified() => {}
            _ = tokio::time::sleep(period) => {}
        }
    }

    debug!(runner = name, "periodic runner stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        runs: AtomicU64,
        fail: bool,
    }

    impl PeriodicAction for Counter {
        type Error = String;

        fn name(&self) -> &'static str {
            "counter"
        }

        async fn run(&self, _cancel: &CancellationToken) -> Result<(), Self::Error> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("boom".to_string());
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_every_period() {
        let counter = Arc::new(Counter::default());
        let runner =
            PeriodicRunner::spawn(counter.clone(), Duration::from_secs(10), CancellationToken::new());

        assert!(runner.trigger_and_wait().await);
        let before = counter.runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let after = counter.runs.load(Ordering::SeqCst);
        assert!(after >= before + 3, "expected three more runs, got {before} -> {after}");

        runner.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_and_wait_runs_again_without_waiting_for_period() {
        let counter = Arc::new(Counter::default());
        let runner = PeriodicRunner::spawn(
            counter.clone(),
            Duration::from_secs(3600),
            CancellationToken::new(),
        );

        assert!(runner.trigger_and_wait().await);
        let first = counter.runs.load(Ordering::SeqCst);
        assert!(runner.trigger_and_wait().await);
        assert_eq!(counter.runs.load(Ordering::SeqCst), first + 1);

        runner.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_runner() {
        let counter = Arc::new(Counter {
            fail: true,
            ..Default::default()
        });
        let runner = PeriodicRunner::spawn(counter.clone(), Duration::from_secs(1), CancellationToken::new());

        assert!(runner.trigger_and_wait().await);
        assert!(runner.trigger_and_wait().await);
        assert!(counter.runs.load(Ordering::SeqCst) >= 2);

        runner.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop() {
        let counter = Arc::new(Counter::default());
        let cancel = CancellationToken::new();
        let runner = PeriodicRunner::spawn(counter.clone(), Duration::from_secs(1), cancel.clone());
        assert!(runner.trigger_and_wait().await);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!runner.trigger_and_wait().await);
    }
}
